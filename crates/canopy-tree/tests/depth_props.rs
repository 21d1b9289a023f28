// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};

use canopy_tree::TreeStore;
use proptest::prelude::*;
use serde_json::{json, Value};

type Entry = (u8, Option<u8>, u8);

fn to_value((id, parent, name): Entry) -> Value {
    json!({
        "ID": format!("s{id}"),
        "Name": format!("name{name}"),
        "ParentServiceID": parent.map(|p| format!("s{p}")).unwrap_or_default(),
    })
}

fn batch() -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::vec((0u8..10, prop::option::of(0u8..10), 0u8..4), 0..8)
}

/// Unique ids, parents only point at smaller ids, so no cycle can be declared.
fn acyclic_batch() -> impl Strategy<Value = Vec<Entry>> {
    prop::collection::btree_map(0u8..12, (prop::option::of(0u8..12), 0u8..4), 0..10).prop_map(
        |entries: BTreeMap<u8, (Option<u8>, u8)>| {
            entries
                .into_iter()
                .map(|(id, (parent, name))| (id, parent.filter(|p| *p < id), name))
                .collect()
        },
    )
}

fn check_forest(store: &TreeStore) -> Result<(), TestCaseError> {
    for node in store.iter() {
        match node.parent() {
            Some(parent) => {
                let parent = store.get(parent).unwrap();
                prop_assert_eq!(node.depth(), parent.depth() + 1);
                prop_assert!(!node.is_orphan());
                let listed = parent.children().iter().filter(|c| *c == node.id()).count();
                prop_assert_eq!(listed, 1);
            }
            None => prop_assert_eq!(node.depth(), 0),
        }
        for child in node.children() {
            prop_assert_eq!(store.get(child).unwrap().parent(), Some(node.id()));
        }
    }
    for root in store.roots() {
        prop_assert!(root.parent().is_none());
        prop_assert!(!root.is_orphan());
    }
    for orphan in store.orphan_ids() {
        let node = store.get(orphan).unwrap();
        prop_assert!(node.is_orphan());
        prop_assert!(node.parent().is_none());
    }
    let placed = store.root_ids().len()
        + store.orphan_ids().len()
        + store.iter().map(|n| n.children().len()).sum::<usize>();
    prop_assert_eq!(placed, store.len());
    Ok(())
}

fn depths(store: &TreeStore) -> HashMap<String, usize> {
    store
        .iter()
        .map(|node| (node.id().to_owned(), node.depth()))
        .collect()
}

fn shape(store: &TreeStore) -> Vec<(String, usize, Option<String>, Vec<String>)> {
    let mut out: Vec<_> = store
        .iter()
        .map(|n| {
            (
                n.id().to_owned(),
                n.depth(),
                n.parent().map(str::to_owned),
                n.children().to_vec(),
            )
        })
        .collect();
    out.sort();
    out
}

proptest! {
    #[test]
    fn forest_invariants_hold_after_every_batch(batches in prop::collection::vec(batch(), 1..6)) {
        let mut store = TreeStore::new();
        for entries in batches {
            store.apply_delta(entries.into_iter().map(to_value).collect());
            check_forest(&store)?;
        }
    }

    #[test]
    fn full_depth_walk_matches_incremental_depths(batches in prop::collection::vec(batch(), 1..6)) {
        let mut store = TreeStore::new();
        for entries in batches {
            store.apply_delta(entries.into_iter().map(to_value).collect());
        }
        let incremental = depths(&store);
        let mut walked = store.clone();
        walked.recompute_depths();
        prop_assert_eq!(incremental, depths(&walked));
    }

    #[test]
    fn reapplying_a_batch_changes_nothing(entries in acyclic_batch()) {
        let values: Vec<Value> = entries.into_iter().map(to_value).collect();
        let mut store = TreeStore::new();
        store.apply_delta(values.clone());
        let roots = store.root_ids().to_vec();
        let orphans = store.orphan_ids().to_vec();
        let before = shape(&store);

        let report = store.apply_delta(values);
        prop_assert_eq!(report.created, 0);
        prop_assert_eq!(report.reparented, 0);
        prop_assert_eq!(shape(&store), before);
        prop_assert_eq!(store.root_ids(), &roots[..]);
        prop_assert_eq!(store.orphan_ids(), &orphans[..]);
    }

    #[test]
    fn removals_leave_a_valid_forest(
        entries in batch(),
        removals in prop::collection::vec(0u8..10, 0..4),
    ) {
        let mut store = TreeStore::new();
        store.apply_delta(entries.into_iter().map(to_value).collect());
        for id in removals {
            store.remove(&format!("s{id}"));
            check_forest(&store)?;
        }
        store.apply_delta(Vec::new());
        check_forest(&store)?;
    }
}
