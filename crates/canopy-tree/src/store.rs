// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The mirrored service forest.
//!
//! [`TreeStore`] is the sole owner of every [`ServiceNode`]. Nodes refer to
//! each other by id only, so there is exactly one strong owner per node and
//! no reference cycles. After every public mutation:
//!
//! - parent/child links form a forest and each child is listed once by its parent,
//! - `depth` is `0` for roots and orphans, `parent.depth + 1` otherwise,
//! - `roots` holds exactly the unlinked, non-orphan nodes,
//! - a node is an orphan iff it declares a parent id the store does not hold
//!   (or one it cannot adopt without a cycle),
//! - `roots` and every `children` list are ordered by case-insensitive name,
//!   equal names keeping insertion order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::node::{DerivedView, ServiceNode, ViewSlot};
use crate::snapshot::{DesiredState, ServiceId, ServiceSnapshot};
use crate::views::{addresses_of, hosts_of, AddressView, VirtualHostView};

/// What one [`TreeStore::apply_delta`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaReport {
    /// Services seen for the first time.
    pub created: usize,
    /// Known services that received a new snapshot.
    pub updated: usize,
    /// Known services whose declared parent changed.
    pub reparented: usize,
    /// Entries dropped because they could not be parsed.
    pub skipped: usize,
    /// Orphans attached by the end-of-batch pass.
    pub resolved_orphans: usize,
}

/// Shape of the store at a glance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSummary {
    /// Number of services held.
    pub services: usize,
    /// Number of top-level roots.
    pub roots: usize,
    /// Number of orphans.
    pub orphans: usize,
    /// Deepest depth of any service.
    pub max_depth: usize,
}

/// All mirrored services, indexed by id, plus the ordered root list.
#[derive(Debug, Clone, Default)]
pub struct TreeStore {
    services: HashMap<ServiceId, ServiceNode>,
    roots: Vec<ServiceId>,
    orphans: Vec<ServiceId>,
}

impl TreeStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every service.
    pub fn reset(&mut self) {
        self.services.clear();
        self.roots.clear();
        self.orphans.clear();
    }

    /// Number of services held.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether the store holds no services.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Whether a service with this id is held.
    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    /// Look up a service by id.
    pub fn get(&self, id: &str) -> Option<&ServiceNode> {
        self.services.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut ServiceNode> {
        self.services.get_mut(id)
    }

    /// Look up a service by display name.
    ///
    /// When several services share the name, the smallest id wins.
    pub fn find_by_name(&self, name: &str) -> Option<&ServiceNode> {
        self.services
            .values()
            .filter(|node| node.name() == name)
            .min_by(|a, b| a.id().cmp(b.id()))
    }

    /// Every service, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceNode> {
        self.services.values()
    }

    /// Top-level services in name order.
    pub fn roots(&self) -> impl Iterator<Item = &ServiceNode> {
        self.roots.iter().filter_map(|id| self.services.get(id))
    }

    /// Ids of the top-level services in name order.
    pub fn root_ids(&self) -> &[ServiceId] {
        &self.roots
    }

    /// Ids of the orphaned services, in the order they were orphaned.
    pub fn orphan_ids(&self) -> &[ServiceId] {
        &self.orphans
    }

    /// Children of `id` in name order.
    pub fn children_of(&self, id: &str) -> impl Iterator<Item = &ServiceNode> {
        self.services
            .get(id)
            .map(ServiceNode::children)
            .unwrap_or_default()
            .iter()
            .filter_map(|child| self.services.get(child))
    }

    /// Pre-order walk of the rooted forest, roots in name order.
    ///
    /// Orphans and their subtrees are not reachable from the roots and are not visited.
    pub fn walk(&self) -> Vec<&ServiceNode> {
        let mut out = Vec::with_capacity(self.services.len());
        let mut stack: Vec<&str> = self.roots.iter().rev().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.services.get(id) {
                out.push(node);
                stack.extend(node.children().iter().rev().map(String::as_str));
            }
        }
        out
    }

    /// Counts and deepest depth.
    pub fn summary(&self) -> TreeSummary {
        TreeSummary {
            services: self.services.len(),
            roots: self.roots.len(),
            orphans: self.orphans.len(),
            max_depth: self.services.values().map(ServiceNode::depth).max().unwrap_or(0),
        }
    }

    /// Apply one `/services` response.
    ///
    /// Entries that do not parse are skipped with a warning; the rest of the
    /// batch still applies.
    pub fn apply_delta(&mut self, entries: Vec<Value>) -> DeltaReport {
        let mut skipped = 0;
        let snapshots: Vec<ServiceSnapshot> = entries
            .into_iter()
            .filter_map(|entry| match ServiceSnapshot::from_value(entry) {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    warn!(%err, "skipping service entry");
                    skipped += 1;
                    None
                }
            })
            .collect();
        let mut report = self.apply_snapshots(snapshots);
        report.skipped = skipped;
        report
    }

    /// Apply already-parsed snapshots.
    ///
    /// Known ids are updated in place (and re-parented when their declared
    /// parent changed); unknown ids are created and attached. Once the whole
    /// batch is in, every orphan whose parent now exists is attached.
    pub fn apply_snapshots(&mut self, snapshots: Vec<ServiceSnapshot>) -> DeltaReport {
        let mut report = DeltaReport::default();
        for snapshot in snapshots {
            if self.services.contains_key(&snapshot.id) {
                if self.update_existing(snapshot) {
                    report.reparented += 1;
                }
                report.updated += 1;
            } else {
                let id = snapshot.id.clone();
                self.services.insert(id.clone(), ServiceNode::new(snapshot));
                self.attach(&id);
                report.created += 1;
            }
        }
        report.resolved_orphans = self.resolve_orphans();
        report
    }

    /// Returns `true` when the service had to be re-linked.
    fn update_existing(&mut self, snapshot: ServiceSnapshot) -> bool {
        let id = snapshot.id.clone();
        let declared = snapshot.parent_id().map(str::to_owned);
        let Some(node) = self.services.get_mut(&id) else {
            return false;
        };
        let renamed = node.name() != snapshot.name;
        node.replace_snapshot(snapshot);
        let linked = node.parent.clone();
        let was_orphan = node.orphan;

        if renamed {
            self.resort_siblings(&id);
        }

        let relink = if was_orphan {
            declared
                .as_deref()
                .is_none_or(|parent| self.services.contains_key(parent))
        } else {
            declared != linked
        };
        if relink {
            debug!(service = %id, from = ?linked, to = ?declared, "re-parenting service");
            self.unlink(&id);
            self.attach(&id);
        }
        self.touch(&id);
        relink
    }

    /// Link an unlinked node according to its declared parent.
    fn attach(&mut self, id: &str) {
        let declared = self
            .services
            .get(id)
            .and_then(|node| node.snapshot().parent_id().map(str::to_owned));
        match declared {
            None => self.link_root(id),
            Some(parent) if self.can_adopt(&parent, id) => self.link_child(&parent, id),
            Some(parent) => {
                if self.services.contains_key(&parent) {
                    warn!(service = %id, %parent, "refusing parent link that would form a cycle");
                }
                self.link_orphan(id, &parent);
            }
        }
    }

    /// One pass over the orphans, attaching those whose parent is now known.
    ///
    /// Orphans that still cannot be adopted keep their place and are not
    /// invalidated.
    fn resolve_orphans(&mut self) -> usize {
        let pending = std::mem::take(&mut self.orphans);
        let mut resolved = 0;
        for id in pending {
            if !self.services.contains_key(&id) {
                continue;
            }
            if !self.adoptable(&id) {
                self.orphans.push(id);
                continue;
            }
            self.attach(&id);
            debug!(service = %id, "orphan attached");
            resolved += 1;
        }
        resolved
    }

    /// Whether an unlinked node's declared parent can take it right now.
    fn adoptable(&self, id: &str) -> bool {
        match self.services.get(id).and_then(|node| node.snapshot().parent_id()) {
            Some(parent) => self.can_adopt(parent, id),
            None => true,
        }
    }

    /// Whether `parent` exists and linking `child` under it keeps the forest acyclic.
    fn can_adopt(&self, parent: &str, child: &str) -> bool {
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return false;
            }
            let Some(node) = self.services.get(id) else {
                return id != parent;
            };
            cursor = node.parent();
        }
        true
    }

    /// Re-link `child` under `parent`, or make it a root when `parent` is `None`.
    ///
    /// Returns `false` (and changes nothing) when either id is unknown or the
    /// link would form a cycle. The next snapshot of `child` re-links it by its
    /// declared parent.
    pub fn set_parent(&mut self, child: &str, parent: Option<&str>) -> bool {
        if !self.services.contains_key(child) {
            return false;
        }
        match parent {
            None => {
                self.unlink(child);
                self.link_root(child);
            }
            Some(parent) => {
                if !self.can_adopt(parent, child) {
                    return false;
                }
                self.unlink(child);
                self.link_child(parent, child);
            }
        }
        true
    }

    fn link_root(&mut self, id: &str) {
        if let Some(node) = self.services.get_mut(id) {
            node.parent = None;
            node.orphan = false;
        }
        self.roots.push(id.to_owned());
        sort_by_name(&mut self.roots, &self.services);
        self.assign_depths(id, 0);
        self.touch(id);
    }

    fn link_child(&mut self, parent: &str, id: &str) {
        if let Some(node) = self.services.get_mut(id) {
            node.parent = Some(parent.to_owned());
            node.orphan = false;
        }
        self.add_child(parent, id);
        let depth = self.services.get(parent).map_or(0, |p| p.depth + 1);
        self.assign_depths(id, depth);
        self.touch(id);
    }

    fn link_orphan(&mut self, id: &str, parent: &str) {
        if let Some(node) = self.services.get_mut(id) {
            node.parent = None;
            node.orphan = true;
        }
        debug!(service = %id, %parent, "parent not known yet, holding as orphan");
        self.orphans.push(id.to_owned());
        self.assign_depths(id, 0);
        self.touch(id);
    }

    /// Remove `id` from wherever it is currently listed.
    fn unlink(&mut self, id: &str) {
        let Some(node) = self.services.get_mut(id) else {
            return;
        };
        let parent = node.parent.take();
        let was_orphan = std::mem::replace(&mut node.orphan, false);
        match parent {
            Some(parent) => self.remove_child(&parent, id),
            None if was_orphan => self.orphans.retain(|o| o != id),
            None => self.roots.retain(|r| r != id),
        }
    }

    /// Insert `child` into `parent`'s children; a no-op when already listed.
    fn add_child(&mut self, parent: &str, child: &str) {
        let Some(node) = self.services.get_mut(parent) else {
            return;
        };
        if node.children.iter().any(|c| c == child) {
            return;
        }
        let mut children = std::mem::take(&mut node.children);
        children.push(child.to_owned());
        sort_by_name(&mut children, &self.services);
        if let Some(node) = self.services.get_mut(parent) {
            node.children = children;
        }
        self.touch(parent);
    }

    /// Drop `child` from `parent`'s children. The parent is invalidated either way.
    fn remove_child(&mut self, parent: &str, child: &str) {
        if let Some(node) = self.services.get_mut(parent) {
            node.children.retain(|c| c != child);
        }
        self.touch(parent);
    }

    /// Re-sort the list `id` lives in after its name changed.
    fn resort_siblings(&mut self, id: &str) {
        let Some(node) = self.services.get(id) else {
            return;
        };
        match (node.parent.clone(), node.orphan) {
            (Some(parent), _) => {
                let Some(p) = self.services.get_mut(&parent) else {
                    return;
                };
                let mut children = std::mem::take(&mut p.children);
                sort_by_name(&mut children, &self.services);
                if let Some(p) = self.services.get_mut(&parent) {
                    p.children = children;
                }
            }
            (None, false) => sort_by_name(&mut self.roots, &self.services),
            (None, true) => {}
        }
    }

    /// Invalidate `id` and every ancestor.
    ///
    /// This is what a bare `update()` does: kinds are re-derived and all
    /// memoized views flagged dirty, because ancestor views aggregate over
    /// descendants.
    pub fn touch(&mut self, id: &str) {
        let mut cursor = Some(id.to_owned());
        while let Some(current) = cursor {
            let Some(node) = self.services.get_mut(&current) else {
                break;
            };
            node.refresh();
            cursor = node.parent.clone();
        }
    }

    /// Set `depth` on `id` and renumber its subtree below it.
    fn assign_depths(&mut self, id: &str, depth: usize) {
        let mut stack = vec![(id.to_owned(), depth)];
        while let Some((current, depth)) = stack.pop() {
            if let Some(node) = self.services.get_mut(&current) {
                node.depth = depth;
                stack.extend(node.children.iter().map(|child| (child.clone(), depth + 1)));
            }
        }
    }

    /// Renumber every depth from the roots (and orphans) down.
    ///
    /// Linking operations already keep depths current for the subtree they
    /// touch; this full walk yields the same values.
    pub fn recompute_depths(&mut self) {
        let tops: Vec<ServiceId> = self.roots.iter().chain(&self.orphans).cloned().collect();
        for id in tops {
            self.assign_depths(&id, 0);
        }
    }

    /// Remove a service. Its children become orphans.
    pub fn remove(&mut self, id: &str) -> Option<ServiceNode> {
        self.unlink(id);
        let node = self.services.remove(id)?;
        for child in node.children() {
            if let Some(c) = self.services.get_mut(child) {
                c.parent = None;
                c.orphan = true;
                self.orphans.push(child.clone());
            }
            self.assign_depths(child, 0);
            self.touch(child);
        }
        Some(node)
    }

    /// Remove every service whose id is not in `keep`. Returns the removed ids, sorted.
    pub fn prune_absent(&mut self, keep: &HashSet<ServiceId>) -> Vec<ServiceId> {
        let mut gone: Vec<ServiceId> = self
            .services
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        gone.sort();
        for id in &gone {
            self.remove(id);
        }
        gone
    }

    /// Optimistically record a requested run state. Returns `false` for unknown ids.
    pub(crate) fn set_desired_state(&mut self, id: &str, state: DesiredState) -> bool {
        match self.services.get_mut(id) {
            Some(node) => {
                node.set_desired_state(state);
                true
            }
            None => false,
        }
    }

    /// Transitive descendants of `id`, pre-order, `id` excluded.
    ///
    /// Memoized per node until the node or one of its descendants changes.
    pub fn descendants(&mut self, id: &str) -> Option<Arc<[ServiceId]>> {
        let node = self.services.get(id)?;
        if let Some(DerivedView::Descendants(view)) = node.cache.get_if_clean(&ViewSlot::Descendants)
        {
            return Some(Arc::clone(view));
        }
        let children = node.children.clone();
        let mut out = Vec::new();
        for child in &children {
            out.push(child.clone());
            if let Some(below) = self.descendants(child) {
                out.extend(below.iter().cloned());
            }
        }
        let view: Arc<[ServiceId]> = out.into();
        self.services.get_mut(id)?.cache.cache(
            ViewSlot::Descendants,
            DerivedView::Descendants(Arc::clone(&view)),
        );
        Some(view)
    }

    /// Endpoint addresses of the descendants of `id`, then of `id` itself.
    pub fn addresses(&mut self, id: &str) -> Option<Arc<[AddressView]>> {
        let node = self.services.get(id)?;
        if let Some(DerivedView::Addresses(view)) = node.cache.get_if_clean(&ViewSlot::Addresses) {
            return Some(Arc::clone(view));
        }
        let view: Arc<[AddressView]> = self.fold_subtree(id, addresses_of)?.into();
        self.services
            .get_mut(id)?
            .cache
            .cache(ViewSlot::Addresses, DerivedView::Addresses(Arc::clone(&view)));
        Some(view)
    }

    /// Virtual hosts of the descendants of `id`, then of `id` itself.
    pub fn hosts(&mut self, id: &str) -> Option<Arc<[VirtualHostView]>> {
        let node = self.services.get(id)?;
        if let Some(DerivedView::Hosts(view)) = node.cache.get_if_clean(&ViewSlot::Hosts) {
            return Some(Arc::clone(view));
        }
        let view: Arc<[VirtualHostView]> = self.fold_subtree(id, hosts_of)?.into();
        self.services
            .get_mut(id)?
            .cache
            .cache(ViewSlot::Hosts, DerivedView::Hosts(Arc::clone(&view)));
        Some(view)
    }

    fn fold_subtree<T>(
        &mut self,
        id: &str,
        extract: impl Fn(&ServiceSnapshot) -> Vec<T>,
    ) -> Option<Vec<T>> {
        let descendants = self.descendants(id)?;
        let mut out = Vec::new();
        for member in descendants.iter().map(String::as_str).chain([id]) {
            if let Some(node) = self.services.get(member) {
                let snapshot: &ServiceSnapshot = node.snapshot();
                out.extend(extract(snapshot));
            }
        }
        Some(out)
    }
}

/// Stable, case-insensitive sort of ids by service name.
fn sort_by_name(ids: &mut [ServiceId], services: &HashMap<ServiceId, ServiceNode>) {
    ids.sort_by_cached_key(|id| {
        services
            .get(id)
            .map(|node| node.name().to_lowercase())
            .unwrap_or_default()
    });
}
