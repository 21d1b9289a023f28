// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! A single service in the mirrored tree.
//!
//! A [`ServiceNode`] wraps the latest immutable [`ServiceSnapshot`] plus the
//! mutable tree linkage the [`crate::TreeStore`] maintains for it. Linkage is
//! by id: the store owns every node, `parent` is a non-owning back reference,
//! and `children` lists ids kept in name order by the store.

use std::sync::Arc;

use crate::cache::CacheManager;
use crate::health::HealthStatus;
use crate::snapshot::{DesiredState, ServiceId, ServiceInstance, ServiceSnapshot};
use crate::views::{AddressView, VirtualHostView};

/// Memoized views held per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSlot {
    /// Transitive descendants, pre-order, self excluded.
    Descendants,
    /// Endpoint addresses of the subtree, self included.
    Addresses,
    /// Virtual hosts of the subtree, self included.
    Hosts,
}

impl ViewSlot {
    /// Every slot a node registers.
    pub const ALL: [ViewSlot; 3] = [ViewSlot::Descendants, ViewSlot::Addresses, ViewSlot::Hosts];
}

/// A computed view. Shared slices are never mutated after creation.
#[derive(Debug, Clone)]
pub enum DerivedView {
    /// See [`ViewSlot::Descendants`].
    Descendants(Arc<[ServiceId]>),
    /// See [`ViewSlot::Addresses`].
    Addresses(Arc<[AddressView]>),
    /// See [`ViewSlot::Hosts`].
    Hosts(Arc<[VirtualHostView]>),
}

/// Semantic tag of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Internal service of the orchestrator itself (id contains `isvc-`).
    Internal,
    /// Top-level application (attached root).
    App,
    /// Grouping service: has children but no startup command.
    Meta,
}

impl ServiceKind {
    const fn bit(self) -> u8 {
        match self {
            Self::Internal => 0b001,
            Self::App => 0b010,
            Self::Meta => 0b100,
        }
    }
}

/// Closed set of [`ServiceKind`] tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ServiceKinds(u8);

impl ServiceKinds {
    /// Empty set.
    pub const NONE: Self = Self(0);

    /// Add a tag.
    pub fn insert(&mut self, kind: ServiceKind) {
        self.0 |= kind.bit();
    }

    /// Whether `kind` is present.
    pub const fn contains(self, kind: ServiceKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether no tag is present.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One mirrored service with its tree linkage and memoized views.
#[derive(Debug, Clone)]
pub struct ServiceNode {
    id: ServiceId,
    name: String,
    snapshot: Arc<ServiceSnapshot>,
    desired_state: DesiredState,
    pub(crate) parent: Option<ServiceId>,
    pub(crate) children: Vec<ServiceId>,
    pub(crate) depth: usize,
    pub(crate) orphan: bool,
    kinds: ServiceKinds,
    pub(crate) cache: CacheManager<ViewSlot, DerivedView>,
    status: Option<HealthStatus>,
    instances: Vec<ServiceInstance>,
}

impl ServiceNode {
    /// Wrap a freshly received snapshot. The node starts unlinked with every view dirty.
    pub fn new(snapshot: ServiceSnapshot) -> Self {
        let mut node = Self {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            desired_state: snapshot.desired_state,
            snapshot: Arc::new(snapshot),
            parent: None,
            children: Vec::new(),
            depth: 0,
            orphan: false,
            kinds: ServiceKinds::NONE,
            cache: CacheManager::with_slots(ViewSlot::ALL),
            status: None,
            instances: Vec::new(),
        };
        node.refresh();
        node
    }

    /// Swap in a newer snapshot, re-reading id, name, and desired state.
    ///
    /// Views are marked dirty; ancestors are the store's concern.
    pub(crate) fn replace_snapshot(&mut self, snapshot: ServiceSnapshot) {
        self.id = snapshot.id.clone();
        self.name = snapshot.name.clone();
        self.desired_state = snapshot.desired_state;
        self.snapshot = Arc::new(snapshot);
        self.refresh();
    }

    /// Re-derive kinds and mark every view dirty.
    pub(crate) fn refresh(&mut self) {
        self.kinds = self.evaluate_kinds();
        self.cache.mark_all_dirty();
    }

    fn evaluate_kinds(&self) -> ServiceKinds {
        let mut kinds = ServiceKinds::NONE;
        if self.id.contains("isvc-") {
            kinds.insert(ServiceKind::Internal);
        }
        if self.parent.is_none() && !self.orphan {
            kinds.insert(ServiceKind::App);
        }
        if !self.children.is_empty() && self.snapshot.startup().is_none() {
            kinds.insert(ServiceKind::Meta);
        }
        kinds
    }

    /// Service id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest server record.
    pub fn snapshot(&self) -> &Arc<ServiceSnapshot> {
        &self.snapshot
    }

    /// Requested run state, possibly set optimistically ahead of the server.
    pub fn desired_state(&self) -> DesiredState {
        self.desired_state
    }

    pub(crate) fn set_desired_state(&mut self, state: DesiredState) {
        self.desired_state = state;
    }

    /// Attached parent, if any.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Child ids, ordered by name.
    pub fn children(&self) -> &[ServiceId] {
        &self.children
    }

    /// Distance from the top of its subtree.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Declared parent is not in the store.
    pub fn is_orphan(&self) -> bool {
        self.orphan
    }

    /// Semantic tags as of the last update.
    pub fn kinds(&self) -> ServiceKinds {
        self.kinds
    }

    /// Internal orchestrator service.
    pub fn is_internal(&self) -> bool {
        self.kinds.contains(ServiceKind::Internal)
    }

    /// Top-level application.
    pub fn is_app(&self) -> bool {
        self.kinds.contains(ServiceKind::App)
    }

    /// Grouping service without a startup command.
    pub fn is_meta(&self) -> bool {
        self.kinds.contains(ServiceKind::Meta)
    }

    /// Health attached by the last health pass.
    pub fn status(&self) -> Option<HealthStatus> {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: HealthStatus) {
        self.status = Some(status);
    }

    /// Running instances, ordered by instance number.
    pub fn instances(&self) -> &[ServiceInstance] {
        &self.instances
    }

    pub(crate) fn instances_mut(&mut self) -> &mut [ServiceInstance] {
        &mut self.instances
    }

    /// Whether any running instance is known.
    pub fn has_instances(&self) -> bool {
        !self.instances.is_empty()
    }

    /// Merge a fresh instance listing by record id.
    ///
    /// Known records are replaced but keep their attached status, new records
    /// are added, records absent from `fresh` are dropped.
    pub fn merge_instances(&mut self, fresh: Vec<ServiceInstance>) {
        let mut previous = std::mem::take(&mut self.instances);
        self.instances = fresh
            .into_iter()
            .map(|mut instance| {
                if let Some(pos) = previous.iter().position(|old| old.id == instance.id) {
                    let old = previous.swap_remove(pos);
                    if instance.status.is_none() {
                        instance.status = old.status;
                    }
                }
                instance
            })
            .collect();
        self.instances.sort_by_key(|instance| instance.instance_id);
    }

    /// Whether any memoized view is stale.
    pub fn is_dirty(&self) -> bool {
        self.cache.any_dirty()
    }

    /// Whether one memoized view is stale.
    pub fn is_view_dirty(&self, slot: ViewSlot) -> bool {
        self.cache.is_dirty(&slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_node_is_dirty_and_unlinked() {
        let node = ServiceNode::new(ServiceSnapshot::new("a", "A"));
        assert!(node.is_dirty());
        for slot in ViewSlot::ALL {
            assert!(node.is_view_dirty(slot));
        }
        assert_eq!(node.parent(), None);
        assert_eq!(node.depth(), 0);
        assert!(node.is_app());
    }

    #[test]
    fn internal_services_are_tagged_by_id() {
        let node = ServiceNode::new(ServiceSnapshot::new("isvc-elasticsearch", "es"));
        assert!(node.is_internal());
        assert!(!ServiceNode::new(ServiceSnapshot::new("abc", "x")).is_internal());
    }

    #[test]
    fn meta_requires_children_and_no_startup() {
        let mut node = ServiceNode::new(ServiceSnapshot::new("a", "A"));
        node.children.push("b".into());
        node.refresh();
        assert!(node.is_meta());

        node.replace_snapshot(
            ServiceSnapshot::new("a", "A").with_attribute("Startup", json!("/bin/run")),
        );
        assert!(!node.is_meta());
    }

    #[test]
    fn replace_snapshot_rereads_name_and_state() {
        let mut node = ServiceNode::new(ServiceSnapshot::new("a", "A"));
        node.set_desired_state(DesiredState::Start);
        let mut next = ServiceSnapshot::new("a", "A2");
        next.desired_state = DesiredState::Stop;
        node.replace_snapshot(next);
        assert_eq!(node.name(), "A2");
        assert_eq!(node.desired_state(), DesiredState::Stop);
    }

    #[test]
    fn merge_instances_keeps_status_drops_missing_and_sorts() {
        let mut node = ServiceNode::new(ServiceSnapshot::new("a", "A"));
        node.merge_instances(vec![ServiceInstance::new("x", 1), ServiceInstance::new("y", 0)]);
        node.instances_mut()[1].status = Some(HealthStatus::Good);

        node.merge_instances(vec![ServiceInstance::new("z", 2), ServiceInstance::new("x", 1)]);
        let ids: Vec<_> = node.instances().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["x", "z"]);
        assert_eq!(node.instances()[0].status, Some(HealthStatus::Good));
        assert!(node.has_instances());
    }
}
