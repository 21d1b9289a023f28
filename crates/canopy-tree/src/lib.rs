// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! canopy-tree: client-side mirror of an orchestrator's service tree.
//!
//! The server hands out flat service snapshots, each naming its parent by id.
//! [`TreeStore`] folds them into a forest (roots, children sorted by name,
//! orphans parked until their parent shows up) and memoizes derived views
//! (descendants, address assignments, virtual hosts) per node. Changing a node
//! invalidates its own views and those of every ancestor.
//!
//! [`SyncEngine`] drives the store from a [`Transport`] with time-windowed
//! delta requests, then lets a [`HealthAggregator`] annotate services and
//! instances. [`PollRegistry`] runs the engine on a timer.

mod cache;
mod error;
mod health;
mod http;
mod node;
mod poll;
mod snapshot;
mod store;
mod sync;
mod transport;
mod views;

/// Generic dirty-bit memo table.
pub use cache::CacheManager;
/// Error types for parsing, transport, health and sync.
pub use error::{HealthError, SnapshotError, SyncError, TransportError};
/// Health statuses and the aggregator port.
pub use health::{
    attach_statuses, AttachReport, HealthAggregator, HealthMap, HealthStatus, NoHealth,
};
/// HTTP implementation of [`Transport`].
pub use http::HttpTransport;
/// Tree nodes and their memoized views.
pub use node::{DerivedView, ServiceKind, ServiceKinds, ServiceNode, ViewSlot};
/// Named periodic polls.
pub use poll::PollRegistry;
/// Wire records.
pub use snapshot::{
    AddressAssignment, AddressConfig, DesiredState, Endpoint, ServiceId, ServiceInstance,
    ServiceSnapshot,
};
/// The service forest.
pub use store::{DeltaReport, TreeStore, TreeSummary};
/// Delta sync cycles.
pub use sync::{
    CycleOutcome, CycleReport, SyncEngine, SyncPhase, SyncTicket, DEFAULT_SAFETY_MARGIN,
};
/// Service API port.
pub use transport::{ServiceCommand, Transport};
/// Flattened view rows.
pub use views::{AddressView, VirtualHostView};
