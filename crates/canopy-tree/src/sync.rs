// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Delta synchronization of the [`TreeStore`] against the service API.
//!
//! A cycle asks the server for the services changed within a time window,
//! applies them, and then lets the health aggregator annotate the result:
//!
//! ```text
//! Idle ──begin_cycle──▶ Requesting ──complete_cycle──▶ Applying ──▶ Idle
//!                           │
//!                           └──abandon_cycle (transport failure)──▶ Idle
//! ```
//!
//! The first window (and the first one after [`SyncEngine::resync`]) is full:
//! `since = 0`. Later windows cover the time since the previous request plus
//! a safety margin. The clock advances when a request is *issued*, so a failed
//! cycle is not retried; the next window simply starts later.
//!
//! Ordering: [`SyncEngine::update`] borrows the engine mutably, so one engine
//! runs one cycle at a time. Callers that fetch outside the engine (to keep the
//! store readable while a request is in flight) use the split
//! `begin_cycle`/`complete_cycle` API; every ticket carries a sequence number
//! and results older than the last applied one are discarded.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::{HealthError, SyncError};
use crate::health::{attach_statuses, AttachReport, HealthAggregator};
use crate::snapshot::ServiceInstance;
use crate::store::{DeltaReport, TreeStore};
use crate::transport::{ServiceCommand, Transport};

/// Default padding added to every delta window.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_millis(1000);

/// Where the engine is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// No request outstanding.
    Idle,
    /// A request was issued and has not been answered.
    Requesting,
    /// A response is being folded into the store.
    Applying,
}

/// Handle for one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTicket {
    /// Issue order; strictly increasing per engine.
    pub seq: u64,
    /// Window sent to the server, in milliseconds (`0` = everything).
    pub since_ms: u64,
}

impl SyncTicket {
    /// Whether this request asked for the full service list.
    pub const fn is_full(self) -> bool {
        self.since_ms == 0
    }
}

/// What [`SyncEngine::complete_cycle`] did with a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The response was applied.
    Applied {
        /// Store changes.
        delta: DeltaReport,
        /// Services dropped because a full response no longer listed them.
        removed: Vec<String>,
    },
    /// A newer response had already been applied; this one was dropped.
    Stale,
}

/// Summary of one [`SyncEngine::update`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// The request that was issued.
    pub ticket: SyncTicket,
    /// What happened to the response.
    pub outcome: CycleOutcome,
    /// Health attachment, or `None` when the aggregator failed.
    pub health: Option<AttachReport>,
}

#[derive(Debug, Clone, Copy, Default)]
struct SyncWindow {
    last_request: Option<Instant>,
    next_seq: u64,
    last_applied: Option<u64>,
}

/// Keeps a [`TreeStore`] in step with the server.
pub struct SyncEngine<T, H> {
    transport: T,
    health: H,
    store: TreeStore,
    window: SyncWindow,
    phase: SyncPhase,
    margin: Duration,
}

impl<T, H> SyncEngine<T, H> {
    /// Engine with an empty store and the default safety margin.
    pub fn new(transport: T, health: H) -> Self {
        Self::with_margin(transport, health, DEFAULT_SAFETY_MARGIN)
    }

    /// Engine with an empty store and a custom safety margin.
    pub fn with_margin(transport: T, health: H, margin: Duration) -> Self {
        Self {
            transport,
            health,
            store: TreeStore::new(),
            window: SyncWindow::default(),
            phase: SyncPhase::Idle,
            margin,
        }
    }

    /// The mirrored tree, as of the last applied response.
    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    /// Mutable access, for derived-view reads.
    pub fn store_mut(&mut self) -> &mut TreeStore {
        &mut self.store
    }

    /// The transport, e.g. to clone it for a fetch outside the engine.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// When the last request was issued.
    pub fn last_request(&self) -> Option<Instant> {
        self.window.last_request
    }

    /// Make the next window full again. Services missing from that response are removed.
    pub fn resync(&mut self) {
        self.window.last_request = None;
    }

    /// Forget everything: empty store, fresh window.
    pub fn reset(&mut self) {
        self.store.reset();
        self.window = SyncWindow::default();
        self.phase = SyncPhase::Idle;
    }

    /// Issue a request at `now`: compute its window and advance the clock.
    pub fn begin_cycle(&mut self, now: Instant) -> SyncTicket {
        let since_ms = match self.window.last_request {
            None => 0,
            Some(previous) => {
                let elapsed = now.saturating_duration_since(previous) + self.margin;
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX).max(1)
            }
        };
        self.window.last_request = Some(now);
        let seq = self.window.next_seq;
        self.window.next_seq += 1;
        self.phase = SyncPhase::Requesting;
        SyncTicket { seq, since_ms }
    }

    /// The request behind `ticket` failed; nothing is applied.
    pub fn abandon_cycle(&mut self, ticket: SyncTicket) {
        warn!(seq = ticket.seq, since_ms = ticket.since_ms, "sync request failed");
        self.phase = SyncPhase::Idle;
    }

    /// Fold the response to `ticket` into the store.
    ///
    /// Responses to requests older than the last applied one are dropped. A
    /// full response also removes every service it does not list.
    pub fn complete_cycle(&mut self, ticket: SyncTicket, entries: Vec<Value>) -> CycleOutcome {
        if self.window.last_applied.is_some_and(|last| ticket.seq <= last) {
            warn!(seq = ticket.seq, "discarding out-of-order sync response");
            self.phase = SyncPhase::Idle;
            return CycleOutcome::Stale;
        }
        self.phase = SyncPhase::Applying;
        self.window.last_applied = Some(ticket.seq);

        let listed: Option<HashSet<String>> = ticket.is_full().then(|| {
            entries
                .iter()
                .filter_map(|entry| entry.get("ID").and_then(Value::as_str))
                .map(str::to_owned)
                .collect()
        });
        let delta = self.store.apply_delta(entries);
        let removed = match listed {
            Some(listed) if !self.store.is_empty() => {
                let removed = self.store.prune_absent(&listed);
                if !removed.is_empty() {
                    info!(count = removed.len(), "removed services missing from full refresh");
                }
                removed
            }
            _ => Vec::new(),
        };
        self.phase = SyncPhase::Idle;
        CycleOutcome::Applied { delta, removed }
    }

    /// Record a command's target state on the service ahead of confirmation.
    fn optimistic(&mut self, service_id: &str, command: ServiceCommand) -> Result<(), SyncError> {
        if self
            .store
            .set_desired_state(service_id, command.desired_state())
        {
            Ok(())
        } else {
            Err(SyncError::UnknownService(service_id.to_owned()))
        }
    }
}

impl<T, H> SyncEngine<T, H>
where
    T: Transport,
    H: HealthAggregator,
{
    /// Run one full cycle: request, apply, then attach health.
    ///
    /// Health failures are logged and do not fail the cycle.
    #[instrument(skip(self), level = "debug")]
    pub async fn update(&mut self) -> Result<CycleReport, SyncError> {
        let ticket = self.begin_cycle(Instant::now());
        let entries = match self.transport.fetch_services(ticket.since_ms).await {
            Ok(entries) => entries,
            Err(err) => {
                self.abandon_cycle(ticket);
                return Err(err.into());
            }
        };
        let outcome = self.complete_cycle(ticket, entries);
        let health = match self.refresh_health().await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(%err, "health update failed");
                None
            }
        };
        Ok(CycleReport {
            ticket,
            outcome,
            health,
        })
    }

    /// Ask the aggregator for statuses and attach them.
    pub async fn refresh_health(&mut self) -> Result<AttachReport, HealthError> {
        let statuses = self.health.statuses(&self.store).await?;
        Ok(attach_statuses(&mut self.store, statuses))
    }

    /// Re-read the running instances of one service. Returns how many are running.
    #[instrument(skip(self), level = "debug")]
    pub async fn refresh_instances(&mut self, service_id: &str) -> Result<usize, SyncError> {
        if !self.store.contains(service_id) {
            return Err(SyncError::UnknownService(service_id.to_owned()));
        }
        let entries = self.transport.fetch_instances(service_id).await?;
        let instances: Vec<ServiceInstance> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(instance) => Some(instance),
                Err(err) => {
                    warn!(%err, service = %service_id, "skipping instance entry");
                    None
                }
            })
            .collect();
        let node = self
            .store
            .get_mut(service_id)
            .ok_or_else(|| SyncError::UnknownService(service_id.to_owned()))?;
        node.merge_instances(instances);
        Ok(node.instances().len())
    }

    /// Send a run-state command.
    ///
    /// The desired state is set locally before the request goes out and is
    /// not rolled back on failure; the next sync carries the server's answer.
    #[instrument(skip(self), level = "debug")]
    pub async fn command(
        &mut self,
        service_id: &str,
        command: ServiceCommand,
        skip_children: bool,
    ) -> Result<(), SyncError> {
        self.optimistic(service_id, command)?;
        self.transport
            .send_command(service_id, command, skip_children)
            .await?;
        Ok(())
    }

    /// Start a service (and its children unless `skip_children`).
    pub async fn start(&mut self, service_id: &str, skip_children: bool) -> Result<(), SyncError> {
        self.command(service_id, ServiceCommand::Start, skip_children)
            .await
    }

    /// Stop a service (and its children unless `skip_children`).
    pub async fn stop(&mut self, service_id: &str, skip_children: bool) -> Result<(), SyncError> {
        self.command(service_id, ServiceCommand::Stop, skip_children)
            .await
    }

    /// Restart a service (and its children unless `skip_children`).
    pub async fn restart(&mut self, service_id: &str, skip_children: bool) -> Result<(), SyncError> {
        self.command(service_id, ServiceCommand::Restart, skip_children)
            .await
    }
}
