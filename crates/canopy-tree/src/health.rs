// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Health aggregation contract and status attachment.
//!
//! The health signal is computed elsewhere. An aggregator sees the whole store
//! and answers with statuses keyed either by service id (`"<id>"`) or by
//! running instance (`"<id>.<instance>"`).

use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::HealthError;
use crate::store::TreeStore;

/// Summarized health of a service or instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Should be running and every check passes.
    Good,
    /// Should be running and a check fails.
    Bad,
    /// Checks are missing or stale.
    Unknown,
    /// Intentionally stopped.
    Disabled,
}

/// Statuses keyed by `"<serviceId>"` or `"<serviceId>.<instanceId>"`.
pub type HealthMap = HashMap<String, HealthStatus>;

/// External producer of health statuses.
pub trait HealthAggregator {
    /// Compute statuses for the services currently held by `store`.
    fn statuses(
        &self,
        store: &TreeStore,
    ) -> impl Future<Output = Result<HealthMap, HealthError>> + Send;
}

/// Aggregator that never reports anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHealth;

impl HealthAggregator for NoHealth {
    async fn statuses(&self, _store: &TreeStore) -> Result<HealthMap, HealthError> {
        Ok(HealthMap::new())
    }
}

/// Outcome of [`attach_statuses`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachReport {
    /// Statuses written onto services.
    pub services: usize,
    /// Statuses written onto running instances.
    pub instances: usize,
    /// Keys that matched nothing.
    pub unmatched: usize,
}

/// Write each status onto the service or instance its key names.
///
/// A bare key that names a service wins over the composite reading. Keys that
/// match nothing are counted and otherwise ignored.
pub fn attach_statuses(store: &mut TreeStore, statuses: HealthMap) -> AttachReport {
    let mut report = AttachReport::default();
    for (key, status) in statuses {
        if let Some(node) = store.get_mut(&key) {
            node.set_status(status);
            report.services += 1;
            continue;
        }
        let composite = key
            .split_once('.')
            .and_then(|(service_id, ordinal)| Some((service_id, ordinal.parse::<u64>().ok()?)));
        let target = match composite {
            Some((service_id, ordinal)) => store.get_mut(service_id).and_then(|node| {
                node.instances_mut()
                    .iter_mut()
                    .find(|instance| instance.instance_id == ordinal)
            }),
            None => None,
        };
        match target {
            Some(instance) => {
                instance.status = Some(status);
                report.instances += 1;
            }
            None => {
                trace!(%key, "health key matched nothing");
                report.unmatched += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::snapshot::{ServiceInstance, ServiceSnapshot};

    fn store_with_instances() -> TreeStore {
        let mut store = TreeStore::new();
        store.apply_snapshots(vec![ServiceSnapshot::new("a", "A")]);
        store
            .get_mut("a")
            .unwrap()
            .merge_instances(vec![ServiceInstance::new("r0", 0), ServiceInstance::new("r1", 1)]);
        store
    }

    #[test]
    fn bare_keys_land_on_services() {
        let mut store = store_with_instances();
        let report = attach_statuses(&mut store, HealthMap::from([("a".into(), HealthStatus::Bad)]));
        assert_eq!(report.services, 1);
        assert_eq!(store.get("a").unwrap().status(), Some(HealthStatus::Bad));
    }

    #[test]
    fn composite_keys_land_on_instances_by_ordinal() {
        let mut store = store_with_instances();
        let report = attach_statuses(
            &mut store,
            HealthMap::from([("a.1".into(), HealthStatus::Good)]),
        );
        assert_eq!(report.instances, 1);
        let node = store.get("a").unwrap();
        assert_eq!(node.instances()[1].status, Some(HealthStatus::Good));
        assert_eq!(node.instances()[0].status, None);
        assert_eq!(node.status(), None);
    }

    #[test]
    fn unmatched_keys_are_ignored() {
        let mut store = store_with_instances();
        let report = attach_statuses(
            &mut store,
            HealthMap::from([
                ("ghost".into(), HealthStatus::Bad),
                ("a.9".into(), HealthStatus::Bad),
                ("a.x".into(), HealthStatus::Bad),
                ("ghost.0".into(), HealthStatus::Bad),
            ]),
        );
        assert_eq!(report.unmatched, 4);
        assert_eq!(report.services + report.instances, 0);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&HealthStatus::Disabled).unwrap(), "\"disabled\"");
    }
}
