// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Row types for the aggregated derived views and the per-service extractors
//! that feed them.

use serde::Serialize;

use crate::snapshot::{ServiceId, ServiceSnapshot};

/// An assigned endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressView {
    /// Assignment id.
    pub id: String,
    /// `static` or `virtual`.
    pub assignment_type: String,
    /// Endpoint the address belongs to.
    pub endpoint_name: String,
    /// Host carrying the address.
    pub host_id: String,
    /// Resource pool of the host.
    pub pool_id: String,
    /// IP address.
    pub ip_addr: String,
    /// Configured port, as reported.
    pub port: i64,
    /// Owning service id.
    pub service_id: ServiceId,
    /// Owning service name.
    pub service_name: String,
}

/// A virtual host routed to a service endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualHostView {
    /// Virtual host name.
    pub name: String,
    /// Owning service name.
    pub application: String,
    /// Endpoint application the host routes to.
    pub service_endpoint: String,
    /// Owning service id.
    pub application_id: ServiceId,
    /// `"<service> - <endpoint>"` label.
    pub value: String,
}

/// Addresses contributed by a single service.
///
/// An endpoint counts only when it has a positive port and a protocol.
pub(crate) fn addresses_of(snapshot: &ServiceSnapshot) -> Vec<AddressView> {
    snapshot
        .endpoints()
        .into_iter()
        .filter_map(|ep| {
            let config = ep.address_config?;
            if config.port <= 0 || config.protocol.is_empty() {
                return None;
            }
            let assignment = ep.address_assignment.unwrap_or_default();
            Some(AddressView {
                id: assignment.id,
                assignment_type: assignment.assignment_type,
                endpoint_name: assignment.endpoint_name,
                host_id: assignment.host_id,
                pool_id: assignment.pool_id,
                ip_addr: assignment.ip_addr,
                port: config.port,
                service_id: snapshot.id.clone(),
                service_name: snapshot.name.clone(),
            })
        })
        .collect()
}

/// Virtual hosts contributed by a single service.
pub(crate) fn hosts_of(snapshot: &ServiceSnapshot) -> Vec<VirtualHostView> {
    snapshot
        .endpoints()
        .into_iter()
        .flat_map(|ep| {
            let application = ep.application;
            ep.vhosts
                .unwrap_or_default()
                .into_iter()
                .map(move |vhost| VirtualHostView {
                    name: vhost,
                    application: snapshot.name.clone(),
                    service_endpoint: application.clone(),
                    application_id: snapshot.id.clone(),
                    value: format!("{} - {}", snapshot.name, application),
                })
        })
        .collect()
}
