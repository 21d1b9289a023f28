// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Server-supplied service records.
//!
//! The orchestrator sends services as JSON objects with PascalCase keys. Only
//! the fields the tree needs are typed; everything else rides along verbatim in
//! the attribute bag so nothing the server sent is lost.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SnapshotError;
use crate::health::HealthStatus;

/// Stable service identifier.
pub type ServiceId = String;

/// Run state a service is asked to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum DesiredState {
    /// Running (`1`).
    Start,
    /// Stopped (`0`).
    #[default]
    Stop,
    /// Restart requested (`-1`).
    Restart,
}

impl TryFrom<i64> for DesiredState {
    type Error = String;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Self::Start),
            0 => Ok(Self::Stop),
            -1 => Ok(Self::Restart),
            other => Err(format!("unknown desired state {other}")),
        }
    }
}

impl From<DesiredState> for i64 {
    fn from(state: DesiredState) -> Self {
        match state {
            DesiredState::Start => 1,
            DesiredState::Stop => 0,
            DesiredState::Restart => -1,
        }
    }
}

/// Immutable record of one service as last reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// Unique id.
    #[serde(rename = "ID")]
    pub id: ServiceId,
    /// Display name.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Parent id; `None` or empty means top-level.
    #[serde(rename = "ParentServiceID", default)]
    pub parent_service_id: Option<ServiceId>,
    /// Requested run state.
    #[serde(rename = "DesiredState", default)]
    pub desired_state: DesiredState,
    /// Every other attribute, untouched.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ServiceSnapshot {
    /// Minimal snapshot with an id and a name.
    pub fn new(id: impl Into<ServiceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_service_id: None,
            desired_state: DesiredState::default(),
            attributes: Map::new(),
        }
    }

    /// Builder: set the parent id.
    pub fn with_parent(mut self, parent: impl Into<ServiceId>) -> Self {
        self.parent_service_id = Some(parent.into());
        self
    }

    /// Builder: set an extra attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Parse one entry of a `/services` response.
    pub fn from_value(value: Value) -> Result<Self, SnapshotError> {
        let has_id = value
            .get("ID")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty());
        if !has_id {
            return Err(SnapshotError::MissingId);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Declared parent id, with the empty string read as "no parent".
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_service_id
            .as_deref()
            .filter(|parent| !parent.is_empty())
    }

    /// Startup command, if the service has one.
    pub fn startup(&self) -> Option<&str> {
        self.attributes
            .get("Startup")
            .and_then(Value::as_str)
            .filter(|cmd| !cmd.trim().is_empty())
    }

    /// Typed view of the `Endpoints` attribute. Entries that do not parse are skipped.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.attributes
            .get("Endpoints")
            .and_then(Value::as_array)
            .map(|raw| {
                raw.iter()
                    .filter_map(|ep| serde_json::from_value(ep.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One service endpoint, as far as the derived views need it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    /// Endpoint application name.
    #[serde(rename = "Application")]
    pub application: String,
    /// Virtual hosts routed to this endpoint.
    #[serde(rename = "VHosts")]
    pub vhosts: Option<Vec<String>>,
    /// Port/protocol configuration.
    #[serde(rename = "AddressConfig")]
    pub address_config: Option<AddressConfig>,
    /// Assigned address.
    #[serde(rename = "AddressAssignment")]
    pub address_assignment: Option<AddressAssignment>,
}

/// Port and protocol requested for an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AddressConfig {
    /// Port number; `0` or less means "no address".
    #[serde(rename = "Port")]
    pub port: i64,
    /// Transport protocol (`tcp`, `udp`).
    #[serde(rename = "Protocol")]
    pub protocol: String,
}

/// Address actually assigned to an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AddressAssignment {
    /// Assignment id.
    #[serde(rename = "ID")]
    pub id: String,
    /// `static` or `virtual`.
    #[serde(rename = "AssignmentType")]
    pub assignment_type: String,
    /// Endpoint the address belongs to.
    #[serde(rename = "EndpointName")]
    pub endpoint_name: String,
    /// Host carrying the address.
    #[serde(rename = "HostID")]
    pub host_id: String,
    /// Resource pool of the host.
    #[serde(rename = "PoolID")]
    pub pool_id: String,
    /// IP address.
    #[serde(rename = "IPAddr")]
    pub ip_addr: String,
}

/// One running instance of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique instance record id.
    #[serde(rename = "ID")]
    pub id: String,
    /// Ordinal of the instance within its service.
    #[serde(rename = "InstanceID", default)]
    pub instance_id: u64,
    /// Health attached after the last health pass.
    #[serde(skip)]
    pub status: Option<HealthStatus>,
    /// Every other attribute, untouched.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl ServiceInstance {
    /// Minimal instance record.
    pub fn new(id: impl Into<String>, instance_id: u64) -> Self {
        Self {
            id: id.into(),
            instance_id,
            status: None,
            attributes: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn parses_wire_record_and_keeps_unknown_attributes() {
        let snap = ServiceSnapshot::from_value(json!({
            "ID": "s1",
            "Name": "zope",
            "ParentServiceID": "app",
            "DesiredState": -1,
            "Startup": "runzope",
            "ImageID": "zenoss/core",
        }))
        .unwrap();
        assert_eq!(snap.id, "s1");
        assert_eq!(snap.parent_id(), Some("app"));
        assert_eq!(snap.desired_state, DesiredState::Restart);
        assert_eq!(snap.startup(), Some("runzope"));
        assert_eq!(snap.attributes.get("ImageID"), Some(&json!("zenoss/core")));
    }

    #[test]
    fn empty_parent_means_top_level() {
        let snap =
            ServiceSnapshot::from_value(json!({"ID": "a", "ParentServiceID": ""})).unwrap();
        assert_eq!(snap.parent_id(), None);
        let snap = ServiceSnapshot::from_value(json!({"ID": "a", "ParentServiceID": null})).unwrap();
        assert_eq!(snap.parent_id(), None);
    }

    #[test]
    fn missing_or_empty_id_is_rejected() {
        assert!(matches!(
            ServiceSnapshot::from_value(json!({"Name": "x"})),
            Err(SnapshotError::MissingId)
        ));
        assert!(matches!(
            ServiceSnapshot::from_value(json!({"ID": ""})),
            Err(SnapshotError::MissingId)
        ));
    }

    #[test]
    fn unknown_desired_state_is_malformed() {
        assert!(matches!(
            ServiceSnapshot::from_value(json!({"ID": "a", "DesiredState": 7})),
            Err(SnapshotError::Malformed(_))
        ));
    }

    #[test]
    fn endpoints_skip_entries_that_do_not_parse() {
        let snap = ServiceSnapshot::new("a", "A").with_attribute(
            "Endpoints",
            json!([
                {"Application": "http", "VHosts": ["zenoss"]},
                "garbage",
                {"Application": "db", "AddressConfig": {"Port": 3306, "Protocol": "tcp"}},
            ]),
        );
        let eps = snap.endpoints();
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].vhosts.as_deref(), Some(&["zenoss".to_string()][..]));
        assert_eq!(eps[1].address_config.as_ref().map(|c| c.port), Some(3306));
    }
}
