// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use canopy_tree::{
    HealthAggregator, HealthError, HealthMap, ServiceCommand, TransportError, Transport, TreeStore,
};
use serde_json::{json, Value};

pub const A: &str = "123456";
pub const B: &str = "123457";
pub const C: &str = "123458";

/// Top-level service entry as the server sends it.
pub fn service(id: &str, name: &str) -> Value {
    json!({ "ID": id, "Name": name, "ParentServiceID": "", "DesiredState": 0 })
}

/// Child service entry.
pub fn child(id: &str, name: &str, parent: &str) -> Value {
    json!({ "ID": id, "Name": name, "ParentServiceID": parent, "DesiredState": 0 })
}

/// The three-service fixture: A and B at the top, C under B.
pub fn fixture() -> Vec<Value> {
    vec![
        service(A, "Service A"),
        service(B, "Service B"),
        child(C, "Service C", B),
    ]
}

/// Entry with one endpoint that carries an address and a virtual host.
pub fn with_endpoint(mut entry: Value, port: i64, ip: &str, vhost: &str) -> Value {
    entry["Endpoints"] = json!([{
        "Application": "web",
        "VHosts": [vhost],
        "AddressConfig": { "Port": port, "Protocol": "tcp" },
        "AddressAssignment": {
            "ID": format!("assign-{ip}"),
            "AssignmentType": "static",
            "EndpointName": "web",
            "HostID": "host-1",
            "PoolID": "default",
            "IPAddr": ip
        }
    }]);
    entry
}

/// Store loaded with [`fixture`].
pub fn fixture_store() -> TreeStore {
    let mut store = TreeStore::new();
    store.apply_delta(fixture());
    store
}

/// Ids of the top-level services in order.
pub fn root_ids(store: &TreeStore) -> Vec<&str> {
    store.root_ids().iter().map(String::as_str).collect()
}

/// Ids of the children of `id` in order.
pub fn child_ids<'a>(store: &'a TreeStore, id: &str) -> Vec<&'a str> {
    store.children_of(id).map(|node| node.id()).collect()
}

/// Transport answering from a script. `None` entries fail the call.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    services: Mutex<VecDeque<Option<Vec<Value>>>>,
    instances: Mutex<VecDeque<Vec<Value>>>,
    since: Mutex<Vec<u64>>,
    commands: Mutex<Vec<(String, ServiceCommand, bool)>>,
    fail_commands: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_commands() -> Self {
        Self {
            fail_commands: true,
            ..Self::default()
        }
    }

    pub fn respond(&self, entries: Vec<Value>) -> &Self {
        self.services.lock().unwrap().push_back(Some(entries));
        self
    }

    pub fn fail_next(&self) -> &Self {
        self.services.lock().unwrap().push_back(None);
        self
    }

    pub fn respond_instances(&self, entries: Vec<Value>) -> &Self {
        self.instances.lock().unwrap().push_back(entries);
        self
    }

    pub fn since_log(&self) -> Vec<u64> {
        self.since.lock().unwrap().clone()
    }

    pub fn command_log(&self) -> Vec<(String, ServiceCommand, bool)> {
        self.commands.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    async fn fetch_services(&self, since_ms: u64) -> Result<Vec<Value>, TransportError> {
        self.since.lock().unwrap().push(since_ms);
        match self.services.lock().unwrap().pop_front() {
            Some(Some(entries)) => Ok(entries),
            Some(None) => Err(TransportError::Unavailable("scripted failure".into())),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch_instances(&self, _service_id: &str) -> Result<Vec<Value>, TransportError> {
        Ok(self.instances.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn send_command(
        &self,
        service_id: &str,
        command: ServiceCommand,
        skip_children: bool,
    ) -> Result<(), TransportError> {
        self.commands
            .lock()
            .unwrap()
            .push((service_id.to_owned(), command, skip_children));
        if self.fail_commands {
            Err(TransportError::Status {
                status: 500,
                url: format!("/services/{service_id}/{}", command.action()),
            })
        } else {
            Ok(())
        }
    }
}

/// Health source that always answers with the same map, or always fails.
#[derive(Debug, Default)]
pub struct StaticHealth {
    pub statuses: HealthMap,
    pub fail: bool,
}

impl HealthAggregator for StaticHealth {
    async fn statuses(&self, _store: &TreeStore) -> Result<HealthMap, HealthError> {
        if self.fail {
            Err(HealthError::Source("scripted failure".into()))
        } else {
            Ok(self.statuses.clone())
        }
    }
}
