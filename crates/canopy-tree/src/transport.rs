// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Port to the orchestrator's service API.

use std::future::Future;

use serde_json::Value;

use crate::error::TransportError;
use crate::snapshot::DesiredState;

/// Run-state command sent for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceCommand {
    /// Start the service.
    Start,
    /// Stop the service.
    Stop,
    /// Restart the service.
    Restart,
}

impl ServiceCommand {
    /// State the service is expected to reach once the command lands.
    pub const fn desired_state(self) -> DesiredState {
        match self {
            Self::Start => DesiredState::Start,
            Self::Stop => DesiredState::Stop,
            Self::Restart => DesiredState::Restart,
        }
    }

    /// Path segment of the command endpoint.
    pub const fn action(self) -> &'static str {
        match self {
            Self::Start => "startService",
            Self::Stop => "stopService",
            Self::Restart => "restartService",
        }
    }
}

/// Request/response access to the service API.
///
/// Responses are raw JSON entries; the tree parses them one by one so a single
/// bad entry cannot sink a batch.
pub trait Transport {
    /// `GET /services[?since=<ms>]`. A `since_ms` of `0` asks for every service.
    fn fetch_services(
        &self,
        since_ms: u64,
    ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send;

    /// `GET /services/{id}/running`: the running instances of one service.
    fn fetch_instances(
        &self,
        service_id: &str,
    ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send;

    /// `PUT /services/{id}/{action}[?auto=false]`.
    ///
    /// `skip_children` leaves child services alone.
    fn send_command(
        &self,
        service_id: &str,
        command: ServiceCommand,
        skip_children: bool,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
