// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! [`Transport`] over HTTP with `reqwest`.

use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{ServiceCommand, Transport};

/// HTTP client for the orchestrator's REST API.
///
/// Cloning is cheap; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Client rooted at `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wrap an already configured client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the service listing for a given window.
    pub fn services_url(&self, since_ms: u64) -> String {
        if since_ms == 0 {
            format!("{}/services", self.base_url)
        } else {
            format!("{}/services?since={since_ms}", self.base_url)
        }
    }

    /// URL of a run-state command.
    pub fn command_url(&self, service_id: &str, command: ServiceCommand, skip_children: bool) -> String {
        let mut url = format!("{}/services/{service_id}/{}", self.base_url, command.action());
        if skip_children {
            url.push_str("?auto=false");
        }
        url
    }

    async fn get_list(&self, url: String) -> Result<Vec<Value>, TransportError> {
        debug!(%url, "GET");
        let response = checked(self.client.get(&url).send().await?, &url)?;
        decode_list(&response.bytes().await?)
    }
}

/// Decode a listing body; `null` is how the server spells an empty listing.
fn decode_list(body: &[u8]) -> Result<Vec<Value>, TransportError> {
    let list: Option<Vec<Value>> = serde_json::from_slice(body)?;
    Ok(list.unwrap_or_default())
}

fn checked(response: Response, url: &str) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status {
            status: status.as_u16(),
            url: url.to_owned(),
        })
    }
}

impl Transport for HttpTransport {
    async fn fetch_services(&self, since_ms: u64) -> Result<Vec<Value>, TransportError> {
        self.get_list(self.services_url(since_ms)).await
    }

    async fn fetch_instances(&self, service_id: &str) -> Result<Vec<Value>, TransportError> {
        self.get_list(format!("{}/services/{service_id}/running", self.base_url))
            .await
    }

    async fn send_command(
        &self,
        service_id: &str,
        command: ServiceCommand,
        skip_children: bool,
    ) -> Result<(), TransportError> {
        let url = self.command_url(service_id, command, skip_children);
        debug!(%url, "PUT");
        checked(self.client.put(&url).send().await?, &url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::with_client(Client::new(), "http://cc.local:8080/")
    }

    #[test]
    fn first_window_omits_since() {
        let t = transport();
        assert_eq!(t.services_url(0), "http://cc.local:8080/services");
        assert_eq!(t.services_url(4000), "http://cc.local:8080/services?since=4000");
    }

    #[test]
    fn null_listing_decodes_as_empty() {
        assert!(decode_list(b"null").unwrap().is_empty());
        assert_eq!(decode_list(br#"[{"ID": "a"}]"#).unwrap().len(), 1);
        assert!(matches!(decode_list(b"{}"), Err(TransportError::Decode(_))));
    }

    #[test]
    fn command_urls_follow_the_api() {
        let t = transport();
        assert_eq!(
            t.command_url("abc", ServiceCommand::Restart, false),
            "http://cc.local:8080/services/abc/restartService"
        );
        assert_eq!(
            t.command_url("abc", ServiceCommand::Stop, true),
            "http://cc.local:8080/services/abc/stopService?auto=false"
        );
    }
}
