// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Settings for the service-tree watcher.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::service::ConfigError;

/// Polling and transport settings for a service-tree watcher.
///
/// Missing fields deserialize to their defaults, so a partial JSON file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Base URL of the orchestration API (no trailing path).
    pub base_url: String,
    /// Milliseconds between delta polls.
    pub poll_interval_ms: u64,
    /// Milliseconds added to every delta window to absorb clock and processing skew.
    pub safety_margin_ms: u64,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            poll_interval_ms: 3000,
            safety_margin_ms: 1000,
            request_timeout_ms: 10_000,
        }
    }
}

impl WatchSettings {
    /// Check that the settings describe a usable watcher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Poll period as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Safety margin as a [`Duration`].
    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
