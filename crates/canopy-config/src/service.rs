// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Config storage port and the JSON service layered on top of it.

use std::cell::RefCell;
use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::settings::WatchSettings;

/// Key under which [`WatchSettings`] are persisted.
pub const WATCH_KEY: &str = "watch";

/// Where settings blobs live. Keys are short logical names such as [`WATCH_KEY`].
pub trait ConfigStore {
    /// Bytes stored under `key`, or [`ConfigError::NotFound`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replace whatever is stored under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Why settings could not be read or written.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing is stored under the key.
    #[error("no settings stored")]
    NotFound,
    /// The backing store failed.
    #[error("settings io: {0}")]
    Io(#[from] std::io::Error),
    /// The stored bytes are not the expected JSON.
    #[error("settings are not valid json: {0}")]
    Serde(#[from] serde_json::Error),
    /// Settings parsed but hold unusable values, or the key itself is unusable.
    #[error("invalid settings: {0}")]
    Invalid(String),
    /// Anything else, e.g. no config dir on this platform.
    #[error("{0}")]
    Other(String),
}

/// Typed access to a [`ConfigStore`]: values go in and out as pretty JSON.
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wrap `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The wrapped store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// The value under `key`; `None` when nothing (or an empty blob) is stored.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let bytes = match self.store.load_raw(key) {
            Ok(bytes) => bytes,
            Err(ConfigError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Store `value` under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        self.store.save_raw(key, &serde_json::to_vec_pretty(value)?)
    }

    /// Load the watch settings, falling back to defaults when none are stored.
    ///
    /// Stored settings are validated; defaults are not written back.
    pub fn load_watch(&self) -> Result<WatchSettings, ConfigError> {
        let settings = self.load::<WatchSettings>(WATCH_KEY)?.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }

    /// Persist the watch settings unless a copy is already stored.
    ///
    /// Returns `true` when the settings were written.
    pub fn save_watch_if_absent(&self, settings: &WatchSettings) -> Result<bool, ConfigError> {
        match self.store.load_raw(WATCH_KEY) {
            Ok(bytes) if !bytes.is_empty() => Ok(false),
            Ok(_) | Err(ConfigError::NotFound) => {
                self.save(WATCH_KEY, settings)?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

/// In-memory store, used by tests and by tools that run without a config dir.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    blobs: RefCell<HashMap<String, Vec<u8>>>,
}

impl MemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        self.blobs
            .borrow()
            .get(key)
            .cloned()
            .ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        self.blobs.borrow_mut().insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn missing_watch_settings_fall_back_to_defaults() {
        let config = ConfigService::new(MemoryConfigStore::new());
        let settings = config.load_watch().unwrap();
        assert_eq!(settings, WatchSettings::default());
    }

    #[test]
    fn saved_settings_round_trip_through_the_store() {
        let config = ConfigService::new(MemoryConfigStore::new());
        let settings = WatchSettings {
            base_url: "http://cc.example:8080".into(),
            poll_interval_ms: 5000,
            ..WatchSettings::default()
        };
        config.save(WATCH_KEY, &settings).unwrap();
        assert_eq!(config.load_watch().unwrap(), settings);
    }

    #[test]
    fn defaults_are_persisted_only_once() {
        let config = ConfigService::new(MemoryConfigStore::new());
        assert!(config.save_watch_if_absent(&WatchSettings::default()).unwrap());

        let other = WatchSettings {
            poll_interval_ms: 10,
            ..WatchSettings::default()
        };
        assert!(!config.save_watch_if_absent(&other).unwrap());
        assert_eq!(config.load_watch().unwrap(), WatchSettings::default());
    }

    #[test]
    fn invalid_stored_settings_are_rejected() {
        let store = MemoryConfigStore::new();
        store
            .save_raw(WATCH_KEY, br#"{"base_url":"","poll_interval_ms":3000}"#)
            .unwrap();
        let config = ConfigService::new(store);
        assert!(matches!(config.load_watch(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn garbage_blob_surfaces_serde_error() {
        let store = MemoryConfigStore::new();
        store.save_raw(WATCH_KEY, b"not json").unwrap();
        let config = ConfigService::new(store);
        assert!(matches!(config.load_watch(), Err(ConfigError::Serde(_))));
    }
}
