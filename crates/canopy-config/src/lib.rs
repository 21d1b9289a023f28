// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Configuration for canopy tools: the watch settings model, a storage port for
//! raw config blobs, and a filesystem adapter rooted at the platform config dir.

pub mod fs;
pub mod service;
pub mod settings;

pub use fs::FsConfigStore;
pub use service::{ConfigError, ConfigService, ConfigStore, MemoryConfigStore};
pub use settings::WatchSettings;
