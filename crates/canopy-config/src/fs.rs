// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Settings files on disk: one `<key>.json` per key in a single directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::service::{ConfigError, ConfigStore};

/// [`ConfigStore`] over a directory of JSON files.
///
/// Saves are staged in `<key>.json.tmp` and renamed into place, so a reader
/// sees either the previous file or the new one.
pub struct FsConfigStore {
    dir: PathBuf,
}

impl FsConfigStore {
    /// Store in canopy's platform config dir (`~/.config/canopy` on Linux).
    pub fn new() -> Result<Self, ConfigError> {
        let dirs = ProjectDirs::from("dev", "flyingrobots", "canopy")
            .ok_or_else(|| ConfigError::Other("no home directory to keep settings in".into()))?;
        Self::at(dirs.config_dir())
    }

    /// Store in `dir`, creating it when needed.
    pub fn at(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the settings files.
    pub fn base(&self) -> &Path {
        &self.dir
    }

    /// Keys name files directly in the store dir; anything path-like is refused.
    fn file(&self, key: &str) -> Result<PathBuf, ConfigError> {
        if key.is_empty() || key.starts_with('.') || key.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!("bad settings key {key:?}")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        fs::read(self.file(key)?).map_err(|err| match err.kind() {
            ErrorKind::NotFound => ConfigError::NotFound,
            _ => ConfigError::Io(err),
        })
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.file(key)?;
        let staged = self.dir.join(format!("{key}.json.tmp"));
        fs::write(&staged, data)?;
        fs::rename(&staged, &path)?;
        Ok(())
    }
}
