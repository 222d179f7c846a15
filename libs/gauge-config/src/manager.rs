//! Configuration loading and persistence
//!
//! One manager per process. The parsed tree is the only shared mutable
//! state and is guarded by a single mutex held just long enough to clone a
//! snapshot; no I/O ever happens under the lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::{ConfigError, Result};
use crate::types::GatewayConfig;

/// Process-local configuration holder
pub struct ConfigManager {
    path: PathBuf,
    inner: Mutex<GatewayConfig>,
}

impl ConfigManager {
    /// Load the document at `path`.
    ///
    /// A missing file is generated from defaults and persisted atomically;
    /// a file that fails to parse falls back to defaults and the process
    /// keeps running.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let config = match Self::read_file(&path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                config
            },
            Err(ConfigError::Io { .. }) if !path.exists() => {
                warn!(path = %path.display(), "config file missing, generating defaults");
                let config = GatewayConfig::default();
                if let Err(err) = Self::write_file(&path, &config) {
                    warn!(%err, "failed to persist default configuration");
                }
                config
            },
            Err(err) => {
                warn!(%err, path = %path.display(), "config load failed, using defaults");
                GatewayConfig::default()
            },
        };

        Self {
            path,
            inner: Mutex::new(config),
        }
    }

    /// Path of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clone a snapshot of the whole tree
    pub fn get(&self) -> GatewayConfig {
        self.inner.lock().expect("config mutex poisoned").clone()
    }

    /// Replace the in-memory tree
    pub fn set(&self, config: GatewayConfig) {
        *self.inner.lock().expect("config mutex poisoned") = config;
    }

    /// Re-read the backing document. On parse failure the in-memory tree is
    /// left untouched and `false` is returned.
    pub fn reload(&self) -> bool {
        match Self::read_file(&self.path) {
            Ok(config) => {
                self.set(config);
                true
            },
            Err(err) => {
                warn!(%err, path = %self.path.display(), "config reload failed, keeping current tree");
                false
            },
        }
    }

    /// Persist the in-memory tree atomically (temp file + rename) and keep
    /// a `.backup` copy of the result.
    pub fn save(&self) -> Result<()> {
        let snapshot = self.get();
        Self::write_file(&self.path, &snapshot)
    }

    fn read_file(path: &Path) -> Result<GatewayConfig> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write_file(path: &Path, config: &GatewayConfig) -> Result<()> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let text = serde_json::to_string_pretty(config)?;

        // Atomic replace: write sideways, then rename over the target
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, &text).map_err(io_err)?;
        fs::rename(&tmp_path, path).map_err(io_err)?;

        // Best-effort backup of the freshly written document
        let backup = path.with_extension("json.backup");
        if let Err(err) = fs::copy(path, &backup) {
            warn!(%err, "failed to write config backup");
        }

        info!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_generates_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("config.json");

        let manager = ConfigManager::load(&path);
        assert_eq!(manager.get().protocol.active, "modbus");

        // The defaults were persisted, plus the backup copy
        assert!(path.exists());
        assert!(path.with_extension("json.backup").exists());
    }

    #[test]
    fn test_roundtrip_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let manager = ConfigManager::load(&path);
        let mut config = manager.get();
        config.protocol.active = "s7".to_string();
        config.rs485.poll_rate_ms = 10;
        manager.set(config);
        manager.save().unwrap();

        let reread = ConfigManager::load(&path);
        assert_eq!(reread.get().protocol.active, "s7");
        assert_eq!(reread.get().rs485.poll_rate_ms, 10);
    }

    #[test]
    fn test_parse_failure_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ this is not json").unwrap();

        let manager = ConfigManager::load(&path);
        assert_eq!(manager.get().rs485.baudrate, 19200);
    }

    #[test]
    fn test_reload_keeps_tree_on_parse_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let manager = ConfigManager::load(&path);
        let mut config = manager.get();
        config.protocol.active = "opcua".to_string();
        manager.set(config);

        fs::write(&path, "garbage").unwrap();
        assert!(!manager.reload());
        assert_eq!(manager.get().protocol.active, "opcua");
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let manager = ConfigManager::load(&path);
        assert_eq!(manager.get().protocol.active, "modbus");

        let mut config = GatewayConfig::default();
        config.protocol.active = "s7".to_string();
        fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        assert!(manager.reload());
        assert_eq!(manager.get().protocol.active, "s7");
    }
}
