//! Configuration types for kvbridge
//!
//! This module defines the configuration structures read by hosts of the
//! engine. Every section has defaults, so an empty or missing file is valid.

use crate::error::{Error, Result};
use crate::types::DEFAULT_PARTITION;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for kvbridge
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Durable backend configuration
    pub storage: StorageConfig,
    /// Replication queue configuration
    pub queue: QueueConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file yields the defaults; a file that exists but does not
    /// parse is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents).map_err(|reason| Error::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> std::result::Result<Self, String> {
        toml::from_str(contents).map_err(|e| e.to_string())
    }
}

/// Which durable backend implementation to open
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// redb file per backend name under `data_dir`
    #[default]
    Redb,
    /// In-process, lost at exit
    Memory,
}

/// Durable backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend implementation
    pub backend: BackendKind,
    /// Directory holding backend files
    pub data_dir: PathBuf,
    /// Backend identity (database name)
    pub name: String,
    /// Partition within the backend
    pub partition: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Redb,
            data_dir: PathBuf::from("./kvbridge-data"),
            name: "kvbridge".to_string(),
            partition: DEFAULT_PARTITION.to_string(),
        }
    }
}

/// Replication queue configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Pending depth above which a backpressure warning is logged
    ///
    /// Synchronous writers are never refused; this is a signal only.
    pub high_water_mark: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            high_water_mark: 1024,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.storage.backend, BackendKind::Redb);
        assert_eq!(config.storage.partition, "kvbridge");
        assert_eq!(config.queue.high_water_mark, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BridgeConfig::from_toml(
            r#"
            [storage]
            backend = "memory"
            name = "panel"

            [queue]
            high_water_mark = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert_eq!(config.storage.name, "panel");
        assert_eq!(config.storage.partition, "kvbridge");
        assert_eq!(config.queue.high_water_mark, 8);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.storage.name, "kvbridge");
    }

    #[test]
    fn test_load_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[storage\nname = ").unwrap();
        let err = BridgeConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }
}
