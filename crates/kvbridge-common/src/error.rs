//! Error types for kvbridge
//!
//! Only construction of an engine over a caller-owned backend can fail
//! synchronously. Everything that goes wrong on the durable side after that
//! is logged by the engine and never reaches a synchronous caller; these
//! variants exist so the failures can be named, logged and tested.

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for kvbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for kvbridge
#[derive(Debug, Error)]
pub enum Error {
    // Construction errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Background errors (logged, never surfaced to synchronous callers)
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("durable operation failed: {0}")]
    Operation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    // Host configuration errors
    #[error("invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create the error raised when a caller-owned backend lacks the partition
    pub fn missing_partition(backend: &str, partition: &str) -> Self {
        Self::Configuration(format!(
            "partition \"{partition}\" does not exist in backend \"{backend}\""
        ))
    }

    /// Create an initialization error
    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Create a durable operation error
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Check if this error is fatal to the engine instance that raised it
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ConfigInvalid { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
