//! Core type definitions for kvbridge
//!
//! This module defines the data model shared by the store and engine
//! crates: the cached snapshot, replication operations and lifecycle states.

use indexmap::IndexMap;
use std::fmt;

/// Partition used when the caller does not name one
pub const DEFAULT_PARTITION: &str = "kvbridge";

/// Full snapshot of cached key/value pairs, in insertion order
pub type CacheBlob = IndexMap<String, String>;

/// Derive the ephemeral-store key holding the snapshot for one
/// (backend, partition) pair
#[must_use]
pub fn cache_key(backend: &str, partition: &str) -> String {
    format!("kvbridge:cache:{backend}:{partition}")
}

/// A mutation waiting to be replicated to the durable backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingOperation {
    /// Store `value` under `key`
    Put { key: String, value: String },
    /// Remove `key`
    Delete { key: String },
    /// Remove every entry in the partition
    Clear,
}

impl PendingOperation {
    /// Create a put operation
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a delete operation
    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    /// Short label for logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Delete { .. } => "delete",
            Self::Clear => "clear",
        }
    }

    /// Key touched by the operation, if any
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => Some(key),
            Self::Clear => None,
        }
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put { key, .. } => write!(f, "put '{key}'"),
            Self::Delete { key } => write!(f, "delete '{key}'"),
            Self::Clear => write!(f, "clear"),
        }
    }
}

/// Engine lifecycle state
///
/// `Ready` is terminal and is reached exactly once, whether or not the
/// initial load succeeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, bootstrap not started
    #[default]
    Uninitialized,
    /// Opening the backend and loading the durable snapshot
    Loading,
    /// Bootstrap finished, replication released
    Ready,
}

impl EngineState {
    /// Check if the engine reached its terminal state
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Result of the one-shot bootstrap
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The durable snapshot was merged into the cache
    Loaded {
        /// Number of durable entries merged
        entries: usize,
    },
    /// The backend could not be opened or read; the engine runs cache-only
    Degraded,
}

/// Replication queue state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueState {
    #[default]
    Idle,
    Draining,
}

/// Replication queue statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Current queue state
    pub state: QueueState,
    /// Operations waiting to run
    pub pending: usize,
    /// Operations that completed successfully
    pub completed: u64,
    /// Operations that failed and were discarded
    pub failed: u64,
    /// Operations dropped because no backend was attached
    pub skipped: u64,
}
