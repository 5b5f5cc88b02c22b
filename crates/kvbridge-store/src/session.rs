//! Ephemeral session store capability
//!
//! A synchronous byte store whose contents live exactly as long as the
//! hosting session. It is never shared across processes.

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Synchronous, session-scoped byte store
pub trait EphemeralStore: Send + Sync {
    /// Raw bytes stored under `key`
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Replace the bytes stored under `key`
    fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;
}

/// In-process session store.
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    available: AtomicBool,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the session store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn ensure_available(&self) -> StoreResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("session store disabled".to_string()));
        }
        Ok(())
    }
}

impl EphemeralStore for MemorySessionStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_available()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.ensure_available()?;
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let store = MemorySessionStore::new();
        assert!(store.get("k").unwrap().is_none());
        store.set("k", b"v".to_vec()).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unavailable() {
        let store = MemorySessionStore::new();
        store.set_available(false);
        assert!(matches!(
            store.set("k", Vec::new()),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.get("k").is_err());
        assert!(store.is_empty());
    }
}
