//! Session cache
//!
//! The authoritative copy of the key space lives in the ephemeral session
//! store as a single JSON object. Every read parses the whole blob and every
//! write replaces it, so the cache has no in-process state besides the lock
//! serializing read-modify-write cycles.

use indexmap::IndexMap;
use kvbridge_common::CacheBlob;
use kvbridge_store::EphemeralStore;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

/// JSON snapshot of the key space stored under one ephemeral-store key
pub struct SessionCache {
    store: Arc<dyn EphemeralStore>,
    key: String,
    lock: Mutex<()>,
}

impl SessionCache {
    pub fn new(store: Arc<dyn EphemeralStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            lock: Mutex::new(()),
        }
    }

    /// Ephemeral-store key holding the blob
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current snapshot
    ///
    /// A missing, unreadable or malformed blob reads as empty.
    pub fn read(&self) -> CacheBlob {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheBlob::new(),
            Err(e) => {
                warn!("Session cache '{}' unreadable: {}", self.key, e);
                return CacheBlob::new();
            }
        };
        decode(&self.key, &raw)
    }

    /// Replace the stored snapshot; failures are logged and dropped
    pub fn write(&self, blob: &CacheBlob) {
        let raw = match serde_json::to_vec(blob) {
            Ok(raw) => raw,
            Err(e) => {
                error!("Failed to encode session cache '{}': {}", self.key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, raw) {
            error!("Failed to update session cache '{}': {}", self.key, e);
        }
    }

    /// Hold the cache for a read-modify-write cycle
    pub fn lock(&self) -> CacheLock<'_> {
        CacheLock {
            cache: self,
            _guard: self.lock.lock(),
        }
    }
}

/// Exclusive access to a [`SessionCache`]; released on drop
pub struct CacheLock<'a> {
    cache: &'a SessionCache,
    _guard: MutexGuard<'a, ()>,
}

impl CacheLock<'_> {
    pub fn read(&self) -> CacheBlob {
        self.cache.read()
    }

    pub fn write(&self, blob: &CacheBlob) {
        self.cache.write(blob);
    }
}

/// Parse a stored blob, keeping document order
fn decode(key: &str, raw: &[u8]) -> CacheBlob {
    match serde_json::from_slice::<IndexMap<String, Value>>(raw) {
        Ok(map) => map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect(),
        Err(e) => {
            warn!("Discarding malformed session cache '{}': {}", key, e);
            CacheBlob::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvbridge_store::MemorySessionStore;

    fn cache() -> (Arc<MemorySessionStore>, SessionCache) {
        let store = Arc::new(MemorySessionStore::new());
        let cache = SessionCache::new(store.clone(), "kvbridge:cache:app:kv");
        (store, cache)
    }

    #[test]
    fn test_missing_blob_reads_empty() {
        let (_, cache) = cache();
        assert!(cache.read().is_empty());
    }

    #[test]
    fn test_write_then_read_keeps_order() {
        let (_, cache) = cache();
        let mut blob = CacheBlob::new();
        blob.insert("z".to_string(), "1".to_string());
        blob.insert("a".to_string(), "2".to_string());
        cache.write(&blob);

        let keys: Vec<_> = cache.read().into_keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
    }

    #[test]
    fn test_malformed_blob_reads_empty() {
        let (store, cache) = cache();
        store.set(cache.key(), b"{not json".to_vec()).unwrap();
        assert!(cache.read().is_empty());

        store.set(cache.key(), b"[1, 2]".to_vec()).unwrap();
        assert!(cache.read().is_empty());
    }

    #[test]
    fn test_non_string_values_are_coerced() {
        let (store, cache) = cache();
        store
            .set(cache.key(), br#"{"n": 5, "b": true, "s": "x"}"#.to_vec())
            .unwrap();

        let blob = cache.read();
        assert_eq!(blob["n"], "5");
        assert_eq!(blob["b"], "true");
        assert_eq!(blob["s"], "x");
    }

    #[test]
    fn test_unavailable_store_is_tolerated() {
        let (store, cache) = cache();
        store.set_available(false);

        let mut blob = CacheBlob::new();
        blob.insert("k".to_string(), "v".to_string());
        cache.write(&blob);
        assert!(cache.read().is_empty());
    }

    #[test]
    fn test_lock_read_modify_write() {
        let (_, cache) = cache();
        {
            let lock = cache.lock();
            let mut blob = lock.read();
            blob.insert("k".to_string(), "v".to_string());
            lock.write(&blob);
        }
        assert_eq!(cache.read().get("k").map(String::as_str), Some("v"));
    }
}
