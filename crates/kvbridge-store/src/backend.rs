//! Durable backend capability
//!
//! A durable backend is a named database holding partitions of
//! string key/value entries. Each method is its own transaction; nothing
//! spans two calls.

use crate::error::StoreResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Handle to an open durable backend
#[async_trait]
pub trait DurableBackend: Send + Sync {
    /// Backend identity (database name)
    fn name(&self) -> &str;

    /// Check whether `partition` exists
    fn has_partition(&self, partition: &str) -> StoreResult<bool>;

    /// All keys in `partition`, in the backend's iteration order
    async fn get_all_keys(&self, partition: &str) -> StoreResult<Vec<String>>;

    /// All values in `partition`, in the same order as [`get_all_keys`]
    ///
    /// [`get_all_keys`]: DurableBackend::get_all_keys
    async fn get_all_values(&self, partition: &str) -> StoreResult<Vec<String>>;

    /// Every entry of `partition`, read from a single snapshot
    async fn get_all_entries(&self, partition: &str) -> StoreResult<Vec<(String, String)>>;

    /// Store `value` under `key`
    async fn put(&self, partition: &str, key: &str, value: &str) -> StoreResult<()>;

    /// Remove `key`; removing an absent key succeeds
    async fn delete(&self, partition: &str, key: &str) -> StoreResult<()>;

    /// Remove every entry in `partition`
    async fn clear(&self, partition: &str) -> StoreResult<()>;

    /// Release the connection; later calls fail with `StoreError::Closed`
    fn close(&self);
}

/// Opens backends by name, creating the database and partition if absent
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, name: &str, partition: &str) -> StoreResult<Arc<dyn DurableBackend>>;
}
