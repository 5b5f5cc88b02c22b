//! Synchronous storage facade
//!
//! [`BridgedStorage`] exposes the familiar key/value contract (`get_item`,
//! `set_item`, `remove_item`, `clear`, `key`, `len`) with every call answered
//! from the session cache. Writes are applied to the cache first and then
//! queued for replication while the cache is still held, so the replication
//! order always matches the order the cache saw.

use crate::adapter::DurableAdapter;
use crate::bootstrap::{InitSequencer, LoadSignal, OpenRequest};
use crate::cache::SessionCache;
use crate::queue::OperationQueue;
use kvbridge_common::config::QueueConfig;
use kvbridge_common::{
    BridgeConfig, CacheBlob, DEFAULT_PARTITION, EngineState, LoadOutcome, PendingOperation,
    QueueStats, Result, cache_key,
};
use kvbridge_store::{BackendConnector, DurableBackend, EphemeralStore};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};

/// Engine construction options
#[derive(Clone, Debug)]
pub struct StorageOptions {
    /// Partition within the durable backend
    pub partition: String,
    /// Replication queue settings
    pub queue: QueueConfig,
    /// Runtime for background work; defaults to the current runtime
    pub runtime: Option<Handle>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            partition: DEFAULT_PARTITION.to_string(),
            queue: QueueConfig::default(),
            runtime: None,
        }
    }
}

impl StorageOptions {
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

impl From<&BridgeConfig> for StorageOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            partition: config.storage.partition.clone(),
            queue: config.queue.clone(),
            runtime: None,
        }
    }
}

/// Key/value store with synchronous reads and writes over an asynchronous
/// durable backend.
///
/// Cloning is cheap; clones share one engine.
///
/// # Panics
///
/// The constructors spawn background work and panic when called outside a
/// tokio runtime unless [`StorageOptions::runtime`] is set.
#[derive(Clone)]
pub struct BridgedStorage {
    backend_name: Arc<str>,
    cache: Arc<SessionCache>,
    adapter: Arc<DurableAdapter>,
    queue: Arc<OperationQueue>,
    sequencer: Arc<InitSequencer>,
    runtime: Handle,
}

impl BridgedStorage {
    /// Engine that opens (and later closes) the backend named `name`
    ///
    /// Returns immediately; the backend is opened in the background and
    /// writes made meanwhile are queued.
    pub fn open(
        name: impl Into<String>,
        connector: Arc<dyn BackendConnector>,
        session: Arc<dyn EphemeralStore>,
        options: StorageOptions,
    ) -> Self {
        let name = name.into();
        let adapter = DurableAdapter::owned(options.partition.clone());
        let open = OpenRequest {
            connector,
            name: name.clone(),
        };
        Self::start(name, adapter, Some(open), session, options)
    }

    /// Engine over an already opened backend
    ///
    /// Fails with a configuration error, before touching the session store,
    /// if the partition does not exist. The handle is never closed by the
    /// engine.
    pub fn with_handle(
        backend: Arc<dyn DurableBackend>,
        session: Arc<dyn EphemeralStore>,
        options: StorageOptions,
    ) -> Result<Self> {
        let name = backend.name().to_string();
        let adapter = DurableAdapter::external(backend, options.partition.clone())?;
        Ok(Self::start(name, adapter, None, session, options))
    }

    fn start(
        name: String,
        adapter: DurableAdapter,
        open: Option<OpenRequest>,
        session: Arc<dyn EphemeralStore>,
        options: StorageOptions,
    ) -> Self {
        let runtime = options.runtime.unwrap_or_else(Handle::current);
        let key = cache_key(&name, &options.partition);
        let adapter = Arc::new(adapter);
        let storage = Self {
            backend_name: name.into(),
            cache: Arc::new(SessionCache::new(session, key)),
            queue: OperationQueue::new(adapter.clone(), runtime.clone(), &options.queue),
            adapter,
            sequencer: Arc::new(InitSequencer::new()),
            runtime,
        };

        storage.sequencer.begin();
        let (sequencer, adapter, cache, queue) = (
            storage.sequencer.clone(),
            storage.adapter.clone(),
            storage.cache.clone(),
            storage.queue.clone(),
        );
        storage.runtime.spawn(async move {
            sequencer.run(open, &adapter, &cache, &queue).await;
        });

        info!(
            "Opened bridged storage '{}' ({})",
            storage.cache.key(),
            if storage.adapter.is_owned() { "owned" } else { "external" }
        );
        storage
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached value for `key`
    pub fn get_item(&self, key: &str) -> Option<String> {
        self.cache.read().get(key).cloned()
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn set_item(&self, key: impl ToString, value: impl ToString) {
        let (key, value) = (key.to_string(), value.to_string());
        let lock = self.cache.lock();
        let mut blob = lock.read();
        blob.insert(key.clone(), value.clone());
        lock.write(&blob);
        self.queue.enqueue(PendingOperation::Put { key, value });
    }

    /// Remove `key`; nothing is replicated if it was not cached
    pub fn remove_item(&self, key: &str) {
        let lock = self.cache.lock();
        let mut blob = lock.read();
        if blob.shift_remove(key).is_none() {
            debug!("remove of absent key '{}' ignored", key);
            return;
        }
        lock.write(&blob);
        self.queue.enqueue(PendingOperation::delete(key));
    }

    /// Remove every entry
    pub fn clear(&self) {
        let lock = self.cache.lock();
        lock.write(&CacheBlob::new());
        self.queue.enqueue(PendingOperation::Clear);
    }

    /// Key at position `index` in insertion order
    pub fn key(&self, index: i64) -> Option<String> {
        let index = usize::try_from(index).ok()?;
        self.cache.read().get_index(index).map(|(k, _)| k.clone())
    }

    /// Every cached key, in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.cache.read().into_keys().collect()
    }

    /// Snapshot of every cached entry
    pub fn entries(&self) -> CacheBlob {
        self.cache.read()
    }

    /// Replicate everything still queued, then close the backend if owned
    ///
    /// Returns the number of operations flushed.
    pub async fn flush_and_close(&self) -> usize {
        let flushed = self.queue.flush().await;
        self.adapter.close();
        info!(
            "Flushed {} operations and detached '{}'",
            flushed,
            self.cache.key()
        );
        flushed
    }

    /// Name of the durable backend
    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Ephemeral-store key holding the cached snapshot
    pub fn cache_key(&self) -> &str {
        self.cache.key()
    }

    pub fn is_owned(&self) -> bool {
        self.adapter.is_owned()
    }

    pub fn state(&self) -> EngineState {
        self.sequencer.state()
    }

    pub fn load_signal(&self) -> LoadSignal {
        self.sequencer.signal(self.runtime.clone())
    }

    /// Wait until the bootstrap load finished
    pub async fn wait_ready(&self) -> LoadOutcome {
        self.load_signal().wait().await
    }

    /// Wait until every queued write has been attempted
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Number of writes waiting for replication
    pub fn pending_operations(&self) -> usize {
        self.queue.pending()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}
