//! In-process durable backend
//!
//! Keeps partitions in memory for the lifetime of the process. Besides
//! serving short-lived hosts, it records every applied write and can inject
//! failures and latency, which is what the engine tests are built on.

use crate::backend::{BackendConnector, DurableBackend};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use kvbridge_common::PendingOperation;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Faults to inject into a [`MemoryBackend`]
#[derive(Debug, Default)]
struct FaultPlan {
    /// Fail get-all-keys / get-all-values
    fail_loads: bool,
    /// Fail puts for these keys
    fail_put_keys: HashSet<String>,
    /// Fail every put, delete and clear
    fail_writes: bool,
    /// Delay writes touching these keys
    latency: HashMap<String, Duration>,
}

/// Bound on the write log kept by [`MemoryBackend::applied`]
pub const APPLIED_LOG_CAPACITY: usize = 1024;

/// In-memory durable backend.
pub struct MemoryBackend {
    name: String,
    partitions: RwLock<HashMap<String, BTreeMap<String, String>>>,
    faults: Mutex<FaultPlan>,
    applied: Mutex<VecDeque<PendingOperation>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend with no partitions
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: RwLock::new(HashMap::new()),
            faults: Mutex::new(FaultPlan::default()),
            applied: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Builder-style partition creation
    #[must_use]
    pub fn with_partition(self, partition: &str) -> Self {
        self.create_partition(partition);
        self
    }

    /// Create `partition` if it does not exist yet
    pub fn create_partition(&self, partition: &str) {
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default();
    }

    /// Write an entry directly, bypassing fault injection and the write log
    pub fn seed(&self, partition: &str, key: &str, value: &str) {
        self.partitions
            .write()
            .entry(partition.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Current contents of `partition`
    pub fn snapshot(&self, partition: &str) -> BTreeMap<String, String> {
        self.partitions
            .read()
            .get(partition)
            .cloned()
            .unwrap_or_default()
    }

    /// Most recent successful writes, in completion order
    ///
    /// Holds at most [`APPLIED_LOG_CAPACITY`] entries; older ones are dropped.
    pub fn applied(&self) -> Vec<PendingOperation> {
        self.applied.lock().iter().cloned().collect()
    }

    /// Make every bulk read fail
    pub fn fail_loads(&self, fail: bool) {
        self.faults.lock().fail_loads = fail;
    }

    /// Make puts of `key` fail
    pub fn fail_put(&self, key: &str) {
        self.faults.lock().fail_put_keys.insert(key.to_string());
    }

    /// Make every write fail
    pub fn fail_writes(&self, fail: bool) {
        self.faults.lock().fail_writes = fail;
    }

    /// Delay writes touching `key` by `delay`
    pub fn set_latency(&self, key: &str, delay: Duration) {
        self.faults.lock().latency.insert(key.to_string(), delay);
    }

    /// Check if [`DurableBackend::close`] was called since the last open
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.is_closed() {
            return Err(StoreError::Closed(self.name.clone()));
        }
        Ok(())
    }

    fn missing(&self, partition: &str) -> StoreError {
        StoreError::MissingPartition {
            backend: self.name.clone(),
            partition: partition.to_string(),
        }
    }

    /// Apply injected latency and failures for a write touching `key`
    async fn before_write(&self, op: &PendingOperation) -> StoreResult<()> {
        let delay = {
            let faults = self.faults.lock();
            if faults.fail_writes {
                return Err(StoreError::Injected(format!("{op} rejected")));
            }
            if let PendingOperation::Put { key, .. } = op
                && faults.fail_put_keys.contains(key)
            {
                return Err(StoreError::Injected(format!("{op} rejected")));
            }
            op.key().and_then(|k| faults.latency.get(k).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn apply(&self, partition: &str, op: PendingOperation) -> StoreResult<()> {
        self.ensure_open()?;
        {
            let mut partitions = self.partitions.write();
            let entries = partitions
                .get_mut(partition)
                .ok_or_else(|| self.missing(partition))?;
            match &op {
                PendingOperation::Put { key, value } => {
                    entries.insert(key.clone(), value.clone());
                }
                PendingOperation::Delete { key } => {
                    entries.remove(key);
                }
                PendingOperation::Clear => entries.clear(),
            }
        }
        debug!("Applied {} to {}/{}", op, self.name, partition);
        let mut applied = self.applied.lock();
        if applied.len() == APPLIED_LOG_CAPACITY {
            applied.pop_front();
        }
        applied.push_back(op);
        Ok(())
    }

    fn read_partition<T>(
        &self,
        partition: &str,
        f: impl FnOnce(&BTreeMap<String, String>) -> T,
    ) -> StoreResult<T> {
        self.ensure_open()?;
        if self.faults.lock().fail_loads {
            return Err(StoreError::Injected(format!(
                "load of {}/{} rejected",
                self.name, partition
            )));
        }
        let partitions = self.partitions.read();
        let entries = partitions
            .get(partition)
            .ok_or_else(|| self.missing(partition))?;
        Ok(f(entries))
    }

    async fn write(&self, partition: &str, op: PendingOperation) -> StoreResult<()> {
        self.ensure_open()?;
        self.before_write(&op).await?;
        self.apply(partition, op)
    }
}

#[async_trait]
impl DurableBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_partition(&self, partition: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.partitions.read().contains_key(partition))
    }

    async fn get_all_keys(&self, partition: &str) -> StoreResult<Vec<String>> {
        self.read_partition(partition, |entries| entries.keys().cloned().collect())
    }

    async fn get_all_values(&self, partition: &str) -> StoreResult<Vec<String>> {
        self.read_partition(partition, |entries| entries.values().cloned().collect())
    }

    async fn get_all_entries(&self, partition: &str) -> StoreResult<Vec<(String, String)>> {
        self.read_partition(partition, |entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    async fn put(&self, partition: &str, key: &str, value: &str) -> StoreResult<()> {
        self.write(partition, PendingOperation::put(key, value)).await
    }

    async fn delete(&self, partition: &str, key: &str) -> StoreResult<()> {
        self.write(partition, PendingOperation::delete(key)).await
    }

    async fn clear(&self, partition: &str) -> StoreResult<()> {
        self.write(partition, PendingOperation::Clear).await
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Holds [`MemoryConnector::connect`] calls until released
#[derive(Clone)]
pub struct OpenGate {
    permits: Arc<Semaphore>,
}

impl OpenGate {
    /// Let pending and future connects proceed
    pub fn release(&self) {
        self.permits.close();
    }
}

/// Connector handing out process-wide [`MemoryBackend`]s by name.
#[derive(Default)]
pub struct MemoryConnector {
    backends: Mutex<HashMap<String, Arc<MemoryBackend>>>,
    fail_open: AtomicBool,
    gate: Option<OpenGate>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose connects block until the returned gate is released
    pub fn gated() -> (Self, OpenGate) {
        let gate = OpenGate {
            permits: Arc::new(Semaphore::new(0)),
        };
        let connector = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (connector, gate)
    }

    /// Make connects fail
    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Backend registered under `name`, created empty if absent
    pub fn backend(&self, name: &str) -> Arc<MemoryBackend> {
        self.backends
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryBackend::new(name)))
            .clone()
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect(&self, name: &str, partition: &str) -> StoreResult<Arc<dyn DurableBackend>> {
        if let Some(gate) = &self.gate {
            // The gate never holds permits; closing it wakes every waiter
            let _ = gate.permits.acquire().await;
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(StoreError::Injected(format!("open of {name} rejected")));
        }
        let backend = self.backend(name);
        backend.reopen();
        backend.create_partition(partition);
        Ok(backend as Arc<dyn DurableBackend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MemoryBackend::new("app").with_partition("kv");
        backend.put("kv", "b", "2").await.unwrap();
        backend.put("kv", "a", "1").await.unwrap();
        backend.delete("kv", "b").await.unwrap();

        assert_eq!(backend.get_all_keys("kv").await.unwrap(), vec!["a"]);
        assert_eq!(backend.get_all_values("kv").await.unwrap(), vec!["1"]);
        assert_eq!(
            backend.applied(),
            vec![
                PendingOperation::put("b", "2"),
                PendingOperation::put("a", "1"),
                PendingOperation::delete("b"),
            ]
        );
    }

    #[tokio::test]
    async fn test_applied_log_keeps_newest_writes() {
        let backend = MemoryBackend::new("app").with_partition("kv");
        let total = APPLIED_LOG_CAPACITY + 10;
        for i in 0..total {
            backend.put("kv", &format!("k{i}"), "v").await.unwrap();
        }

        let applied = backend.applied();
        assert_eq!(applied.len(), APPLIED_LOG_CAPACITY);
        assert_eq!(applied[0], PendingOperation::put("k10", "v"));
        assert_eq!(
            applied.last(),
            Some(&PendingOperation::put(format!("k{}", total - 1), "v"))
        );
        assert_eq!(backend.snapshot("kv").len(), total);
    }

    #[tokio::test]
    async fn test_get_all_entries_matches_keys_and_values() {
        let backend = MemoryBackend::new("app").with_partition("kv");
        backend.seed("kv", "b", "2");
        backend.seed("kv", "a", "1");

        let entries = backend.get_all_entries("kv").await.unwrap();
        assert_eq!(
            entries,
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
        backend.fail_loads(true);
        assert!(backend.get_all_entries("kv").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_partition() {
        let backend = MemoryBackend::new("app");
        assert!(!backend.has_partition("kv").unwrap());
        let err = backend.put("kv", "a", "1").await.unwrap_err();
        assert!(matches!(err, StoreError::MissingPartition { .. }));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let backend = MemoryBackend::new("app").with_partition("kv");
        backend.fail_put("bad");
        assert!(backend.put("kv", "bad", "x").await.is_err());
        backend.put("kv", "good", "x").await.unwrap();

        backend.fail_loads(true);
        assert!(backend.get_all_keys("kv").await.is_err());

        backend.fail_writes(true);
        assert!(backend.clear("kv").await.is_err());
        assert_eq!(backend.snapshot("kv").len(), 1);
    }

    #[tokio::test]
    async fn test_connector_shares_backends_and_reopens() {
        let connector = MemoryConnector::new();
        let first = connector.connect("app", "kv").await.unwrap();
        first.put("kv", "k", "v").await.unwrap();
        first.close();
        assert!(connector.backend("app").is_closed());

        let second = connector.connect("app", "kv").await.unwrap();
        assert_eq!(second.get_all_values("kv").await.unwrap(), vec!["v"]);
    }

    #[tokio::test]
    async fn test_connector_fail_open() {
        let connector = MemoryConnector::new();
        connector.fail_open(true);
        assert!(connector.connect("app", "kv").await.is_err());
    }

    #[tokio::test]
    async fn test_gated_connector_waits_for_release() {
        let (connector, gate) = MemoryConnector::gated();
        let connector = Arc::new(connector);

        let pending = tokio::spawn({
            let connector = Arc::clone(&connector);
            async move { connector.connect("app", "kv").await.map(|_| ()) }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        gate.release();
        pending.await.unwrap().unwrap();
    }
}
