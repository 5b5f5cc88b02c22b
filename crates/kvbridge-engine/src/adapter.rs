//! Durable adapter
//!
//! Thin layer over one partition of a [`DurableBackend`]. The handle is
//! attached once the backend has been opened (or supplied up front); until
//! then writes are dropped and loads return nothing, so the engine stays
//! usable while the backend is unavailable.

use kvbridge_common::{CacheBlob, Error, PendingOperation, Result};
use kvbridge_store::DurableBackend;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// One partition of a durable backend, possibly not yet attached
pub struct DurableAdapter {
    partition: String,
    backend: RwLock<Option<Arc<dyn DurableBackend>>>,
    owned: bool,
    closed: AtomicBool,
}

impl DurableAdapter {
    /// Adapter for a backend the engine will open and therefore close
    pub fn owned(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            backend: RwLock::new(None),
            owned: true,
            closed: AtomicBool::new(false),
        }
    }

    /// Adapter over a caller-supplied handle
    ///
    /// Fails with a configuration error if `partition` does not exist; the
    /// handle is never closed by the engine.
    pub fn external(backend: Arc<dyn DurableBackend>, partition: impl Into<String>) -> Result<Self> {
        let partition = partition.into();
        match backend.has_partition(&partition) {
            Ok(true) => {}
            Ok(false) => return Err(Error::missing_partition(backend.name(), &partition)),
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "cannot inspect backend \"{}\": {}",
                    backend.name(),
                    e
                )));
            }
        }
        Ok(Self {
            partition,
            backend: RwLock::new(Some(backend)),
            owned: false,
            closed: AtomicBool::new(false),
        })
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// Check if the engine opened the backend itself
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Check if a backend handle is available
    pub fn is_attached(&self) -> bool {
        self.backend.read().is_some()
    }

    /// Attach a freshly opened backend
    ///
    /// If the adapter was closed while the backend was still opening, the
    /// backend is closed straight away instead.
    pub fn attach(&self, backend: Arc<dyn DurableBackend>) {
        if self.closed.load(Ordering::SeqCst) {
            info!("Adapter closed before '{}' finished opening", backend.name());
            backend.close();
            return;
        }
        *self.backend.write() = Some(backend);
    }

    fn handle(&self) -> Option<Arc<dyn DurableBackend>> {
        self.backend.read().clone()
    }

    /// Every durable entry of the partition
    ///
    /// Keys and values come from one backend snapshot, so a write landing
    /// mid-load cannot pair a key with another key's value. Without a
    /// handle the result is empty.
    pub async fn try_load_all(&self) -> Result<CacheBlob> {
        let Some(backend) = self.handle() else {
            return Ok(CacheBlob::new());
        };
        let entries = backend
            .get_all_entries(&self.partition)
            .await
            .map_err(|e| {
                Error::initialization(format!(
                    "cannot load {}/{}: {}",
                    backend.name(),
                    self.partition,
                    e
                ))
            })?;
        Ok(entries.into_iter().collect())
    }

    /// Like [`try_load_all`](Self::try_load_all), but any failure reads as empty
    pub async fn load_all(&self) -> CacheBlob {
        match self.try_load_all().await {
            Ok(blob) => blob,
            Err(e) => {
                warn!("{}", e);
                CacheBlob::new()
            }
        }
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<bool> {
        self.execute(&PendingOperation::put(key, value)).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.execute(&PendingOperation::delete(key)).await
    }

    pub async fn clear_all(&self) -> Result<bool> {
        self.execute(&PendingOperation::Clear).await
    }

    /// Apply `op` to the backend
    ///
    /// Returns `Ok(false)` when there was no handle to apply it to.
    pub async fn execute(&self, op: &PendingOperation) -> Result<bool> {
        let Some(backend) = self.handle() else {
            debug!("No backend attached, dropping {}", op);
            return Ok(false);
        };
        let result = match op {
            PendingOperation::Put { key, value } => backend.put(&self.partition, key, value).await,
            PendingOperation::Delete { key } => backend.delete(&self.partition, key).await,
            PendingOperation::Clear => backend.clear(&self.partition).await,
        };
        result
            .map(|()| true)
            .map_err(|e| Error::operation(format!("{} on {}/{}: {}", op, backend.name(), self.partition, e)))
    }

    /// Close the backend if the engine owns it
    pub fn close(&self) {
        if !self.owned {
            return;
        }
        self.closed.store(true, Ordering::SeqCst);
        if let Some(backend) = self.backend.write().take() {
            backend.close();
            info!("Closed durable backend '{}'", backend.name());
        }
    }
}
