//! Durable backend backed by redb.
//!
//! One redb file per backend name, one table per partition. redb is a
//! blocking API, so every call runs on the blocking pool and the async
//! caller only awaits the join handle.

use crate::backend::{BackendConnector, DurableBackend};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Table holding one partition: key (str) -> value (str)
fn partition_table(partition: &str) -> TableDefinition<'_, &'static str, &'static str> {
    TableDefinition::new(partition)
}

/// Durable backend backed by a single redb file.
pub struct RedbBackend {
    name: String,
    path: PathBuf,
    db: RwLock<Option<Arc<Database>>>,
}

impl RedbBackend {
    /// Open (or create) the redb database at the given path.
    ///
    /// The backend name is the file stem.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!("Opened redb backend '{}' at {}", name, path.display());
        Ok(Self {
            name,
            path: path.to_path_buf(),
            db: RwLock::new(Some(Arc::new(db))),
        })
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create `partition` if it does not exist yet
    pub fn create_partition(&self, partition: &str) -> StoreResult<()> {
        let db = self.database()?;
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(partition_table(partition))?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn database(&self) -> StoreResult<Arc<Database>> {
        self.db
            .read()
            .clone()
            .ok_or_else(|| StoreError::Closed(self.name.clone()))
    }

    /// Run a blocking closure against the database on the blocking pool
    async fn with_db<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    {
        let db = self.database()?;
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

#[async_trait]
impl DurableBackend for RedbBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_partition(&self, partition: &str) -> StoreResult<bool> {
        let db = self.database()?;
        let read_txn = db.begin_read()?;
        match read_txn.open_table(partition_table(partition)) {
            Ok(_) => Ok(true),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all_keys(&self, partition: &str) -> StoreResult<Vec<String>> {
        let partition = partition.to_string();
        self.with_db(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(partition_table(&partition))?;
            let mut keys = Vec::new();
            for entry in table.iter()? {
                let entry = entry?;
                keys.push(entry.0.value().to_string());
            }
            Ok(keys)
        })
        .await
    }

    async fn get_all_values(&self, partition: &str) -> StoreResult<Vec<String>> {
        let partition = partition.to_string();
        self.with_db(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(partition_table(&partition))?;
            let mut values = Vec::new();
            for entry in table.iter()? {
                let entry = entry?;
                values.push(entry.1.value().to_string());
            }
            Ok(values)
        })
        .await
    }

    async fn get_all_entries(&self, partition: &str) -> StoreResult<Vec<(String, String)>> {
        let partition = partition.to_string();
        self.with_db(move |db| {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(partition_table(&partition))?;
            let mut entries = Vec::new();
            for entry in table.iter()? {
                let (k, v) = entry?;
                entries.push((k.value().to_string(), v.value().to_string()));
            }
            Ok(entries)
        })
        .await
    }

    async fn put(&self, partition: &str, key: &str, value: &str) -> StoreResult<()> {
        let (partition, key, value) = (partition.to_string(), key.to_string(), value.to_string());
        self.with_db(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(partition_table(&partition))?;
                table.insert(key.as_str(), value.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, partition: &str, key: &str) -> StoreResult<()> {
        let (partition, key) = (partition.to_string(), key.to_string());
        self.with_db(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(partition_table(&partition))?;
                table.remove(key.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, partition: &str) -> StoreResult<()> {
        let partition = partition.to_string();
        self.with_db(move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(partition_table(&partition))?;
                // Collect keys first, then remove
                let keys = table
                    .iter()?
                    .map(|entry| entry.map(|(k, _)| k.value().to_string()))
                    .collect::<Result<Vec<_>, _>>()?;
                for key in &keys {
                    table.remove(key.as_str())?;
                }
                debug!("Cleared {} entries from partition '{}'", keys.len(), partition);
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    fn close(&self) {
        if self.db.write().take().is_some() {
            info!("Closed redb backend '{}'", self.name);
        }
    }
}

/// Opens redb backends as `<data_dir>/<name>.redb`.
pub struct RedbConnector {
    data_dir: PathBuf,
}

impl RedbConnector {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// File a backend name maps to
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{name}.redb"))
    }
}

#[async_trait]
impl BackendConnector for RedbConnector {
    async fn connect(&self, name: &str, partition: &str) -> StoreResult<Arc<dyn DurableBackend>> {
        let path = self.path_for(name);
        let partition = partition.to_string();
        let backend = tokio::task::spawn_blocking(move || {
            let backend = RedbBackend::open(&path)?;
            backend.create_partition(&partition)?;
            Ok::<_, StoreError>(backend)
        })
        .await??;
        Ok(Arc::new(backend) as Arc<dyn DurableBackend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_and_load_all() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("app.redb")).unwrap();
        backend.create_partition("kv").unwrap();
        assert_eq!(backend.name(), "app");

        backend.put("kv", "b", "2").await.unwrap();
        backend.put("kv", "a", "1").await.unwrap();

        let keys = backend.get_all_keys("kv").await.unwrap();
        let values = backend.get_all_values("kv").await.unwrap();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(values, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_get_all_entries_pairs_from_one_snapshot() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("app.redb")).unwrap();
        backend.create_partition("kv").unwrap();
        backend.put("kv", "b", "2").await.unwrap();
        backend.put("kv", "a", "1").await.unwrap();

        assert_eq!(
            backend.get_all_entries("kv").await.unwrap(),
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("app.redb")).unwrap();
        backend.create_partition("kv").unwrap();

        backend.put("kv", "a", "1").await.unwrap();
        backend.put("kv", "b", "2").await.unwrap();
        backend.delete("kv", "a").await.unwrap();
        backend.delete("kv", "missing").await.unwrap();
        assert_eq!(backend.get_all_keys("kv").await.unwrap(), vec!["b"]);

        backend.clear("kv").await.unwrap();
        assert!(backend.get_all_keys("kv").await.unwrap().is_empty());
    }

    #[test]
    fn test_has_partition() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("app.redb")).unwrap();
        assert!(!backend.has_partition("kv").unwrap());
        backend.create_partition("kv").unwrap();
        assert!(backend.has_partition("kv").unwrap());
    }

    #[tokio::test]
    async fn test_closed_backend_rejects_calls() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("app.redb")).unwrap();
        backend.create_partition("kv").unwrap();
        backend.close();

        let err = backend.put("kv", "a", "1").await.unwrap_err();
        assert!(matches!(err, StoreError::Closed(_)));
    }

    #[tokio::test]
    async fn test_connector_creates_partition_and_persists() {
        let dir = tempdir().unwrap();
        let connector = RedbConnector::new(dir.path());

        let backend = connector.connect("app", "kv").await.unwrap();
        assert!(backend.has_partition("kv").unwrap());
        backend.put("kv", "k", "v").await.unwrap();
        backend.close();

        let reopened = connector.connect("app", "kv").await.unwrap();
        assert_eq!(reopened.get_all_values("kv").await.unwrap(), vec!["v"]);
        assert!(connector.path_for("app").exists());
    }
}
