//! Store error types

use thiserror::Error;

/// Error type for durable and session store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("backend \"{0}\" is closed")]
    Closed(String),
    #[error("partition \"{partition}\" does not exist in backend \"{backend}\"")]
    MissingPartition { backend: String, partition: String },
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("injected fault: {0}")]
    Injected(String),
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<StoreError> for kvbridge_common::Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MissingPartition { backend, partition } => {
                Self::missing_partition(&backend, &partition)
            }
            StoreError::Io(io) => Self::Io(io),
            other => Self::storage(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
