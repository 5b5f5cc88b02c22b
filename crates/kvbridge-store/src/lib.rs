//! kvbridge Store - backends behind the bridging engine
//!
//! The engine consumes two capabilities:
//!
//! - [`DurableBackend`]: an asynchronous, persistent key/value store split
//!   into named partitions. Every call is independent and may fail.
//! - [`EphemeralStore`]: a synchronous byte store scoped to one session.
//!
//! This crate defines both traits and ships a redb-backed durable backend,
//! an in-process durable backend with fault injection, and an in-process
//! session store.

pub mod backend;
pub mod error;
pub mod memory;
pub mod redb_backend;
pub mod session;

// Re-exports
pub use backend::{BackendConnector, DurableBackend};
pub use error::{StoreError, StoreResult};
pub use memory::{APPLIED_LOG_CAPACITY, MemoryBackend, MemoryConnector, OpenGate};
pub use redb_backend::{RedbBackend, RedbConnector};
pub use session::{EphemeralStore, MemorySessionStore};
