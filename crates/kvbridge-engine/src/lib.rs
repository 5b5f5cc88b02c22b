//! kvbridge Engine
//!
//! A synchronous key-value store for hosts that only offer an ephemeral
//! synchronous session store and a durable but strictly asynchronous
//! backend. Reads and writes are served from the session cache and never
//! wait on the backend; every write is replicated to the backend in the
//! background, in the order it was made.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  StorageRecord   │  (optional: property-style access)
//! └────────┬─────────┘
//!          │
//! ┌────────▼─────────┐        ┌──────────────────┐
//! │  BridgedStorage  ├───────►│   SessionCache   │  sync, authoritative
//! └────────┬─────────┘        └──────────────────┘
//!          │ enqueue
//! ┌────────▼─────────┐        ┌──────────────────┐
//! │  OperationQueue  ├───────►│  DurableAdapter  │  async, follower
//! └──────────────────┘  FIFO  └──────────────────┘
//! ```
//!
//! `InitSequencer` runs once per engine: it opens the backend, layers the
//! durable snapshot over the cache, flips the engine to `Ready` and
//! releases the queue.

pub mod adapter;
pub mod bootstrap;
pub mod cache;
pub mod queue;
pub mod record;
pub mod storage;

pub use adapter::DurableAdapter;
pub use bootstrap::{InitSequencer, LoadSignal};
pub use cache::SessionCache;
pub use queue::OperationQueue;
pub use record::{Property, PropertyDescriptor, RecordError, StorageMethod, StorageRecord};
pub use storage::{BridgedStorage, StorageOptions};

pub use kvbridge_common::{CacheBlob, EngineState, LoadOutcome, PendingOperation, QueueStats};
