//! Bootstrap sequencing
//!
//! Runs once per engine: open the backend (when the engine owns it), load
//! the durable snapshot, overlay it onto the session cache, then release the
//! replication queue. The engine reaches `Ready` whether or not any of this
//! worked; a failed bootstrap leaves it running cache-only.

use crate::adapter::DurableAdapter;
use crate::cache::SessionCache;
use crate::queue::OperationQueue;
use kvbridge_common::{EngineState, Error, LoadOutcome, Result};
use kvbridge_store::BackendConnector;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Backend the bootstrap has to open itself
pub struct OpenRequest {
    pub connector: Arc<dyn BackendConnector>,
    pub name: String,
}

/// Drives the engine from `Uninitialized` to `Ready`
pub struct InitSequencer {
    state: watch::Sender<EngineState>,
    outcome: watch::Sender<Option<LoadOutcome>>,
}

impl Default for InitSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl InitSequencer {
    pub fn new() -> Self {
        Self {
            state: watch::Sender::new(EngineState::Uninitialized),
            outcome: watch::Sender::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Completion signal for the bootstrap load
    pub fn signal(&self, runtime: Handle) -> LoadSignal {
        LoadSignal {
            outcome: self.outcome.subscribe(),
            runtime,
        }
    }

    /// Move from `Uninitialized` to `Loading`; false if already begun
    pub fn begin(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == EngineState::Uninitialized {
                *state = EngineState::Loading;
                true
            } else {
                false
            }
        })
    }

    /// Run the bootstrap to completion
    pub async fn run(
        &self,
        open: Option<OpenRequest>,
        adapter: &DurableAdapter,
        cache: &SessionCache,
        queue: &Arc<OperationQueue>,
    ) -> LoadOutcome {
        self.begin();

        let outcome = match Self::load(open, adapter, cache).await {
            Ok(entries) => {
                info!("Loaded {} durable entries into '{}'", entries, cache.key());
                LoadOutcome::Loaded { entries }
            }
            Err(e) => {
                error!("Bootstrap of '{}' failed, running cache-only: {}", cache.key(), e);
                LoadOutcome::Degraded
            }
        };

        queue.mark_ready();
        self.state.send_replace(EngineState::Ready);
        self.outcome.send_replace(Some(outcome));
        outcome
    }

    async fn load(
        open: Option<OpenRequest>,
        adapter: &DurableAdapter,
        cache: &SessionCache,
    ) -> Result<usize> {
        if let Some(OpenRequest { connector, name }) = open {
            let backend = connector
                .connect(&name, adapter.partition())
                .await
                .map_err(|e| Error::initialization(format!("cannot open backend \"{name}\": {e}")))?;
            adapter.attach(backend);
        }

        let durable = adapter.try_load_all().await?;
        let entries = durable.len();

        // Durable values win over cached ones; cached-only keys survive
        let lock = cache.lock();
        let mut blob = lock.read();
        blob.extend(durable);
        lock.write(&blob);
        Ok(entries)
    }
}

/// Completion signal of the bootstrap load
///
/// Observers that subscribe after completion are still notified, on a
/// later task rather than from inside the subscribing call.
#[derive(Clone)]
pub struct LoadSignal {
    outcome: watch::Receiver<Option<LoadOutcome>>,
    runtime: Handle,
}

impl LoadSignal {
    /// Outcome, if the load already finished
    pub fn outcome(&self) -> Option<LoadOutcome> {
        *self.outcome.borrow()
    }

    pub fn is_complete(&self) -> bool {
        self.outcome().is_some()
    }

    /// Wait for the load to finish
    ///
    /// Reads as `Degraded` if the engine went away before finishing.
    pub async fn wait(&self) -> LoadOutcome {
        let mut rx = self.outcome.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(LoadOutcome::Degraded),
            Err(_) => LoadOutcome::Degraded,
        }
    }

    /// Invoke `callback` once the load has finished
    pub fn on_load_complete<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(LoadOutcome) + Send + 'static,
    {
        let signal = self.clone();
        self.runtime.spawn(async move {
            let outcome = signal.wait().await;
            callback(outcome);
        })
    }
}
