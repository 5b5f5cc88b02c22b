//! Replication queue
//!
//! FIFO of writes waiting to reach the durable backend. Enqueueing is
//! synchronous and never blocks on the backend; a drain task is spawned on
//! the runtime whenever work arrives and the queue is released. Operations
//! run strictly one at a time, in enqueue order, and a failed operation is
//! logged and skipped.

use crate::adapter::DurableAdapter;
use kvbridge_common::config::QueueConfig;
use kvbridge_common::{PendingOperation, QueueState, QueueStats};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<PendingOperation>,
    state: QueueState,
    /// Drains may only start once the bootstrap load has finished
    ready: bool,
    completed: u64,
    failed: u64,
    skipped: u64,
    backlog_warned: bool,
}

/// Ordered replication queue in front of a [`DurableAdapter`]
pub struct OperationQueue {
    inner: Mutex<QueueInner>,
    /// Held while an operation executes; drain and flush share it
    slot: tokio::sync::Mutex<()>,
    idle: Notify,
    adapter: Arc<DurableAdapter>,
    runtime: Handle,
    high_water_mark: usize,
}

impl OperationQueue {
    pub fn new(adapter: Arc<DurableAdapter>, runtime: Handle, config: &QueueConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner::default()),
            slot: tokio::sync::Mutex::new(()),
            idle: Notify::new(),
            adapter,
            runtime,
            high_water_mark: config.high_water_mark,
        })
    }

    /// Append `op`, starting a drain if the queue is released and idle
    pub fn enqueue(self: &Arc<Self>, op: PendingOperation) {
        let start = {
            let mut inner = self.inner.lock();
            debug!("Queued {}", op);
            inner.pending.push_back(op);

            let depth = inner.pending.len();
            if depth > self.high_water_mark && !inner.backlog_warned {
                warn!(
                    "Replication backlog at {} operations (high-water mark {})",
                    depth, self.high_water_mark
                );
                inner.backlog_warned = true;
            }
            Self::try_start(&mut inner)
        };
        if start {
            self.spawn_drain();
        }
    }

    /// Release the queue after the bootstrap load and drain anything queued
    pub fn mark_ready(self: &Arc<Self>) {
        let start = {
            let mut inner = self.inner.lock();
            inner.ready = true;
            Self::try_start(&mut inner)
        };
        if start {
            self.spawn_drain();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Number of operations waiting to run
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            state: inner.state,
            pending: inner.pending.len(),
            completed: inner.completed,
            failed: inner.failed,
            skipped: inner.skipped,
        }
    }

    /// Wait until nothing is pending and no drain is running
    ///
    /// Before the queue is released this also waits for the release.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let inner = self.inner.lock();
                if inner.state == QueueState::Idle && inner.pending.is_empty() {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Run every currently pending operation once, in order
    ///
    /// Waits for an in-flight operation first, so order is kept against a
    /// running drain. Without an attached backend nothing is taken off the
    /// queue. Returns the number of operations executed.
    pub async fn flush(&self) -> usize {
        let _slot = self.slot.lock().await;
        if !self.adapter.is_attached() {
            debug!("No backend attached, leaving {} operations queued", self.pending());
            return 0;
        }
        let batch: Vec<_> = self.inner.lock().pending.drain(..).collect();
        let count = batch.len();
        for op in batch {
            self.run(op).await;
        }
        if count > 0 {
            info!("Flushed {} queued operations", count);
        }
        self.idle.notify_waiters();
        count
    }

    /// Flip Idle to Draining when there is released work
    fn try_start(inner: &mut QueueInner) -> bool {
        if inner.ready && inner.state == QueueState::Idle && !inner.pending.is_empty() {
            inner.state = QueueState::Draining;
            true
        } else {
            false
        }
    }

    fn spawn_drain(self: &Arc<Self>) {
        let queue = Arc::clone(self);
        self.runtime.spawn(async move { queue.drain().await });
    }

    async fn drain(&self) {
        debug!("Replication drain started");
        loop {
            let _slot = self.slot.lock().await;
            let Some(op) = self.next_or_idle() else {
                break;
            };
            self.run(op).await;
        }
        debug!("Replication drain finished");
        self.idle.notify_waiters();
    }

    /// Pop the head, or return to Idle under the same lock `enqueue` takes
    fn next_or_idle(&self) -> Option<PendingOperation> {
        let mut inner = self.inner.lock();
        let op = inner.pending.pop_front();
        if op.is_none() {
            inner.state = QueueState::Idle;
        }
        if inner.pending.len() <= self.high_water_mark {
            inner.backlog_warned = false;
        }
        op
    }

    async fn run(&self, op: PendingOperation) {
        let outcome = self.adapter.execute(&op).await;
        let mut inner = self.inner.lock();
        match outcome {
            Ok(true) => inner.completed += 1,
            Ok(false) => inner.skipped += 1,
            Err(e) => {
                error!("Replication of {} failed: {}", op, e);
                inner.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvbridge_store::MemoryBackend;
    use std::time::Duration;

    fn setup(backend: &Arc<MemoryBackend>) -> Arc<OperationQueue> {
        let adapter = Arc::new(DurableAdapter::external(backend.clone(), "kv").unwrap());
        OperationQueue::new(adapter, Handle::current(), &QueueConfig::default())
    }

    fn backend() -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::new("app").with_partition("kv"))
    }

    #[tokio::test]
    async fn test_holds_operations_until_ready() {
        let backend = backend();
        let queue = setup(&backend);

        queue.enqueue(PendingOperation::put("a", "1"));
        queue.enqueue(PendingOperation::put("b", "2"));
        tokio::task::yield_now().await;
        assert_eq!(queue.pending(), 2);
        assert!(backend.applied().is_empty());

        queue.mark_ready();
        queue.wait_idle().await;
        assert_eq!(queue.pending(), 0);
        assert_eq!(
            backend.applied(),
            vec![PendingOperation::put("a", "1"), PendingOperation::put("b", "2")]
        );
    }

    #[tokio::test]
    async fn test_slow_operation_is_not_overtaken() {
        let backend = backend();
        backend.set_latency("slow", Duration::from_millis(30));
        let queue = setup(&backend);
        queue.mark_ready();

        queue.enqueue(PendingOperation::put("slow", "1"));
        queue.enqueue(PendingOperation::put("fast", "2"));
        queue.enqueue(PendingOperation::delete("slow"));
        queue.wait_idle().await;

        assert_eq!(
            backend.applied(),
            vec![
                PendingOperation::put("slow", "1"),
                PendingOperation::put("fast", "2"),
                PendingOperation::delete("slow"),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_the_drain() {
        let backend = backend();
        backend.fail_put("bad");
        let queue = setup(&backend);
        queue.mark_ready();

        queue.enqueue(PendingOperation::put("bad", "x"));
        queue.enqueue(PendingOperation::put("good", "y"));
        queue.wait_idle().await;

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.state, QueueState::Idle);
        assert!(backend.snapshot("kv").contains_key("good"));
    }

    #[tokio::test]
    async fn test_enqueue_after_idle_restarts_drain() {
        let backend = backend();
        let queue = setup(&backend);
        queue.mark_ready();

        queue.enqueue(PendingOperation::put("a", "1"));
        queue.wait_idle().await;
        queue.enqueue(PendingOperation::Clear);
        queue.wait_idle().await;

        assert_eq!(backend.applied().len(), 2);
        assert!(backend.snapshot("kv").is_empty());
    }

    #[tokio::test]
    async fn test_flush_runs_pending_before_release() {
        let backend = backend();
        let queue = setup(&backend);

        queue.enqueue(PendingOperation::put("a", "1"));
        queue.enqueue(PendingOperation::put("b", "2"));
        assert_eq!(queue.flush().await, 2);
        assert_eq!(queue.pending(), 0);
        assert_eq!(backend.snapshot("kv").len(), 2);
    }

    #[tokio::test]
    async fn test_flush_without_backend_keeps_queue() {
        let adapter = Arc::new(DurableAdapter::owned("kv"));
        let queue = OperationQueue::new(adapter, Handle::current(), &QueueConfig::default());

        queue.enqueue(PendingOperation::put("a", "1"));
        assert_eq!(queue.flush().await, 0);
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_unattached_drain_skips() {
        let adapter = Arc::new(DurableAdapter::owned("kv"));
        let queue = OperationQueue::new(adapter, Handle::current(), &QueueConfig::default());
        queue.mark_ready();

        queue.enqueue(PendingOperation::put("a", "1"));
        queue.wait_idle().await;
        assert_eq!(queue.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_backlog_warning_never_refuses() {
        let backend = backend();
        let adapter = Arc::new(DurableAdapter::external(backend.clone(), "kv").unwrap());
        let queue = OperationQueue::new(
            adapter,
            Handle::current(),
            &QueueConfig { high_water_mark: 2 },
        );

        for i in 0..5 {
            queue.enqueue(PendingOperation::put(format!("k{i}"), "v"));
        }
        assert_eq!(queue.pending(), 5);

        queue.mark_ready();
        queue.wait_idle().await;
        assert_eq!(backend.snapshot("kv").len(), 5);
    }
}
