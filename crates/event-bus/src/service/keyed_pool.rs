//! # Keyed-Worker Pool
//!
//! Fixed set of sequential workers. Every item for one routing key lands on
//! the same worker (FNV-1a of the key, modulo pool size), so items for a key
//! are handled strictly in arrival order while different keys proceed in
//! parallel.
//!
//! ## Backpressure
//!
//! Each worker has a bounded queue. `route` takes the fast path when there
//! is room; otherwise it waits up to `wait_timeout` for space and then fails
//! with `QueueFull`. While the topic is recovering the queue bound is raised
//! by `recovery_queue_multiplier`, read lock-free from the shared mode flag.
//!
//! ## Faults
//!
//! Handler errors and panics are reported through the item's completion and
//! the pool counters. They never stop the worker or hold up the next item.

use super::panic_message;
use crate::config::KeyedPoolConfig;
use crate::domain::{shard_for, Keyed, ModeFlag};
use crate::error::{EventBusError, EventBusResult};
use crate::metrics;
use async_trait::async_trait;
use bus_types::EnvelopeError;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Business logic run by the pool's workers.
#[async_trait]
pub trait PoolHandler<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    async fn handle(&self, item: &T) -> EventBusResult<()>;
}

struct FnPoolHandler<F, T> {
    f: F,
    _item: PhantomData<fn(T)>,
}

#[async_trait]
impl<F, Fut, T> PoolHandler<T> for FnPoolHandler<F, T>
where
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = EventBusResult<()>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    async fn handle(&self, item: &T) -> EventBusResult<()> {
        (self.f)(item.clone()).await
    }
}

/// Wrap an async closure as a shared [`PoolHandler`].
pub fn pool_handler_fn<T, F, Fut>(f: F) -> Arc<dyn PoolHandler<T>>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EventBusResult<()>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    Arc::new(FnPoolHandler {
        f,
        _item: PhantomData,
    })
}

/// Handler outcome for one routed item.
#[derive(Debug)]
#[must_use = "dropping a completion ignores the handler result"]
pub struct Completion {
    rx: oneshot::Receiver<EventBusResult<()>>,
}

impl Completion {
    /// Wait for the handler to finish with this item.
    pub async fn wait(self) -> EventBusResult<()> {
        self.rx.await.unwrap_or(Err(EventBusError::PoolStopped))
    }
}

struct Job<T> {
    item: T,
    done: oneshot::Sender<EventBusResult<()>>,
}

struct WorkerSlot<T> {
    sender: mpsc::Sender<Job<T>>,
    depth: Arc<AtomicUsize>,
    space: Arc<Notify>,
}

impl<T> Clone for WorkerSlot<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            depth: Arc::clone(&self.depth),
            space: Arc::clone(&self.space),
        }
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    routed: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of pool activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub worker_count: usize,
    pub routed: u64,
    pub processed: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Routes that gave up with `QueueFull`.
    pub rejected: u64,
    /// Items waiting per worker.
    pub queue_depths: Vec<usize>,
    pub is_stopped: bool,
}

/// Ordered-per-key worker pool.
pub struct KeyedWorkerPool<T>
where
    T: Keyed + Send + Sync + 'static,
{
    name: String,
    worker_count: usize,
    queue_size: usize,
    recovery_multiplier: usize,
    wait_timeout: Option<Duration>,
    mode: ModeFlag,
    slots: RwLock<Vec<WorkerSlot<T>>>,
    depths: Vec<Arc<AtomicUsize>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    counters: Arc<PoolCounters>,
}

impl<T> KeyedWorkerPool<T>
where
    T: Keyed + Send + Sync + 'static,
{
    /// Spawn the workers. Must be called within a Tokio runtime.
    pub fn new(
        name: impl Into<String>,
        config: &KeyedPoolConfig,
        handler: Arc<dyn PoolHandler<T>>,
    ) -> EventBusResult<Self> {
        Self::with_mode(name, config, handler, ModeFlag::new())
    }

    /// As [`new`](Self::new), sharing a recovery-mode flag with its owner.
    pub fn with_mode(
        name: impl Into<String>,
        config: &KeyedPoolConfig,
        handler: Arc<dyn PoolHandler<T>>,
        mode: ModeFlag,
    ) -> EventBusResult<Self> {
        if config.worker_count == 0 {
            return Err(EventBusError::config("worker_count must be > 0"));
        }
        if config.queue_size == 0 {
            return Err(EventBusError::config("queue_size must be > 0"));
        }
        let name = name.into();
        let recovery_multiplier = config.recovery_queue_multiplier.max(1);
        let channel_capacity = config.queue_size.saturating_mul(recovery_multiplier);
        let counters = Arc::new(PoolCounters::default());

        let mut slots = Vec::with_capacity(config.worker_count);
        let mut depths = Vec::with_capacity(config.worker_count);
        let mut handles = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            let (sender, receiver) = mpsc::channel(channel_capacity);
            let depth = Arc::new(AtomicUsize::new(0));
            let space = Arc::new(Notify::new());
            handles.push(tokio::spawn(run_worker(
                index,
                name.clone(),
                receiver,
                Arc::clone(&depth),
                Arc::clone(&space),
                Arc::clone(&handler),
                Arc::clone(&counters),
            )));
            depths.push(Arc::clone(&depth));
            slots.push(WorkerSlot {
                sender,
                depth,
                space,
            });
        }

        info!(
            pool = %name,
            workers = config.worker_count,
            queue_size = config.queue_size,
            "Keyed worker pool started"
        );

        Ok(Self {
            name,
            worker_count: config.worker_count,
            queue_size: config.queue_size,
            recovery_multiplier,
            wait_timeout: config.wait_timeout,
            mode,
            slots: RwLock::new(slots),
            depths,
            handles: Mutex::new(handles),
            stopped: AtomicBool::new(false),
            counters,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn mode_flag(&self) -> &ModeFlag {
        &self.mode
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Worker index owning `key`.
    pub fn worker_for(&self, key: &str) -> usize {
        shard_for(key, self.worker_count)
    }

    /// Current per-worker queue bound.
    pub fn effective_capacity(&self) -> usize {
        if self.mode.is_recovering() {
            self.queue_size.saturating_mul(self.recovery_multiplier)
        } else {
            self.queue_size
        }
    }

    /// Hand `item` to the worker owning its key.
    ///
    /// Returns once the item is queued. The returned [`Completion`] resolves
    /// with the handler's result.
    ///
    /// # Errors
    /// - `Envelope(MissingField)`: the routing key is empty
    /// - `QueueFull`: no space freed up within `wait_timeout`
    /// - `PoolStopped`: the pool is shutting down
    pub async fn route(&self, item: T) -> EventBusResult<Completion> {
        if self.is_stopped() {
            return Err(EventBusError::PoolStopped);
        }
        let key = item.routing_key();
        if key.is_empty() {
            return Err(EnvelopeError::MissingField {
                field: "aggregate_id",
            }
            .into());
        }
        let worker = self.worker_for(key);
        let slot = self
            .slots
            .read()
            .get(worker)
            .cloned()
            .ok_or(EventBusError::PoolStopped)?;

        self.reserve_slot(worker, &slot).await?;

        let (done, rx) = oneshot::channel();
        if let Err(e) = slot.sender.try_send(Job { item, done }) {
            slot.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => EventBusError::QueueFull { worker },
                mpsc::error::TrySendError::Closed(_) => EventBusError::PoolStopped,
            });
        }
        self.counters.routed.fetch_add(1, Ordering::Relaxed);
        Ok(Completion { rx })
    }

    /// Claim one queue position on `slot`, waiting for space if needed.
    async fn reserve_slot(&self, worker: usize, slot: &WorkerSlot<T>) -> EventBusResult<()> {
        let deadline = self.wait_timeout.map(|t| Instant::now() + t);
        loop {
            let notified = slot.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_claim(slot) {
                return Ok(());
            }
            if self.is_stopped() {
                return Err(EventBusError::PoolStopped);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        metrics::record_queue_full(&self.name);
                        warn!(pool = %self.name, worker, "Worker queue full");
                        return Err(EventBusError::QueueFull { worker });
                    }
                }
                None => notified.await,
            }
        }
    }

    fn try_claim(&self, slot: &WorkerSlot<T>) -> bool {
        let cap = self.effective_capacity();
        slot.depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                (d < cap).then_some(d + 1)
            })
            .is_ok()
    }

    /// Stop accepting work, drain queues for up to `grace`, then abort any
    /// worker still running. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let slots = std::mem::take(&mut *self.slots.write());
        for slot in &slots {
            slot.space.notify_waiters();
        }
        drop(slots);

        let handles = std::mem::take(&mut *self.handles.lock());
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
            warn!(
                pool = %self.name,
                grace_ms = grace.as_millis() as u64,
                "Grace period elapsed; aborting workers"
            );
            for abort in aborts {
                abort.abort();
            }
        }
        info!(pool = %self.name, "Keyed worker pool stopped");
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            worker_count: self.worker_count,
            routed: self.counters.routed.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            queue_depths: self
                .depths
                .iter()
                .map(|d| d.load(Ordering::Relaxed))
                .collect(),
            is_stopped: self.is_stopped(),
        }
    }
}

async fn run_worker<T>(
    index: usize,
    pool: String,
    mut receiver: mpsc::Receiver<Job<T>>,
    depth: Arc<AtomicUsize>,
    space: Arc<Notify>,
    handler: Arc<dyn PoolHandler<T>>,
    counters: Arc<PoolCounters>,
) where
    T: Keyed + Send + Sync + 'static,
{
    while let Some(job) = receiver.recv().await {
        depth.fetch_sub(1, Ordering::AcqRel);
        space.notify_waiters();

        let result = match AssertUnwindSafe(handler.handle(&job.item))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                let reason = panic_message(panic.as_ref());
                error!(
                    pool = %pool,
                    worker = index,
                    key = %job.item.routing_key(),
                    panic = %reason,
                    "Handler panicked"
                );
                Err(EventBusError::HandlerPanic { reason })
            }
        };

        counters.processed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = &result {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            debug!(pool = %pool, worker = index, error = %e, "Handler failed");
        }
        let _ = job.done.send(result);
    }
    debug!(pool = %pool, worker = index, "Worker exited");
}
