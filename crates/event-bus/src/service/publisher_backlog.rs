//! # Publisher Backlog Detector
//!
//! Watches the publishing side for pressure. The [`Publisher`] feeds it the
//! transport latency of every attempt and the number of publishes in flight;
//! a background loop turns each check window into a
//! [`PublisherBacklogState`] and fans it out to listeners.
//!
//! A check reads and resets the window counters. [`state`] reads them
//! without resetting.
//!
//! [`Publisher`]: super::publisher::Publisher
//! [`state`]: PublisherBacklogDetector::state

use super::listeners::{Listener, ListenerSet};
use crate::config::PublisherBacklogConfig;
use crate::domain::PublisherThresholds;
use bus_types::PublisherBacklogState;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

struct Shared {
    config: PublisherBacklogConfig,
    thresholds: PublisherThresholds,
    count: AtomicU64,
    latency_nanos: AtomicU64,
    queue_depth: AtomicI64,
    window_start: Mutex<Instant>,
    last: RwLock<Option<PublisherBacklogState>>,
    listeners: ListenerSet<PublisherBacklogState>,
}

impl Shared {
    fn evaluate(&self, count: u64, latency_nanos: u64, elapsed: Duration) -> PublisherBacklogState {
        let rate = if elapsed.is_zero() {
            0.0
        } else {
            count as f64 / elapsed.as_secs_f64()
        };
        let avg_latency = latency_nanos
            .checked_div(count)
            .map_or(Duration::ZERO, Duration::from_nanos);
        self.thresholds
            .evaluate(self.queue_depth.load(Ordering::Relaxed), avg_latency, rate)
    }

    fn check(&self) -> PublisherBacklogState {
        let state = {
            let mut window_start = self.window_start.lock();
            let now = Instant::now();
            let count = self.count.swap(0, Ordering::AcqRel);
            let latency = self.latency_nanos.swap(0, Ordering::AcqRel);
            let state = self.evaluate(count, latency, now.duration_since(*window_start));
            *window_start = now;
            state
        };

        let previous = self.last.write().replace(state.clone());
        if previous.map_or(state.has_backlog, |p| p.has_backlog != state.has_backlog) {
            if state.has_backlog {
                warn!(
                    queue_depth = state.queue_depth,
                    publish_rate = state.publish_rate,
                    avg_latency_ms = state.avg_publish_latency.as_millis() as u64,
                    severity = ?state.severity,
                    "Publisher backlog detected"
                );
            } else {
                info!("Publisher backlog cleared");
            }
        } else {
            debug!(
                queue_depth = state.queue_depth,
                ratio = state.backlog_ratio,
                "Publisher load sampled"
            );
        }
        self.listeners.notify(state.clone());
        state
    }
}

/// Publisher-side pressure monitor.
pub struct PublisherBacklogDetector {
    shared: Arc<Shared>,
    running: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl PublisherBacklogDetector {
    pub fn new(config: PublisherBacklogConfig) -> Self {
        let thresholds = PublisherThresholds {
            max_queue_depth: config.max_queue_depth,
            max_publish_latency: config.max_publish_latency,
            rate_threshold: config.rate_threshold,
        };
        let listeners = ListenerSet::new("publisher_backlog", config.listener_timeout);
        Self {
            shared: Arc::new(Shared {
                config,
                thresholds,
                count: AtomicU64::new(0),
                latency_nanos: AtomicU64::new(0),
                queue_depth: AtomicI64::new(0),
                window_start: Mutex::new(Instant::now()),
                last: RwLock::new(None),
                listeners,
            }),
            running: Mutex::new(None),
        }
    }

    pub fn thresholds(&self) -> PublisherThresholds {
        self.shared.thresholds
    }

    /// Count one publish attempt and the time the transport took.
    pub fn record_publish(&self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        self.shared.count.fetch_add(1, Ordering::Relaxed);
        self.shared.latency_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn update_queue_depth(&self, depth: i64) {
        self.shared.queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener<PublisherBacklogState>>) {
        self.shared.listeners.add(listener);
    }

    /// Start the check loop. Idempotent; a stopped detector may be started again.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }
        *self.shared.window_start.lock() = Instant::now();
        let (tx, mut shutdown) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let mut ticker = interval(shared.config.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("Publisher backlog loop shutdown signal received");
                        break;
                    }
                    _ = ticker.tick() => {
                        shared.check();
                    }
                }
            }
        });
        *running = Some((tx, task));
        info!(
            interval_ms = self.shared.config.check_interval.as_millis() as u64,
            max_queue_depth = self.shared.config.max_queue_depth,
            rate_threshold = self.shared.config.rate_threshold,
            "Publisher backlog detector started"
        );
    }

    /// Stop the check loop and wait for it. Idempotent.
    pub async fn stop(&self) {
        let Some((tx, task)) = self.running.lock().take() else {
            return;
        };
        let _ = tx.send(true);
        let _ = task.await;
        info!("Publisher backlog detector stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Close the current window now: evaluate it, notify listeners, reset.
    pub fn check_now(&self) -> PublisherBacklogState {
        self.shared.check()
    }

    /// Evaluate the current window without resetting it.
    pub fn state(&self) -> PublisherBacklogState {
        let elapsed = self.shared.window_start.lock().elapsed();
        self.shared.evaluate(
            self.shared.count.load(Ordering::Acquire),
            self.shared.latency_nanos.load(Ordering::Acquire),
            elapsed,
        )
    }

    /// State produced by the most recent check.
    pub fn last_state(&self) -> Option<PublisherBacklogState> {
        self.shared.last.read().clone()
    }
}
