//! # Backlog Detector
//!
//! Polls a [`LagSource`] for every watched topic on a fixed interval and
//! turns each sample into a [`BacklogState`]. The state is kept (last value
//! wins), pushed to the recovery manager without blocking, and fanned out
//! to backlog listeners.
//!
//! A failed lag read is logged and retried on the next tick. After
//! `failure_threshold` consecutive failures the topic is reported degraded;
//! the loop keeps running.

use super::listeners::{Listener, ListenerSet};
use super::recovery_manager::RecoveryManager;
use crate::config::BacklogConfig;
use crate::domain::{BacklogThresholds, FailureTracker, TopicHealth};
use crate::error::{EventBusError, EventBusResult};
use crate::metrics;
use crate::ports::outbound::LagSource;
use bus_types::{BacklogState, DEFAULT_CONSUMER_GROUP};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

struct Watched {
    consumer_group: String,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    config: BacklogConfig,
    thresholds: BacklogThresholds,
    lag_source: Arc<dyn LagSource>,
    recovery: Option<Arc<RecoveryManager>>,
    states: RwLock<HashMap<String, BacklogState>>,
    failures: Mutex<HashMap<String, FailureTracker>>,
    listeners: ListenerSet<BacklogState>,
}

impl Shared {
    async fn check(&self, topic: &str, consumer_group: &str) -> EventBusResult<BacklogState> {
        let sample = match self.lag_source.get_lag(topic, consumer_group).await {
            Ok(sample) => sample,
            Err(e) => {
                self.record_failure(topic, &e);
                return Err(match e {
                    EventBusError::LagRead { .. } => e,
                    other => EventBusError::LagRead {
                        topic: topic.to_string(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        let recovered = self
            .failures
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| FailureTracker::new(self.config.failure_threshold))
            .record_success();
        if recovered {
            info!(topic = %topic, "Lag reads recovered; topic healthy");
        }

        let state = self.thresholds.evaluate(topic, consumer_group, sample);
        let previous = self
            .states
            .write()
            .insert(topic.to_string(), state.clone());
        if previous.map_or(state.has_backlog, |p| p.has_backlog != state.has_backlog) {
            if state.has_backlog {
                warn!(
                    topic = %topic,
                    lag_count = state.lag_count,
                    lag_time_ms = state.lag_time.as_millis() as u64,
                    "Backlog detected"
                );
            } else {
                info!(topic = %topic, "Backlog cleared");
            }
        } else {
            debug!(topic = %topic, lag_count = state.lag_count, "Lag sampled");
        }
        metrics::set_lag(topic, state.lag_count);

        if let Some(recovery) = &self.recovery {
            recovery.offer(state.clone());
        }
        self.listeners.notify(state.clone());
        Ok(state)
    }

    fn record_failure(&self, topic: &str, e: &EventBusError) {
        let mut failures = self.failures.lock();
        let tracker = failures
            .entry(topic.to_string())
            .or_insert_with(|| FailureTracker::new(self.config.failure_threshold));
        let degraded = tracker.record_failure();
        warn!(
            topic = %topic,
            consecutive = tracker.consecutive(),
            error = %e,
            "Lag read failed"
        );
        if degraded {
            error!(
                topic = %topic,
                consecutive = tracker.consecutive(),
                "Topic marked degraded after repeated lag read failures"
            );
        }
        metrics::record_lag_read_failure(topic);
    }
}

/// Per-topic lag poller.
pub struct BacklogDetector {
    shared: Arc<Shared>,
    watched: Mutex<HashMap<String, Watched>>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl BacklogDetector {
    pub fn new(config: BacklogConfig, lag_source: Arc<dyn LagSource>) -> Self {
        Self::build(config, lag_source, None)
    }

    /// Detector that pushes every state into `recovery`.
    pub fn with_recovery(
        config: BacklogConfig,
        lag_source: Arc<dyn LagSource>,
        recovery: Arc<RecoveryManager>,
    ) -> Self {
        Self::build(config, lag_source, Some(recovery))
    }

    fn build(
        config: BacklogConfig,
        lag_source: Arc<dyn LagSource>,
        recovery: Option<Arc<RecoveryManager>>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let thresholds = BacklogThresholds {
            lag_threshold: config.lag_threshold,
            time_threshold: config.time_threshold,
        };
        let listeners = ListenerSet::new("backlog", config.listener_timeout);
        Self {
            shared: Arc::new(Shared {
                config,
                thresholds,
                lag_source,
                recovery,
                states: RwLock::new(HashMap::new()),
                failures: Mutex::new(HashMap::new()),
                listeners,
            }),
            watched: Mutex::new(HashMap::new()),
            shutdown,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn thresholds(&self) -> BacklogThresholds {
        self.shared.thresholds
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener<BacklogState>>) {
        self.shared.listeners.add(listener);
    }

    /// Begin monitoring `topic`. A topic already watched keeps its group.
    pub fn watch_topic(&self, topic: &str, consumer_group: &str) {
        let mut watched = self.watched.lock();
        if watched.contains_key(topic) {
            return;
        }
        let group = if consumer_group.is_empty() {
            DEFAULT_CONSUMER_GROUP
        } else {
            consumer_group
        };
        let task = self.is_running().then(|| self.spawn_loop(topic, group));
        watched.insert(
            topic.to_string(),
            Watched {
                consumer_group: group.to_string(),
                task,
            },
        );
        debug!(topic = %topic, consumer_group = %group, "Watching topic for backlog");
    }

    /// Stop monitoring `topic` and forget its state.
    pub fn unwatch_topic(&self, topic: &str) {
        if let Some(w) = self.watched.lock().remove(topic) {
            if let Some(task) = w.task {
                task.abort();
            }
        }
        self.shared.states.write().remove(topic);
        self.shared.failures.lock().remove(topic);
    }

    pub fn watched_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.watched.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Start one polling loop per watched topic. Idempotent.
    pub fn start(&self) {
        if self.stopped.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut watched = self.watched.lock();
        for (topic, w) in watched.iter_mut() {
            if w.task.is_none() {
                w.task = Some(self.spawn_loop(topic, &w.consumer_group));
            }
        }
        info!(
            topics = watched.len(),
            interval_ms = self.shared.config.check_interval.as_millis() as u64,
            "Backlog detector started"
        );
    }

    /// Stop every polling loop. Idempotent; a stopped detector stays stopped.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self
            .watched
            .lock()
            .values_mut()
            .filter_map(|w| w.task.take())
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("Backlog detector stopped");
    }

    fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }

    fn spawn_loop(&self, topic: &str, consumer_group: &str) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown.subscribe();
        let topic = topic.to_string();
        let group = consumer_group.to_string();
        tokio::spawn(async move {
            let mut ticker = interval(shared.config.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!(topic = %topic, "Backlog loop shutdown signal received");
                        break;
                    }
                    _ = ticker.tick() => {
                        // failures are logged and counted inside `check`
                        let _ = shared.check(&topic, &group).await;
                    }
                }
            }
        })
    }

    /// Evaluate `topic` immediately, outside the polling schedule.
    pub async fn check_now(&self, topic: &str) -> EventBusResult<BacklogState> {
        let group = self
            .watched
            .lock()
            .get(topic)
            .map_or_else(|| DEFAULT_CONSUMER_GROUP.to_string(), |w| w.consumer_group.clone());
        self.shared.check(topic, &group).await
    }

    /// Last observed state for `topic`.
    pub fn state(&self, topic: &str) -> Option<BacklogState> {
        self.shared.states.read().get(topic).cloned()
    }

    pub fn health(&self, topic: &str) -> TopicHealth {
        self.shared
            .failures
            .lock()
            .get(topic)
            .map_or(TopicHealth::Healthy, FailureTracker::health)
    }

    pub fn is_degraded(&self, topic: &str) -> bool {
        self.health(topic) == TopicHealth::Degraded
    }

    /// Sum of the latest count lag over every topic.
    pub fn total_lag(&self) -> i64 {
        self.shared
            .states
            .read()
            .values()
            .map(|s| s.lag_count.max(0))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ManualLagSource;
    use crate::config::RecoveryConfig;
    use crate::domain::RecoveryMode;
    use crate::service::listeners::listener_fn;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn config(interval: Duration) -> BacklogConfig {
        BacklogConfig {
            check_interval: interval,
            lag_threshold: 100,
            time_threshold: Duration::from_secs(60),
            failure_threshold: 3,
            listener_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_check_now_applies_thresholds() {
        let source = Arc::new(ManualLagSource::new());
        let detector = BacklogDetector::new(config(Duration::from_secs(30)), source.clone());

        source.set_lag("orders", 50, Duration::ZERO);
        assert!(!detector.check_now("orders").await.unwrap().has_backlog);

        source.set_lag("orders", 500, Duration::ZERO);
        let state = detector.check_now("orders").await.unwrap();
        assert!(state.has_backlog);
        assert_eq!(detector.state("orders").unwrap().lag_count, 500);

        source.set_lag("payments", 0, Duration::from_secs(120));
        assert!(detector.check_now("payments").await.unwrap().has_backlog);
        assert_eq!(detector.total_lag(), 500);
    }

    #[tokio::test]
    async fn test_three_failed_reads_degrade_topic() {
        let source = Arc::new(ManualLagSource::new());
        let detector = BacklogDetector::new(config(Duration::from_secs(30)), source.clone());
        source.set_failing("orders", true);

        for _ in 0..2 {
            assert!(detector.check_now("orders").await.is_err());
        }
        assert!(!detector.is_degraded("orders"));
        assert!(detector.check_now("orders").await.is_err());
        assert!(detector.is_degraded("orders"));

        source.set_lag("orders", 0, Duration::ZERO);
        detector.check_now("orders").await.unwrap();
        assert!(!detector.is_degraded("orders"));
    }

    #[tokio::test]
    async fn test_polling_loop_feeds_listeners_and_recovery() {
        let source = Arc::new(ManualLagSource::new());
        let recovery = Arc::new(RecoveryManager::new(RecoveryConfig::default(), 2));
        recovery.start();
        let detector = BacklogDetector::with_recovery(
            config(Duration::from_millis(20)),
            source.clone(),
            Arc::clone(&recovery),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        detector.add_listener(listener_fn(move |state: BacklogState| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(state);
            }
        }));

        source.set_lag("orders", 1000, Duration::ZERO);
        detector.watch_topic("orders", "g1");
        detector.start();
        detector.start();

        let state = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.consumer_group, "g1");
        assert!(state.has_backlog);

        for _ in 0..50 {
            if recovery.mode("orders") == RecoveryMode::Recovering {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(recovery.mode("orders"), RecoveryMode::Recovering);

        detector.stop().await;
        detector.stop().await;
        recovery.stop().await;
    }

    #[tokio::test]
    async fn test_unwatch_forgets_topic() {
        let source = Arc::new(ManualLagSource::new());
        let detector = BacklogDetector::new(config(Duration::from_secs(30)), source);
        detector.watch_topic("orders", "");
        assert_eq!(detector.watched_topics(), vec!["orders".to_string()]);
        detector.check_now("orders").await.unwrap();
        detector.unwatch_topic("orders");
        assert!(detector.state("orders").is_none());
        assert!(detector.watched_topics().is_empty());
    }
}
