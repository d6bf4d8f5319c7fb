//! # Recovery Manager
//!
//! Owns the recovery mode of every monitored topic. Backlog states arrive
//! through a bounded inbox fed by the backlog detector; each one drives the
//! topic's [`RecoveryStateMachine`], and the resulting mode is published to
//! the topic's [`ModeFlag`] for the worker pool and subscriber to read.

use super::listeners::{Listener, ListenerSet};
use crate::config::RecoveryConfig;
use crate::domain::{ModeFlag, RecoveryMode, RecoveryStateMachine, RecoveryTuning, Transition};
use crate::metrics;
use bus_types::BacklogState;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Emitted to listeners on every mode change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub topic: String,
    pub from: RecoveryMode,
    pub to: RecoveryMode,
    /// Operator override rather than a backlog observation.
    pub forced: bool,
    pub lag_count: Option<i64>,
    /// Throughput knobs for the new mode.
    pub tuning: RecoveryTuning,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of recovery activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    pub topics: usize,
    pub recovering_topics: Vec<String>,
    pub transitions: u64,
    pub last_transition: Option<DateTime<Utc>>,
    /// States the manager could not accept because its inbox was full.
    pub dropped_states: u64,
}

struct TopicRecovery {
    machine: Mutex<RecoveryStateMachine>,
    flag: ModeFlag,
}

struct Shared {
    config: RecoveryConfig,
    queue_multiplier: usize,
    topics: RwLock<HashMap<String, Arc<TopicRecovery>>>,
    listeners: ListenerSet<ModeChange>,
    transitions: AtomicU64,
    last_transition: RwLock<Option<DateTime<Utc>>>,
    dropped: AtomicU64,
}

impl Shared {
    fn topic(&self, topic: &str) -> Arc<TopicRecovery> {
        if let Some(existing) = self.topics.read().get(topic) {
            return Arc::clone(existing);
        }
        let mut topics = self.topics.write();
        Arc::clone(topics.entry(topic.to_string()).or_insert_with(|| {
            Arc::new(TopicRecovery {
                machine: Mutex::new(RecoveryStateMachine::new(self.config.min_dwell)),
                flag: ModeFlag::new(),
            })
        }))
    }

    fn apply(&self, state: &BacklogState) -> Option<Transition> {
        let entry = self.topic(&state.topic);
        let transition = entry.machine.lock().observe(state.has_backlog, Instant::now())?;
        self.publish(&state.topic, &entry, transition, false, Some(state.lag_count));
        Some(transition)
    }

    fn force(&self, topic: &str, mode: RecoveryMode) -> Option<Transition> {
        let entry = self.topic(topic);
        let transition = entry.machine.lock().force(mode, Instant::now())?;
        self.publish(topic, &entry, transition, true, None);
        Some(transition)
    }

    fn publish(
        &self,
        topic: &str,
        entry: &TopicRecovery,
        transition: Transition,
        forced: bool,
        lag_count: Option<i64>,
    ) {
        entry.flag.store(transition.to);
        self.transitions.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        *self.last_transition.write() = Some(now);
        metrics::set_recovering(topic, transition.to == RecoveryMode::Recovering);

        match transition.to {
            RecoveryMode::Recovering => info!(
                topic = %topic,
                forced,
                lag_count = lag_count.unwrap_or_default(),
                "Entering recovery mode"
            ),
            RecoveryMode::Normal => info!(topic = %topic, forced, "Returning to normal mode"),
        }

        self.listeners.notify(ModeChange {
            topic: topic.to_string(),
            from: transition.from,
            to: transition.to,
            forced,
            lag_count,
            tuning: RecoveryTuning::for_mode(
                transition.to,
                self.queue_multiplier,
                self.config.batch_multiplier,
            ),
            timestamp: now,
        });
    }
}

/// Per-topic Normal/Recovering controller.
pub struct RecoveryManager {
    shared: Arc<Shared>,
    inbox: mpsc::Sender<BacklogState>,
    receiver: Mutex<Option<mpsc::Receiver<BacklogState>>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl RecoveryManager {
    /// `queue_multiplier` is the keyed pool's `recovery_queue_multiplier`.
    pub fn new(config: RecoveryConfig, queue_multiplier: usize) -> Self {
        let (inbox, receiver) = mpsc::channel(config.inbox_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        let listeners = ListenerSet::new("recovery", config.listener_timeout);
        Self {
            shared: Arc::new(Shared {
                config,
                queue_multiplier: queue_multiplier.max(1),
                topics: RwLock::new(HashMap::new()),
                listeners,
                transitions: AtomicU64::new(0),
                last_transition: RwLock::new(None),
                dropped: AtomicU64::new(0),
            }),
            inbox,
            receiver: Mutex::new(Some(receiver)),
            shutdown,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Hand a backlog state over without blocking. A full inbox drops it;
    /// the next poll supersedes it anyway.
    pub fn offer(&self, state: BacklogState) -> bool {
        match self.inbox.try_send(state) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(state)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %state.topic, "Recovery inbox full; backlog state dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(state)) => {
                debug!(topic = %state.topic, "Recovery manager stopped; backlog state dropped");
                false
            }
        }
    }

    /// Process a backlog state synchronously.
    pub fn apply(&self, state: &BacklogState) -> Option<Transition> {
        self.shared.apply(state)
    }

    /// Mode flag for `topic`, creating the topic in Normal mode if unknown.
    pub fn register_topic(&self, topic: &str) -> ModeFlag {
        self.shared.topic(topic).flag.clone()
    }

    /// Drop the state kept for `topic`. A later observation starts it again
    /// in Normal mode with a fresh flag.
    pub fn forget_topic(&self, topic: &str) -> bool {
        let removed = self.shared.topics.write().remove(topic).is_some();
        if removed {
            metrics::set_recovering(topic, false);
            debug!(topic = %topic, "Recovery state dropped");
        }
        removed
    }

    pub fn mode(&self, topic: &str) -> RecoveryMode {
        self.shared
            .topics
            .read()
            .get(topic)
            .map_or(RecoveryMode::Normal, |t| t.flag.load())
    }

    pub fn is_recovering(&self, topic: &str) -> bool {
        self.mode(topic) == RecoveryMode::Recovering
    }

    pub fn tuning(&self, topic: &str) -> RecoveryTuning {
        RecoveryTuning::for_mode(
            self.mode(topic),
            self.shared.queue_multiplier,
            self.shared.config.batch_multiplier,
        )
    }

    /// Enter Recovering now, regardless of backlog.
    pub fn force_recovery(&self, topic: &str) -> Option<Transition> {
        self.shared.force(topic, RecoveryMode::Recovering)
    }

    /// Return to Normal now, ignoring the dwell time.
    pub fn force_normal(&self, topic: &str) -> Option<Transition> {
        self.shared.force(topic, RecoveryMode::Normal)
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener<ModeChange>>) {
        self.shared.listeners.add(listener);
    }

    /// Start draining the inbox. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(mut receiver) = self.receiver.lock().take() else {
            return;
        };
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!("Recovery manager shutdown signal received");
                        break;
                    }
                    state = receiver.recv() => match state {
                        Some(state) => {
                            shared.apply(&state);
                        }
                        None => break,
                    },
                }
            }
        });
        *self.task.lock() = Some(task);
        info!("Recovery manager started");
    }

    /// Stop draining the inbox. Idempotent.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
            info!("Recovery manager stopped");
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        let topics = self.shared.topics.read();
        let mut recovering_topics: Vec<String> = topics
            .iter()
            .filter(|(_, t)| t.flag.is_recovering())
            .map(|(name, _)| name.clone())
            .collect();
        recovering_topics.sort();
        RecoveryStats {
            topics: topics.len(),
            recovering_topics,
            transitions: self.shared.transitions.load(Ordering::Relaxed),
            last_transition: *self.shared.last_transition.read(),
            dropped_states: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}
