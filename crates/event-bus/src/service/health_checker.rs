//! # Health Checker
//!
//! Publishes a [`HealthCheckMessage`] on the health topic: once at start,
//! then every `interval`. Each probe gets `timeout` and no retries; a
//! failure bumps `consecutive_failures`, a success resets it. The checker
//! reports healthy while failures stay below `failure_threshold`.

use super::listeners::{Listener, ListenerSet};
use super::publisher::Publisher;
use crate::config::HealthCheckConfig;
use crate::error::EventBusResult;
use crate::metrics;
use bus_types::{BusType, HealthCheckMessageBuilder, HealthCheckStatus, PublishOptions, RetryPolicy};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

const STATUS_LISTENER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct CheckState {
    consecutive_failures: u32,
    total_checks: u64,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct Shared {
    config: HealthCheckConfig,
    publisher: Arc<Publisher>,
    bus_type: BusType,
    instance_id: String,
    state: Mutex<CheckState>,
    listeners: ListenerSet<HealthCheckStatus>,
}

impl Shared {
    async fn probe(&self) -> EventBusResult<()> {
        let message = HealthCheckMessageBuilder::new(&self.config.source, self.bus_type)
            .check_type("periodic")
            .instance_id(&self.instance_id)
            .build();
        let result = match message.to_bytes() {
            Ok(bytes) => {
                let options = PublishOptions::default()
                    .with_timeout(self.config.timeout)
                    .with_retry_policy(RetryPolicy::none());
                self.publisher
                    .publish_with_options(&self.config.topic, &bytes, options)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        {
            let mut state = self.state.lock();
            state.total_checks += 1;
            match &result {
                Ok(()) => {
                    state.consecutive_failures = 0;
                    state.last_success = Some(Utc::now());
                    debug!(
                        topic = %self.config.topic,
                        message_id = %message.message_id,
                        "Health check published"
                    );
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    state.last_failure = Some(Utc::now());
                    state.last_error = Some(e.to_string());
                    error!(
                        topic = %self.config.topic,
                        consecutive_failures = state.consecutive_failures,
                        error = %e,
                        "Health check publish failed"
                    );
                }
            }
        }
        metrics::record_health_check(result.is_ok());
        self.listeners.notify(self.status());
        result
    }

    fn status(&self) -> HealthCheckStatus {
        let state = self.state.lock();
        HealthCheckStatus {
            is_healthy: state.consecutive_failures < self.config.failure_threshold,
            consecutive_failures: state.consecutive_failures,
            total_checks: state.total_checks,
            last_success_time: state.last_success,
            last_failure_time: state.last_failure,
            last_error: state.last_error.clone(),
            source: self.config.source.clone(),
            event_bus_type: self.bus_type.as_str().to_string(),
        }
    }
}

/// Periodic health-probe publisher.
pub struct HealthChecker {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig, publisher: Arc<Publisher>, bus_type: BusType) -> Self {
        let instance_id = format!("{}-{}", config.source, std::process::id());
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                publisher,
                bus_type,
                instance_id,
                state: Mutex::new(CheckState::default()),
                listeners: ListenerSet::new("health-check", STATUS_LISTENER_TIMEOUT),
            }),
            shutdown,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Called with the status snapshot after every probe.
    pub fn add_listener(&self, listener: Arc<dyn Listener<HealthCheckStatus>>) {
        self.shared.listeners.add(listener);
    }

    /// Start the probe loop. Idempotent.
    pub fn start(&self) {
        if self.stopped.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(shared.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        // outcome is recorded in the status
                        let _ = shared.probe().await;
                    }
                }
            }
        });
        *self.task.lock() = Some(handle);
        info!(
            topic = %self.shared.config.topic,
            interval_ms = self.shared.config.interval.as_millis() as u64,
            "Health checker started"
        );
    }

    /// Stop the probe loop. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!(topic = %self.shared.config.topic, "Health checker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }

    /// Publish one probe now, outside the schedule.
    pub async fn check_now(&self) -> EventBusResult<()> {
        self.shared.probe().await
    }

    pub fn status(&self) -> HealthCheckStatus {
        self.shared.status()
    }

    pub fn is_healthy(&self) -> bool {
        self.status().is_healthy
    }
}
