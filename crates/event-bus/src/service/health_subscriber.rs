//! # Health Check Subscriber
//!
//! Monitoring side of the health protocol. Listens on the health topic,
//! and on every monitor tick counts a miss when no valid probe arrived
//! within `interval` (measured from start until the first probe). Each miss
//! raises a [`HealthAlert`] whose severity escalates with the miss count.
//! Any valid probe clears the misses.

use super::listeners::{Listener, ListenerSet};
use crate::config::{HealthCheckConfig, MIN_MONITOR_INTERVAL};
use crate::error::EventBusResult;
use crate::ports::outbound::{ByteHandler, RawMessage, Transport};
use async_trait::async_trait;
use bus_types::{AlertSeverity, HealthAlert, HealthCheckMessage, HealthSubscriberStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const ALERT_LISTENER_TIMEOUT: Duration = Duration::from_secs(5);
const NO_MESSAGES_ALERT: &str = "no_messages";

#[derive(Debug, Default)]
struct MonitorState {
    started_at: Option<Instant>,
    start_time: Option<DateTime<Utc>>,
    last_message_at: Option<Instant>,
    last_message_time: Option<DateTime<Utc>>,
    total_received: u64,
    consecutive_misses: u32,
    total_alerts: u64,
    last_alert_time: Option<DateTime<Utc>>,
}

struct Shared {
    config: HealthCheckConfig,
    state: Mutex<MonitorState>,
    listeners: ListenerSet<HealthAlert>,
}

impl Shared {
    fn receive(&self, payload: &[u8]) {
        let message = match HealthCheckMessage::from_bytes(payload)
            .and_then(|m| m.validate(self.config.message_ttl).map(|()| m))
        {
            Ok(message) => message,
            Err(e) => {
                warn!(topic = %self.config.topic, error = %e, "Ignoring invalid health check message");
                return;
            }
        };

        let mut state = self.state.lock();
        if state.consecutive_misses > 0 {
            info!(
                topic = %self.config.topic,
                misses = state.consecutive_misses,
                "Health check messages resumed"
            );
        }
        state.consecutive_misses = 0;
        state.total_received += 1;
        state.last_message_at = Some(Instant::now());
        state.last_message_time = Some(Utc::now());
        debug!(
            topic = %self.config.topic,
            message_id = %message.message_id,
            source = %message.source,
            "Health check received"
        );
    }

    fn check(&self, now: Instant) {
        let alert = {
            let mut state = self.state.lock();
            let Some(reference) = state.last_message_at.or(state.started_at) else {
                return;
            };
            let since = now.saturating_duration_since(reference);
            if since <= self.config.interval {
                return;
            }

            state.consecutive_misses += 1;
            state.total_alerts += 1;
            let timestamp = Utc::now();
            state.last_alert_time = Some(timestamp);
            HealthAlert {
                alert_type: NO_MESSAGES_ALERT.to_string(),
                severity: AlertSeverity::for_misses(
                    state.consecutive_misses,
                    self.config.failure_threshold,
                ),
                topic: self.config.topic.clone(),
                last_message_time: state.last_message_time,
                time_since_last: since,
                consecutive_misses: state.consecutive_misses,
                timestamp,
            }
        };

        match alert.severity {
            AlertSeverity::Critical => error!(
                topic = %alert.topic,
                misses = alert.consecutive_misses,
                since_ms = alert.time_since_last.as_millis() as u64,
                "Health check messages missing"
            ),
            _ => warn!(
                topic = %alert.topic,
                misses = alert.consecutive_misses,
                severity = ?alert.severity,
                since_ms = alert.time_since_last.as_millis() as u64,
                "Health check message overdue"
            ),
        }
        self.listeners.notify(alert);
    }

    fn stats(&self) -> HealthSubscriberStats {
        let state = self.state.lock();
        HealthSubscriberStats {
            start_time: state.start_time,
            last_message_time: state.last_message_time,
            total_messages_received: state.total_received,
            consecutive_misses: state.consecutive_misses,
            total_alerts: state.total_alerts,
            last_alert_time: state.last_alert_time,
            is_healthy: state.consecutive_misses < self.config.failure_threshold,
            uptime: state.started_at.map_or(Duration::ZERO, |s| s.elapsed()),
        }
    }
}

struct ProbeHandler {
    shared: Arc<Shared>,
}

#[async_trait]
impl ByteHandler for ProbeHandler {
    async fn handle(&self, message: &RawMessage) -> EventBusResult<()> {
        self.shared.receive(&message.payload);
        Ok(())
    }
}

/// Watches the health topic and alerts when probes stop arriving.
pub struct HealthCheckSubscriber {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl HealthCheckSubscriber {
    pub fn new(config: HealthCheckConfig, transport: Arc<dyn Transport>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(MonitorState::default()),
                listeners: ListenerSet::new("health-alert", ALERT_LISTENER_TIMEOUT),
            }),
            transport,
            shutdown,
            task: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn add_alert_listener(&self, listener: Arc<dyn Listener<HealthAlert>>) {
        self.shared.listeners.add(listener);
    }

    /// Subscribe to the health topic and start monitoring. Idempotent.
    pub async fn start(&self) -> EventBusResult<()> {
        if self.stopped.load(Ordering::Acquire) || self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        {
            let mut state = self.shared.state.lock();
            state.started_at = Some(Instant::now());
            state.start_time = Some(Utc::now());
        }

        let handler = Arc::new(ProbeHandler {
            shared: Arc::clone(&self.shared),
        });
        if let Err(e) = self.transport.subscribe(&self.shared.config.topic, handler).await {
            self.started.store(false, Ordering::Release);
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown.subscribe();
        let period = shared.config.monitor_interval.max(MIN_MONITOR_INTERVAL);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => shared.check(Instant::now()),
                }
            }
        });
        *self.task.lock() = Some(handle);
        info!(
            topic = %self.shared.config.topic,
            monitor_interval_ms = period.as_millis() as u64,
            "Health check subscriber started"
        );
        Ok(())
    }

    /// Stop monitoring and leave the health topic. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        if self.started.load(Ordering::Acquire) {
            if let Err(e) = self.transport.unsubscribe(&self.shared.config.topic).await {
                debug!(topic = %self.shared.config.topic, error = %e, "Health topic unsubscribe failed");
            }
        }
        info!(topic = %self.shared.config.topic, "Health check subscriber stopped");
    }

    pub fn is_healthy(&self) -> bool {
        self.stats().is_healthy
    }

    pub fn stats(&self) -> HealthSubscriberStats {
        self.shared.stats()
    }
}
