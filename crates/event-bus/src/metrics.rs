//! # Event Bus Metrics
//!
//! Prometheus metrics for publish/consume throughput, backlog, and recovery.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! event-bus = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `event_bus_published_total` - Messages published (by topic)
//! - `event_bus_publish_errors_total` - Failed publish calls (by topic)
//! - `event_bus_consumed_total` - Messages handled successfully (by topic)
//! - `event_bus_consume_errors_total` - Handler failures (by topic, kind)
//! - `event_bus_dead_letters_total` - Messages sent to the dead-letter topic
//! - `event_bus_queue_full_total` - Keyed pool enqueue timeouts (by pool)
//! - `event_bus_consumer_lag` - Latest count lag (by topic)
//! - `event_bus_lag_read_failures_total` - Failed lag reads (by topic)
//! - `event_bus_recovery_mode` - 1 while a topic is recovering
//! - `event_bus_active_subscriptions` - Active subscriptions
//! - `event_bus_health_checks_total` - Health probes published (by result)
//! - `event_bus_publish_in_flight` - Publish calls not yet finished

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter_vec, register_int_gauge, register_int_gauge_vec, IntCounterVec,
    IntGauge, IntGaugeVec,
};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref PUBLISHED: IntCounterVec = register_int_counter_vec!(
        "event_bus_published_total",
        "Total number of messages published",
        &["topic"]
    )
    .expect("Failed to create PUBLISHED metric");

    pub static ref PUBLISH_ERRORS: IntCounterVec = register_int_counter_vec!(
        "event_bus_publish_errors_total",
        "Total number of failed publish calls",
        &["topic"]
    )
    .expect("Failed to create PUBLISH_ERRORS metric");

    pub static ref CONSUMED: IntCounterVec = register_int_counter_vec!(
        "event_bus_consumed_total",
        "Total number of messages handled successfully",
        &["topic"]
    )
    .expect("Failed to create CONSUMED metric");

    /// Handler failures, labeled by error kind
    pub static ref CONSUME_ERRORS: IntCounterVec = register_int_counter_vec!(
        "event_bus_consume_errors_total",
        "Total number of handler failures",
        &["topic", "kind"]
    )
    .expect("Failed to create CONSUME_ERRORS metric");

    pub static ref DEAD_LETTERS: IntCounterVec = register_int_counter_vec!(
        "event_bus_dead_letters_total",
        "Total number of messages routed to a dead-letter topic",
        &["topic"]
    )
    .expect("Failed to create DEAD_LETTERS metric");

    pub static ref QUEUE_FULL: IntCounterVec = register_int_counter_vec!(
        "event_bus_queue_full_total",
        "Total number of keyed pool enqueue timeouts",
        &["pool"]
    )
    .expect("Failed to create QUEUE_FULL metric");

    pub static ref CONSUMER_LAG: IntGaugeVec = register_int_gauge_vec!(
        "event_bus_consumer_lag",
        "Latest observed count lag",
        &["topic"]
    )
    .expect("Failed to create CONSUMER_LAG metric");

    pub static ref LAG_READ_FAILURES: IntCounterVec = register_int_counter_vec!(
        "event_bus_lag_read_failures_total",
        "Total number of failed lag reads",
        &["topic"]
    )
    .expect("Failed to create LAG_READ_FAILURES metric");

    /// Recovery mode flag (0=Normal, 1=Recovering)
    pub static ref RECOVERY_MODE: IntGaugeVec = register_int_gauge_vec!(
        "event_bus_recovery_mode",
        "Whether the topic is in recovery mode (0=no, 1=yes)",
        &["topic"]
    )
    .expect("Failed to create RECOVERY_MODE metric");

    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = register_int_gauge!(
        "event_bus_active_subscriptions",
        "Number of active subscriptions"
    )
    .expect("Failed to create ACTIVE_SUBSCRIPTIONS metric");

    pub static ref HEALTH_CHECKS: IntCounterVec = register_int_counter_vec!(
        "event_bus_health_checks_total",
        "Total number of health probes published",
        &["result"]
    )
    .expect("Failed to create HEALTH_CHECKS metric");

    pub static ref PUBLISH_IN_FLIGHT: IntGauge = register_int_gauge!(
        "event_bus_publish_in_flight",
        "Number of publish calls not yet finished"
    )
    .expect("Failed to create PUBLISH_IN_FLIGHT metric");
}

// =============================================================================
// METRIC RECORDING FUNCTIONS
// =============================================================================

#[cfg(feature = "metrics")]
pub fn record_published(topic: &str) {
    PUBLISHED.with_label_values(&[topic]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_publish_error(topic: &str) {
    PUBLISH_ERRORS.with_label_values(&[topic]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_consumed(topic: &str) {
    CONSUMED.with_label_values(&[topic]).inc();
}

/// Record a handler failure with its error kind
#[cfg(feature = "metrics")]
pub fn record_consume_error(topic: &str, kind: &str) {
    CONSUME_ERRORS.with_label_values(&[topic, kind]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_dead_letter(topic: &str) {
    DEAD_LETTERS.with_label_values(&[topic]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_queue_full(pool: &str) {
    QUEUE_FULL.with_label_values(&[pool]).inc();
}

#[cfg(feature = "metrics")]
pub fn set_lag(topic: &str, lag_count: i64) {
    CONSUMER_LAG.with_label_values(&[topic]).set(lag_count);
}

#[cfg(feature = "metrics")]
pub fn record_lag_read_failure(topic: &str) {
    LAG_READ_FAILURES.with_label_values(&[topic]).inc();
}

#[cfg(feature = "metrics")]
pub fn set_recovering(topic: &str, recovering: bool) {
    RECOVERY_MODE
        .with_label_values(&[topic])
        .set(i64::from(recovering));
}

#[cfg(feature = "metrics")]
pub fn set_active_subscriptions(count: usize) {
    ACTIVE_SUBSCRIPTIONS.set(i64::try_from(count).unwrap_or(i64::MAX));
}

#[cfg(feature = "metrics")]
pub fn record_health_check(ok: bool) {
    let result = if ok { "success" } else { "failure" };
    HEALTH_CHECKS.with_label_values(&[result]).inc();
}

#[cfg(feature = "metrics")]
pub fn set_publish_in_flight(depth: i64) {
    PUBLISH_IN_FLIGHT.set(depth);
}

// =============================================================================
// NO-OP IMPLEMENTATIONS (when metrics feature disabled)
// =============================================================================

#[cfg(not(feature = "metrics"))]
pub fn record_published(_topic: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_publish_error(_topic: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_consumed(_topic: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_consume_error(_topic: &str, _kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_dead_letter(_topic: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_queue_full(_pool: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn set_lag(_topic: &str, _lag_count: i64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_lag_read_failure(_topic: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn set_recovering(_topic: &str, _recovering: bool) {}

#[cfg(not(feature = "metrics"))]
pub fn set_active_subscriptions(_count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_health_check(_ok: bool) {}

#[cfg(not(feature = "metrics"))]
pub fn set_publish_in_flight(_depth: i64) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_never_panics() {
        record_published("orders");
        record_publish_error("orders");
        record_consumed("orders");
        record_consume_error("orders", "handler_panic");
        record_dead_letter("orders");
        record_queue_full("orders#1");
        set_lag("orders", 1200);
        record_lag_read_failure("orders");
        set_recovering("orders", true);
        set_active_subscriptions(3);
        record_health_check(false);
        set_publish_in_flight(2);
    }
}
