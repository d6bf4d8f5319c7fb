//! Event bus configuration
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! Durations are written in milliseconds.
//!
//! ```toml
//! [keyed_pool]
//! worker_count = 256
//! queue_size = 500
//! wait_timeout_ms = 200
//!
//! [rate_limiter]
//! enabled = true
//! rate_per_second = 1000.0
//! burst = 2000
//!
//! [backlog]
//! check_interval_ms = 30000
//! lag_threshold = 1000
//! time_threshold_ms = 300000
//!
//! [recovery]
//! min_dwell_ms = 30000
//!
//! [publisher.backlog]
//! max_queue_depth = 1000
//! max_publish_latency_ms = 5000
//! ```

use crate::error::{EventBusError, EventBusResult};
use bus_types::{RetryPolicy, DEFAULT_HEALTH_CHECK_TOPIC};
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Smallest accepted health monitor interval.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Keyed-worker pool sizing.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyedPoolConfig {
    pub worker_count: usize,
    /// Per-worker queue capacity in Normal mode.
    pub queue_size: usize,
    /// How long `route` waits on a full queue. `None` waits indefinitely.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "wait_timeout_ms")]
    pub wait_timeout: Option<Duration>,
    /// Queue capacity multiplier while the topic is recovering.
    pub recovery_queue_multiplier: usize,
    /// Grace period for draining queued work on shutdown.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "shutdown_grace_ms")]
    pub shutdown_grace: Duration,
}

impl Default for KeyedPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1024,
            queue_size: 1000,
            wait_timeout: Some(Duration::from_millis(200)),
            recovery_queue_multiplier: 2,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Publisher token bucket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub rate_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_per_second: 1000.0,
            burst: 2000,
        }
    }
}

/// Adaptive control loop around the publisher bucket.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AdaptiveRateConfig {
    pub enabled: bool,
    pub min_rate: f64,
    pub max_rate: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "adapt_interval_ms")]
    pub adapt_interval: Duration,
}

impl Default for AdaptiveRateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_rate: 10.0,
            max_rate: 10_000.0,
            adapt_interval: Duration::from_secs(10),
        }
    }
}

/// Backlog detection thresholds and polling.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BacklogConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "check_interval_ms")]
    pub check_interval: Duration,
    pub lag_threshold: i64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "time_threshold_ms")]
    pub time_threshold: Duration,
    /// Consecutive lag-read failures before a topic is marked degraded.
    pub failure_threshold: u32,
    /// Timeout for each backlog listener invocation.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "listener_timeout_ms")]
    pub listener_timeout: Duration,
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            lag_threshold: 1000,
            time_threshold: Duration::from_secs(300),
            failure_threshold: 3,
            listener_timeout: Duration::from_secs(10),
        }
    }
}

/// Recovery-mode hysteresis and tuning.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Minimum time in Recovering before returning to Normal.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "min_dwell_ms")]
    pub min_dwell: Duration,
    pub batch_multiplier: usize,
    /// Capacity of the backlog-state inbox; full inbox drops states.
    pub inbox_capacity: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "listener_timeout_ms")]
    pub listener_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            min_dwell: Duration::from_secs(30),
            batch_multiplier: 4,
            inbox_capacity: 256,
            listener_timeout: Duration::from_secs(10),
        }
    }
}

/// Advanced subscriber behaviour.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Timeout for each lifecycle listener invocation.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "listener_timeout_ms")]
    pub listener_timeout: Duration,
    /// Suffix appended to a topic to form its dead-letter topic. Empty disables.
    pub dead_letter_suffix: String,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            listener_timeout: Duration::from_secs(5),
            dead_letter_suffix: ".dlq".to_string(),
        }
    }
}

/// Health-check probe publishing and monitoring.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub topic: String,
    pub source: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "interval_ms")]
    pub interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms")]
    pub timeout: Duration,
    pub failure_threshold: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "message_ttl_ms")]
    pub message_ttl: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "monitor_interval_ms")]
    pub monitor_interval: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_HEALTH_CHECK_TOPIC.to_string(),
            source: "event-bus".to_string(),
            interval: Duration::from_secs(120),
            timeout: Duration::from_secs(10),
            failure_threshold: 3,
            message_ttl: Duration::from_secs(300),
            monitor_interval: Duration::from_secs(30),
        }
    }
}

/// Publisher retry defaults.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub max_retries: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "initial_interval_ms")]
    pub initial_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_interval_ms")]
    pub max_interval: Duration,
    pub multiplier: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "publish_timeout_ms")]
    pub publish_timeout: Duration,
    pub backlog: PublisherBacklogConfig,
    /// Timeout for each publish-outcome listener invocation.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "listener_timeout_ms")]
    pub listener_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_retries: retry.max_retries,
            initial_interval: retry.initial_interval,
            max_interval: retry.max_interval,
            multiplier: retry.multiplier,
            publish_timeout: Duration::from_secs(30),
            backlog: PublisherBacklogConfig::default(),
            listener_timeout: Duration::from_secs(5),
        }
    }
}

impl PublisherConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
        }
    }
}

/// Limits for publisher-side backlog detection. A zero limit is not checked.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PublisherBacklogConfig {
    /// In-flight publishes above which the publisher counts as backlogged.
    pub max_queue_depth: i64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "max_publish_latency_ms")]
    pub max_publish_latency: Duration,
    /// Attempts per second.
    pub rate_threshold: f64,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "check_interval_ms")]
    pub check_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "listener_timeout_ms")]
    pub listener_timeout: Duration,
}

impl Default for PublisherBacklogConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 1000,
            max_publish_latency: Duration::from_secs(5),
            rate_threshold: 500.0,
            check_interval: Duration::from_secs(30),
            listener_timeout: Duration::from_secs(10),
        }
    }
}

/// Complete event bus configuration.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub keyed_pool: KeyedPoolConfig,
    pub rate_limiter: RateLimiterConfig,
    pub adaptive_rate: AdaptiveRateConfig,
    pub backlog: BacklogConfig,
    pub recovery: RecoveryConfig,
    pub subscriber: SubscriberConfig,
    pub health_check: HealthCheckConfig,
    pub publisher: PublisherConfig,
}

impl EventBusConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> EventBusResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            EventBusError::config(format!("cannot read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> EventBusResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| EventBusError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> EventBusResult<()> {
        let pool = &self.keyed_pool;
        ensure(pool.worker_count > 0, "keyed_pool.worker_count must be > 0")?;
        ensure(pool.queue_size > 0, "keyed_pool.queue_size must be > 0")?;
        ensure(
            pool.recovery_queue_multiplier > 0,
            "keyed_pool.recovery_queue_multiplier must be > 0",
        )?;

        let rl = &self.rate_limiter;
        if rl.enabled {
            ensure(
                rl.rate_per_second.is_finite() && rl.rate_per_second > 0.0,
                "rate_limiter.rate_per_second must be positive",
            )?;
            ensure(rl.burst > 0, "rate_limiter.burst must be > 0")?;
        }

        let adaptive = &self.adaptive_rate;
        if adaptive.enabled {
            ensure(
                adaptive.min_rate > 0.0 && adaptive.min_rate <= adaptive.max_rate,
                "adaptive_rate requires 0 < min_rate <= max_rate",
            )?;
            ensure(
                (adaptive.min_rate..=adaptive.max_rate).contains(&rl.rate_per_second),
                "rate_limiter.rate_per_second must lie within adaptive bounds",
            )?;
        }

        let backlog = &self.backlog;
        ensure(
            !backlog.check_interval.is_zero(),
            "backlog.check_interval must be > 0",
        )?;
        ensure(backlog.lag_threshold >= 0, "backlog.lag_threshold must be >= 0")?;
        ensure(
            backlog.failure_threshold > 0,
            "backlog.failure_threshold must be > 0",
        )?;

        ensure(
            self.recovery.inbox_capacity > 0,
            "recovery.inbox_capacity must be > 0",
        )?;

        let health = &self.health_check;
        ensure(!health.topic.is_empty(), "health_check.topic must not be empty")?;
        ensure(!health.interval.is_zero(), "health_check.interval must be > 0")?;
        ensure(
            health.failure_threshold > 0,
            "health_check.failure_threshold must be > 0",
        )?;
        ensure(
            health.monitor_interval >= MIN_MONITOR_INTERVAL,
            "health_check.monitor_interval must be at least 100ms",
        )?;

        let publisher = &self.publisher;
        ensure(
            publisher.multiplier >= 1.0,
            "publisher.multiplier must be >= 1.0",
        )?;
        let pb = &publisher.backlog;
        ensure(
            !pb.check_interval.is_zero(),
            "publisher.backlog.check_interval must be > 0",
        )?;
        ensure(
            pb.max_queue_depth >= 0 && pb.rate_threshold.is_finite() && pb.rate_threshold >= 0.0,
            "publisher.backlog limits must be >= 0",
        )?;
        Ok(())
    }
}

fn ensure(condition: bool, reason: &str) -> EventBusResult<()> {
    if condition {
        Ok(())
    } else {
        Err(EventBusError::config(reason))
    }
}
