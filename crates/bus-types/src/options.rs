//! # Subscribe and Publish Options

use crate::routing::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default consumer group used when a subscription names none.
pub const DEFAULT_CONSUMER_GROUP: &str = "default";

/// Per-subscription options captured at subscribe time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    /// Route through the keyed-worker pool for per-aggregate ordering.
    pub use_keyed_pool: bool,
    /// Upper bound on a single handler invocation. Timeouts count as errors.
    pub processing_timeout: Duration,
    /// Consumer-side throttle in messages per second; `None` disables it.
    pub rate_limit: Option<f64>,
    pub rate_burst: u32,
    /// In-place retries for failures classified as retryable.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub consumer_group: String,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            use_keyed_pool: true,
            processing_timeout: Duration::from_secs(30),
            rate_limit: Some(1000.0),
            rate_burst: 1000,
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_string(),
        }
    }
}

impl SubscribeOptions {
    /// Deliver directly on the transport's task, without keyed ordering.
    #[must_use]
    pub fn unordered(mut self) -> Self {
        self.use_keyed_pool = false;
        self
    }

    #[must_use]
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_rate_limit(mut self, rate: f64, burst: u32) -> Self {
        self.rate_limit = Some(rate);
        self.rate_burst = burst;
        self
    }

    /// Drop the consumer-side throttle.
    #[must_use]
    pub fn unthrottled(mut self) -> Self {
        self.rate_limit = None;
        self
    }

    #[must_use]
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = group.into();
        self
    }
}

/// Per-call publish options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Overall deadline for the publish including retries.
    pub timeout: Option<Duration>,
    pub retry_policy: Option<RetryPolicy>,
}

impl PublishOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }
}
