//! # Publisher
//!
//! Rate-limited publishing with bounded exponential retry.
//!
//! Every attempt first takes a token from the limiter, then hands the bytes
//! to the transport under whatever is left of the caller's deadline.
//! Transport failures are retried per the [`RetryPolicy`]; closed-bus,
//! invalid-input and deadline failures are returned immediately.
//!
//! Each transport attempt is timed into the [`PublisherBacklogDetector`],
//! which also tracks how many publish calls are in flight. Every finished
//! call is reported once to the publish-outcome listeners.

use super::listeners::{Listener, ListenerSet};
use super::publisher_backlog::PublisherBacklogDetector;
use crate::config::{AdaptiveRateConfig, PublisherConfig, RateLimiterConfig};
use crate::domain::{AdaptiveRateLimiter, RateLimiter};
use crate::error::{validate_topic, EventBusError, EventBusResult};
use crate::metrics;
use crate::ports::outbound::Transport;
use bus_types::{AdaptiveRateStats, Envelope, PublishOptions, RetryPolicy};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

enum PublishLimiter {
    Fixed(RateLimiter),
    Adaptive(AdaptiveRateLimiter),
}

/// Result of one publish call, after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub topic: String,
    pub payload: Arc<[u8]>,
    /// Transport attempts made, zero when the call failed before the first.
    pub attempts: u32,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PublishOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Publishing side of the bus.
pub struct Publisher {
    transport: Arc<dyn Transport>,
    limiter: PublishLimiter,
    config: PublisherConfig,
    backlog: Arc<PublisherBacklogDetector>,
    outcomes: ListenerSet<PublishOutcome>,
    in_flight: AtomicI64,
    published: AtomicU64,
    errors: AtomicU64,
}

/// Keeps the in-flight count right even when the publish future is dropped.
struct InFlight<'a>(&'a Publisher);

impl<'a> InFlight<'a> {
    fn enter(publisher: &'a Publisher) -> Self {
        publisher.track_in_flight(1);
        Self(publisher)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.track_in_flight(-1);
    }
}

impl Publisher {
    /// # Errors
    ///
    /// Returns `Config` when the limiter parameters are rejected.
    pub fn new(
        transport: Arc<dyn Transport>,
        rate: &RateLimiterConfig,
        adaptive: &AdaptiveRateConfig,
        config: &PublisherConfig,
    ) -> EventBusResult<Self> {
        let limiter = if !rate.enabled {
            PublishLimiter::Fixed(RateLimiter::disabled())
        } else if adaptive.enabled {
            PublishLimiter::Adaptive(AdaptiveRateLimiter::new(
                rate.rate_per_second,
                rate.burst,
                adaptive.min_rate,
                adaptive.max_rate,
                adaptive.adapt_interval,
            )?)
        } else {
            PublishLimiter::Fixed(RateLimiter::new(rate.rate_per_second, rate.burst)?)
        };
        Ok(Self {
            transport,
            limiter,
            config: config.clone(),
            backlog: Arc::new(PublisherBacklogDetector::new(config.backlog.clone())),
            outcomes: ListenerSet::new("publish_outcome", config.listener_timeout),
            in_flight: AtomicI64::new(0),
            published: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        })
    }

    pub fn backlog_detector(&self) -> &Arc<PublisherBacklogDetector> {
        &self.backlog
    }

    /// Listen for the result of every publish call.
    pub fn add_outcome_listener(&self, listener: Arc<dyn Listener<PublishOutcome>>) {
        self.outcomes.add(listener);
    }

    /// Publish calls currently in progress.
    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Acquire)
    }

    fn track_in_flight(&self, delta: i64) {
        let depth = self.in_flight.fetch_add(delta, Ordering::AcqRel) + delta;
        self.backlog.update_queue_depth(depth);
        metrics::set_publish_in_flight(depth);
    }

    /// The token bucket gating every attempt.
    pub fn limiter(&self) -> &RateLimiter {
        match &self.limiter {
            PublishLimiter::Fixed(limiter) => limiter,
            PublishLimiter::Adaptive(adaptive) => adaptive.limiter(),
        }
    }

    /// Controller state, when adaptive rate control is enabled.
    pub fn adaptive_stats(&self) -> Option<AdaptiveRateStats> {
        match &self.limiter {
            PublishLimiter::Fixed(_) => None,
            PublishLimiter::Adaptive(adaptive) => Some(adaptive.stats()),
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Publish with the configured timeout and retry policy.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> EventBusResult<()> {
        self.publish_with_options(topic, payload, PublishOptions::default())
            .await
    }

    /// Validate and serialize `envelope`, then publish it.
    pub async fn publish_envelope(&self, topic: &str, envelope: &Envelope) -> EventBusResult<()> {
        let bytes = envelope.to_bytes()?;
        self.publish(topic, &bytes).await
    }

    /// Publish with per-call overrides of timeout and retry policy.
    pub async fn publish_with_options(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> EventBusResult<()> {
        validate_topic(topic)?;
        let policy = options
            .retry_policy
            .unwrap_or_else(|| self.config.retry_policy());
        let deadline = Instant::now() + options.timeout.unwrap_or(self.config.publish_timeout);

        let _in_flight = InFlight::enter(self);
        let mut attempts = 0u32;
        let result = self
            .publish_retrying(topic, payload, &policy, deadline, &mut attempts)
            .await;
        match &result {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                metrics::record_published(topic);
            }
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                metrics::record_publish_error(topic);
            }
        }
        if !self.outcomes.is_empty() {
            self.outcomes.notify(PublishOutcome {
                topic: topic.to_string(),
                payload: Arc::from(payload),
                attempts,
                error: result.as_ref().err().map(ToString::to_string),
                timestamp: Utc::now(),
            });
        }
        result
    }

    async fn publish_retrying(
        &self,
        topic: &str,
        payload: &[u8],
        policy: &RetryPolicy,
        deadline: Instant,
        attempts: &mut u32,
    ) -> EventBusResult<()> {
        let mut attempt = 0u32;
        loop {
            let err = match self.attempt(topic, payload, deadline, attempts).await {
                Ok(()) => {
                    self.record_outcome(true);
                    debug!(topic = %topic, attempt, bytes = payload.len(), "Published");
                    return Ok(());
                }
                Err(e) => e,
            };
            if !is_retryable(&err) {
                return Err(err);
            }
            self.record_outcome(false);

            if attempt >= policy.max_retries {
                warn!(topic = %topic, attempts = attempt + 1, error = %err, "Publish retries exhausted");
                return Err(EventBusError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: err.to_string(),
                });
            }
            let delay = policy.backoff(attempt);
            if Instant::now() + delay > deadline {
                return Err(EventBusError::DeadlineExceeded);
            }
            debug!(
                topic = %topic,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Publish failed; retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        topic: &str,
        payload: &[u8],
        deadline: Instant,
        attempts: &mut u32,
    ) -> EventBusResult<()> {
        self.limiter().wait(Some(deadline)).await?;
        *attempts += 1;
        let started = Instant::now();
        let remaining = deadline.saturating_duration_since(started);
        let result = tokio::time::timeout(remaining, self.transport.publish(topic, payload))
            .await
            .unwrap_or(Err(EventBusError::DeadlineExceeded));
        self.backlog.record_publish(started.elapsed());
        result
    }

    fn record_outcome(&self, ok: bool) {
        if let PublishLimiter::Adaptive(adaptive) = &self.limiter {
            if ok {
                adaptive.record_success();
            } else {
                adaptive.record_error();
            }
        }
    }
}

fn is_retryable(err: &EventBusError) -> bool {
    !matches!(
        err,
        EventBusError::Closed
            | EventBusError::Config { .. }
            | EventBusError::InvalidTopic { .. }
            | EventBusError::Envelope(_)
            | EventBusError::DeadlineExceeded
            | EventBusError::Cancelled
    )
}
