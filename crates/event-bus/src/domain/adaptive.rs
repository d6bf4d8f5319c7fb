//! Adaptive rate control
//!
//! Wraps a [`RateLimiter`] with exponential moving averages of publish
//! outcomes and nudges the rate toward what downstream can absorb. Bounds
//! are fixed at construction; the single update step runs under one lock.

use super::rate_limiter::RateLimiter;
use crate::error::{EventBusError, EventBusResult};
use bus_types::AdaptiveRateStats;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Weight kept from the previous average on each observation.
const EMA_DECAY: f64 = 0.9;
/// Error rate above which the rate is cut.
const ERROR_THRESHOLD: f64 = 0.1;
/// Success rate above which the rate is raised.
const SUCCESS_THRESHOLD: f64 = 0.9;
const DECREASE_FACTOR: f64 = 0.8;
const INCREASE_FACTOR: f64 = 1.2;

#[derive(Debug)]
struct ControlState {
    error_rate: f64,
    success_rate: f64,
    last_adapt: Option<Instant>,
    last_adapt_wall: DateTime<Utc>,
}

/// Outcome-driven wrapper around the token bucket.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    limiter: RateLimiter,
    base_rate: f64,
    min_rate: f64,
    max_rate: f64,
    adapt_interval: Duration,
    state: Mutex<ControlState>,
}

impl AdaptiveRateLimiter {
    /// # Errors
    ///
    /// Rejects bounds where `min_rate > max_rate`, non-positive bounds, or a
    /// base rate outside the bounds.
    pub fn new(
        base_rate: f64,
        burst: u32,
        min_rate: f64,
        max_rate: f64,
        adapt_interval: Duration,
    ) -> EventBusResult<Self> {
        if !(min_rate > 0.0 && min_rate <= max_rate && max_rate.is_finite()) {
            return Err(EventBusError::config(format!(
                "adaptive bounds invalid: min {min_rate}, max {max_rate}"
            )));
        }
        if !(min_rate..=max_rate).contains(&base_rate) {
            return Err(EventBusError::config(format!(
                "base rate {base_rate} outside [{min_rate}, {max_rate}]"
            )));
        }
        Ok(Self {
            limiter: RateLimiter::new(base_rate, burst)?,
            base_rate,
            min_rate,
            max_rate,
            adapt_interval,
            state: Mutex::new(ControlState {
                error_rate: 0.0,
                success_rate: 0.0,
                last_adapt: None,
                last_adapt_wall: Utc::now(),
            }),
        })
    }

    /// The wrapped token bucket.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn record_success(&self) {
        self.observe(false, Instant::now());
    }

    pub fn record_error(&self) {
        self.observe(true, Instant::now());
    }

    fn observe(&self, is_error: bool, now: Instant) {
        let mut state = self.state.lock();
        let (error_signal, success_signal) = if is_error { (1.0, 0.0) } else { (0.0, 1.0) };
        state.error_rate = state.error_rate * EMA_DECAY + error_signal * (1.0 - EMA_DECAY);
        state.success_rate = state.success_rate * EMA_DECAY + success_signal * (1.0 - EMA_DECAY);

        if let Some(last) = state.last_adapt {
            if now.saturating_duration_since(last) < self.adapt_interval {
                return;
            }
        }

        let current = self.limiter.limit();
        let proposed = if state.error_rate > ERROR_THRESHOLD {
            current * DECREASE_FACTOR
        } else if state.success_rate > SUCCESS_THRESHOLD {
            current * INCREASE_FACTOR
        } else {
            return;
        };
        let next = proposed.clamp(self.min_rate, self.max_rate);
        if (next - current).abs() < f64::EPSILON {
            return;
        }
        if self.limiter.set_limit(next).is_ok() {
            state.last_adapt = Some(now);
            state.last_adapt_wall = Utc::now();
            info!(
                from = current,
                to = next,
                error_rate = state.error_rate,
                success_rate = state.success_rate,
                "Adaptive rate adjusted"
            );
        }
    }

    pub fn stats(&self) -> AdaptiveRateStats {
        let state = self.state.lock();
        AdaptiveRateStats {
            limiter: self.limiter.stats(),
            base_rate: self.base_rate,
            min_rate: self.min_rate,
            max_rate: self.max_rate,
            error_rate: state.error_rate,
            success_rate: state.success_rate,
            last_adapt: state.last_adapt_wall,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(interval: Duration) -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new(100.0, 10, 50.0, 130.0, interval).unwrap()
    }

    #[test]
    fn test_rejects_bad_bounds() {
        assert!(AdaptiveRateLimiter::new(10.0, 1, 20.0, 5.0, Duration::ZERO).is_err());
        assert!(AdaptiveRateLimiter::new(100.0, 1, 1.0, 50.0, Duration::ZERO).is_err());
        assert!(AdaptiveRateLimiter::new(10.0, 1, 0.0, 50.0, Duration::ZERO).is_err());
    }

    #[test]
    fn test_errors_cut_rate_down_to_floor() {
        let adaptive = limiter(Duration::ZERO);
        adaptive.record_error();
        // 0.1 is not above the threshold yet.
        assert_eq!(adaptive.limiter().limit(), 100.0);

        adaptive.record_error();
        assert!((adaptive.limiter().limit() - 80.0).abs() < 1e-9);

        for _ in 0..50 {
            adaptive.record_error();
        }
        assert_eq!(adaptive.limiter().limit(), 50.0);
    }

    #[test]
    fn test_successes_raise_rate_to_ceiling() {
        let adaptive = limiter(Duration::ZERO);
        for _ in 0..21 {
            adaptive.record_success();
        }
        // success EMA crosses 0.9 after 22 observations
        assert_eq!(adaptive.limiter().limit(), 100.0);
        adaptive.record_success();
        assert!((adaptive.limiter().limit() - 120.0).abs() < 1e-9);

        adaptive.record_success();
        assert_eq!(adaptive.limiter().limit(), 130.0);
    }

    #[test]
    fn test_adapt_interval_throttles_changes() {
        let adaptive = limiter(Duration::from_secs(3600));
        for _ in 0..30 {
            adaptive.record_error();
        }
        // One adjustment, then the interval blocks further ones.
        assert!((adaptive.limiter().limit() - 80.0).abs() < 1e-9);
        let stats = adaptive.stats();
        assert!(stats.error_rate > 0.9);
        assert_eq!(stats.min_rate, 50.0);
        assert_eq!(stats.base_rate, 100.0);
    }
}
