//! # Rate Limiter
//!
//! Token bucket limiter for the publishing side of the bus.
//!
//! ## Algorithm
//!
//! - Tokens refill continuously at `rate` per second up to `burst`
//! - Each publish consumes one token
//! - Reservations may drive the balance negative; the deficit is the wait
//!
//! A disabled limiter answers every call immediately and successfully, so
//! callers never branch on whether limiting is configured.

use crate::error::{EventBusError, EventBusResult};
use bus_types::RateLimiterStats;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Waits longer than this are logged as a backpressure warning.
pub const SLOW_WAIT_THRESHOLD: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Bucket {
    rate: f64,
    burst: u32,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        let cap = f64::from(self.burst);
        if self.tokens < cap {
            self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(cap);
        }
    }

    /// Delay until one more token would be available, without consuming.
    fn delay_for_next(&self) -> Duration {
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        let deficit = 1.0 - self.tokens;
        Duration::from_secs_f64(deficit / self.rate)
    }
}

/// Result of [`RateLimiter::reserve`].
#[derive(Debug)]
#[must_use = "a reservation holds a token until cancelled"]
pub struct Reservation<'a> {
    limiter: &'a RateLimiter,
    delay: Duration,
    consumed: bool,
}

impl Reservation<'_> {
    /// How long the caller must wait before acting on the reservation.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Give the token back.
    pub fn cancel(mut self) {
        if self.consumed {
            self.limiter.refund();
            self.consumed = false;
        }
    }
}

/// Refunds a reserved token if the waiting future is dropped early.
struct RefundGuard<'a> {
    limiter: &'a RateLimiter,
    armed: bool,
}

impl RefundGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for RefundGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.limiter.refund();
        }
    }
}

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create an enabled limiter with a full bucket.
    ///
    /// # Errors
    ///
    /// Rejects a non-positive or non-finite rate and a zero burst.
    pub fn new(rate_per_second: f64, burst: u32) -> EventBusResult<Self> {
        validate_rate(rate_per_second)?;
        validate_burst(burst)?;
        Ok(Self {
            enabled: true,
            bucket: Mutex::new(Bucket {
                rate: rate_per_second,
                burst,
                tokens: f64::from(burst),
                last_refill: Instant::now(),
            }),
        })
    }

    /// A limiter whose every call succeeds immediately.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            bucket: Mutex::new(Bucket {
                rate: f64::INFINITY,
                burst: u32::MAX,
                tokens: f64::INFINITY,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current refill rate in tokens per second.
    pub fn limit(&self) -> f64 {
        self.bucket.lock().rate
    }

    pub fn burst(&self) -> u32 {
        self.bucket.lock().burst
    }

    /// Non-blocking check-and-consume.
    pub fn allow(&self) -> bool {
        if !self.enabled {
            return true;
        }
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Like [`allow`](Self::allow) but returns `RateLimited` when no token is free.
    pub fn try_acquire(&self) -> EventBusResult<()> {
        if self.allow() {
            Ok(())
        } else {
            Err(EventBusError::RateLimited)
        }
    }

    /// Take a token from the future budget and report how long to wait.
    pub fn reserve(&self) -> Reservation<'_> {
        if !self.enabled {
            return Reservation {
                limiter: self,
                delay: Duration::ZERO,
                consumed: false,
            };
        }
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        let delay = bucket.delay_for_next();
        bucket.tokens -= 1.0;
        Reservation {
            limiter: self,
            delay,
            consumed: true,
        }
    }

    /// Block until a token is available or `deadline` passes.
    ///
    /// Fails fast with `DeadlineExceeded`, consuming nothing, when the
    /// required wait ends after the deadline. Dropping the returned future
    /// before it completes refunds the token.
    pub async fn wait(&self, deadline: Option<Instant>) -> EventBusResult<()> {
        self.wait_inner(deadline, None).await
    }

    /// [`wait`](Self::wait) that also returns `Cancelled` once `cancel` reads `true`.
    pub async fn wait_with_cancel(
        &self,
        deadline: Option<Instant>,
        cancel: watch::Receiver<bool>,
    ) -> EventBusResult<()> {
        self.wait_inner(deadline, Some(cancel)).await
    }

    async fn wait_inner(
        &self,
        deadline: Option<Instant>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> EventBusResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if cancel.as_ref().is_some_and(|c| *c.borrow()) {
            return Err(EventBusError::Cancelled);
        }

        let started = Instant::now();
        let delay = {
            let mut bucket = self.bucket.lock();
            bucket.refill(started);
            let delay = bucket.delay_for_next();
            if let Some(deadline) = deadline {
                if started + delay > deadline {
                    return Err(EventBusError::DeadlineExceeded);
                }
            }
            bucket.tokens -= 1.0;
            delay
        };
        if delay.is_zero() {
            return Ok(());
        }

        let guard = RefundGuard {
            limiter: self,
            armed: true,
        };
        match cancel {
            Some(mut cancel) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_for_cancel(&mut cancel) => {
                        debug!(waited_ms = started.elapsed().as_millis() as u64, "Rate limiter wait cancelled");
                        return Err(EventBusError::Cancelled);
                    }
                }
            }
            None => tokio::time::sleep(delay).await,
        }
        guard.disarm();

        let waited = started.elapsed();
        if waited > SLOW_WAIT_THRESHOLD {
            warn!(
                waited_ms = waited.as_millis() as u64,
                rate = self.limit(),
                "Rate limiter wait exceeded threshold"
            );
        }
        Ok(())
    }

    /// Change the refill rate, keeping tokens accumulated so far.
    pub fn set_limit(&self, rate_per_second: f64) -> EventBusResult<()> {
        validate_rate(rate_per_second)?;
        if !self.enabled {
            return Ok(());
        }
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.rate = rate_per_second;
        Ok(())
    }

    /// Change the bucket capacity, keeping tokens up to the new capacity.
    pub fn set_burst(&self, burst: u32) -> EventBusResult<()> {
        validate_burst(burst)?;
        if !self.enabled {
            return Ok(());
        }
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.burst = burst;
        bucket.tokens = bucket.tokens.min(f64::from(burst));
        Ok(())
    }

    /// Tokens available right now (never negative).
    pub fn available(&self) -> f64 {
        if !self.enabled {
            return f64::INFINITY;
        }
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        bucket.tokens.max(0.0)
    }

    pub fn stats(&self) -> RateLimiterStats {
        if !self.enabled {
            return RateLimiterStats {
                enabled: false,
                rate_limit: 0.0,
                burst_size: 0,
                tokens_available: 0.0,
            };
        }
        let mut bucket = self.bucket.lock();
        bucket.refill(Instant::now());
        RateLimiterStats {
            enabled: true,
            rate_limit: bucket.rate,
            burst_size: bucket.burst,
            tokens_available: bucket.tokens.max(0.0),
        }
    }

    fn refund(&self) {
        let mut bucket = self.bucket.lock();
        bucket.tokens = (bucket.tokens + 1.0).min(f64::from(bucket.burst));
    }
}

async fn wait_for_cancel(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender gone: the signal can never fire.
            std::future::pending::<()>().await;
        }
    }
}

fn validate_rate(rate: f64) -> EventBusResult<()> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(EventBusError::config(format!(
            "rate must be positive and finite, got {rate}"
        )))
    }
}

fn validate_burst(burst: u32) -> EventBusResult<()> {
    if burst == 0 {
        return Err(EventBusError::config("burst must be at least 1"));
    }
    Ok(())
}
