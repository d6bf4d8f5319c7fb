//! Backlog evaluation rules

use bus_types::{
    BacklogState, LagSample, PublisherBacklogSeverity, PublisherBacklogState,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Count and age thresholds. Either one exceeded means backlog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BacklogThresholds {
    pub lag_threshold: i64,
    pub time_threshold: Duration,
}

impl BacklogThresholds {
    pub fn is_exceeded(&self, sample: &LagSample) -> bool {
        sample.count_lag > self.lag_threshold || sample.time_lag > self.time_threshold
    }

    /// Build the snapshot for one topic from a raw sample.
    pub fn evaluate(&self, topic: &str, consumer_group: &str, sample: LagSample) -> BacklogState {
        BacklogState {
            has_backlog: self.is_exceeded(&sample),
            lag_count: sample.count_lag,
            lag_time: sample.time_lag,
            timestamp: Utc::now(),
            topic: topic.to_string(),
            consumer_group: consumer_group.to_string(),
        }
    }
}

/// Limits for the publishing side. A zero limit is not checked.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PublisherThresholds {
    pub max_queue_depth: i64,
    pub max_publish_latency: Duration,
    pub rate_threshold: f64,
}

impl PublisherThresholds {
    pub fn is_exceeded(&self, queue_depth: i64, avg_latency: Duration, rate: f64) -> bool {
        (self.max_queue_depth > 0 && queue_depth > self.max_queue_depth)
            || (!self.max_publish_latency.is_zero() && avg_latency > self.max_publish_latency)
            || (self.rate_threshold > 0.0 && rate > self.rate_threshold)
    }

    /// Largest of the three load ratios, capped at 1.
    pub fn ratio(&self, queue_depth: i64, avg_latency: Duration, rate: f64) -> f64 {
        let mut worst = 0.0f64;
        if self.max_queue_depth > 0 {
            worst = worst.max(queue_depth as f64 / self.max_queue_depth as f64);
        }
        if !self.max_publish_latency.is_zero() {
            worst = worst.max(avg_latency.as_secs_f64() / self.max_publish_latency.as_secs_f64());
        }
        if self.rate_threshold > 0.0 {
            worst = worst.max(rate / self.rate_threshold);
        }
        worst.min(1.0)
    }

    pub fn evaluate(
        &self,
        queue_depth: i64,
        avg_latency: Duration,
        rate: f64,
    ) -> PublisherBacklogState {
        let ratio = self.ratio(queue_depth, avg_latency, rate);
        PublisherBacklogState {
            has_backlog: self.is_exceeded(queue_depth, avg_latency, rate),
            queue_depth,
            publish_rate: rate,
            avg_publish_latency: avg_latency,
            backlog_ratio: ratio,
            timestamp: Utc::now(),
            severity: PublisherBacklogSeverity::from_ratio(ratio),
        }
    }
}

/// Whether lag reads for a topic are currently trustworthy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TopicHealth {
    #[default]
    Healthy,
    /// Consecutive lag reads failed; reported, never fatal
    Degraded,
}

/// Counts consecutive lag-read failures for one topic.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    consecutive: u32,
    threshold: u32,
    health: TopicHealth,
}

impl FailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
            health: TopicHealth::Healthy,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn health(&self) -> TopicHealth {
        self.health
    }

    /// Record a failed read. Returns true when this failure degraded the topic.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.threshold && self.health == TopicHealth::Healthy {
            self.health = TopicHealth::Degraded;
            return true;
        }
        false
    }

    /// Record a good read. Returns true when this cleared a degraded topic.
    pub fn record_success(&mut self) -> bool {
        self.consecutive = 0;
        if self.health == TopicHealth::Degraded {
            self.health = TopicHealth::Healthy;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> BacklogThresholds {
        BacklogThresholds {
            lag_threshold: 100,
            time_threshold: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_either_threshold_triggers() {
        let t = thresholds();
        assert!(!t.is_exceeded(&LagSample::new(100, Duration::from_secs(60))));
        assert!(t.is_exceeded(&LagSample::new(101, Duration::ZERO)));
        assert!(t.is_exceeded(&LagSample::new(0, Duration::from_secs(61))));
    }

    #[test]
    fn test_evaluate_copies_sample() {
        let state = thresholds().evaluate("orders", "g1", LagSample::new(500, Duration::ZERO));
        assert!(state.has_backlog);
        assert_eq!(state.lag_count, 500);
        assert_eq!(state.topic, "orders");
        assert_eq!(state.consumer_group, "g1");
    }

    #[test]
    fn test_three_failures_degrade() {
        let mut tracker = FailureTracker::new(3);
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(tracker.record_failure());
        assert_eq!(tracker.health(), TopicHealth::Degraded);
        // Further failures do not re-announce.
        assert!(!tracker.record_failure());

        assert!(tracker.record_success());
        assert_eq!(tracker.health(), TopicHealth::Healthy);
        assert_eq!(tracker.consecutive(), 0);
    }

    #[test]
    fn test_success_resets_streak() {
        let mut tracker = FailureTracker::new(3);
        tracker.record_failure();
        tracker.record_failure();
        assert!(!tracker.record_success());
        assert!(!tracker.record_failure());
        assert_eq!(tracker.health(), TopicHealth::Healthy);
    }

    fn publisher_limits() -> PublisherThresholds {
        PublisherThresholds {
            max_queue_depth: 100,
            max_publish_latency: Duration::from_millis(200),
            rate_threshold: 50.0,
        }
    }

    #[test]
    fn test_publisher_limits_each_trigger() {
        let limits = publisher_limits();
        assert!(!limits.is_exceeded(100, Duration::from_millis(200), 50.0));
        assert!(limits.is_exceeded(101, Duration::ZERO, 0.0));
        assert!(limits.is_exceeded(0, Duration::from_millis(201), 0.0));
        assert!(limits.is_exceeded(0, Duration::ZERO, 50.5));
    }

    #[test]
    fn test_publisher_ratio_takes_worst_and_caps() {
        let limits = publisher_limits();
        let state = limits.evaluate(10, Duration::from_millis(120), 5.0);
        assert!(!state.has_backlog);
        assert!((state.backlog_ratio - 0.6).abs() < 1e-9);
        assert_eq!(state.severity, PublisherBacklogSeverity::Medium);

        let state = limits.evaluate(10_000, Duration::ZERO, 0.0);
        assert!(state.has_backlog);
        assert_eq!(state.backlog_ratio, 1.0);
        assert_eq!(state.severity, PublisherBacklogSeverity::Critical);
    }

    #[test]
    fn test_zero_publisher_limits_are_ignored() {
        let limits = PublisherThresholds {
            max_queue_depth: 0,
            max_publish_latency: Duration::ZERO,
            rate_threshold: 0.0,
        };
        let state = limits.evaluate(1_000_000, Duration::from_secs(60), 1e9);
        assert!(!state.has_backlog);
        assert_eq!(state.backlog_ratio, 0.0);
        assert_eq!(state.severity, PublisherBacklogSeverity::Normal);
    }
}
