//! # Backlog Types
//!
//! Lag samples read from a transport and the backlog snapshots derived
//! from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Raw lag signal for one topic and consumer group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagSample {
    /// Messages produced but not yet consumed.
    pub count_lag: i64,
    /// Age of the oldest unprocessed message.
    pub time_lag: Duration,
}

impl LagSample {
    pub fn new(count_lag: i64, time_lag: Duration) -> Self {
        Self {
            count_lag,
            time_lag,
        }
    }
}

/// Snapshot produced by the backlog detector.
///
/// Only the latest value per topic is kept (last value wins).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacklogState {
    pub has_backlog: bool,
    pub lag_count: i64,
    pub lag_time: Duration,
    pub timestamp: DateTime<Utc>,
    pub topic: String,
    pub consumer_group: String,
}

impl BacklogState {
    /// Snapshot with no lag, used before the first poll.
    pub fn clear(topic: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            has_backlog: false,
            lag_count: 0,
            lag_time: Duration::ZERO,
            timestamp: Utc::now(),
            topic: topic.into(),
            consumer_group: consumer_group.into(),
        }
    }
}

/// How close the publishing side is to its limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PublisherBacklogSeverity {
    #[default]
    Normal,
    Low,
    Medium,
    High,
    Critical,
}

impl PublisherBacklogSeverity {
    /// Bucket a backlog ratio in `[0, 1]`.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 0.9 {
            Self::Critical
        } else if ratio >= 0.7 {
            Self::High
        } else if ratio >= 0.5 {
            Self::Medium
        } else if ratio >= 0.3 {
            Self::Low
        } else {
            Self::Normal
        }
    }
}

/// Snapshot of publishing pressure over one check window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherBacklogState {
    pub has_backlog: bool,
    /// Publishes in flight when the snapshot was taken.
    pub queue_depth: i64,
    /// Publish attempts per second since the previous check.
    pub publish_rate: f64,
    pub avg_publish_latency: Duration,
    /// Worst of depth, latency and rate against their limits, capped at 1.
    pub backlog_ratio: f64,
    pub timestamp: DateTime<Utc>,
    pub severity: PublisherBacklogSeverity,
}
