//! # Statistics Snapshots
//!
//! Read-only views recomputed on demand from atomic counters. None of
//! these are a source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Token bucket snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub rate_limit: f64,
    pub burst_size: u32,
    pub tokens_available: f64,
}

/// Adaptive limiter snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveRateStats {
    pub limiter: RateLimiterStats,
    pub base_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub error_rate: f64,
    pub success_rate: f64,
    pub last_adapt: DateTime<Utc>,
}

/// Aggregate counters for an advanced subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberStats {
    pub is_started: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub total_subscriptions: u64,
    pub active_subscriptions: u64,
    pub messages_processed: u64,
    pub processing_errors: u64,
    pub uptime: Duration,
}

/// Counters exported for external monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMetrics {
    pub messages_published: u64,
    pub messages_consumed: u64,
    pub publish_errors: u64,
    pub consume_errors: u64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_check_status: String,
    /// Sum of the latest observed count lag across monitored topics.
    pub message_backlog: i64,
}
