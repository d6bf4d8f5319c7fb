//! # Bus Types
//!
//! Data model shared by the event bus engine, its transports, and callers.
//!
//! ## Contents
//!
//! - [`Envelope`]: the unit of ordered work, keyed by aggregate id
//! - [`BacklogState`] / [`LagSample`]: consumer lag snapshots
//! - [`PublisherBacklogState`]: publishing pressure snapshots
//! - [`RouteDecision`] / [`ErrorAction`] / [`RetryPolicy`]: per-message routing and
//!   failure handling
//! - [`SubscribeOptions`] / [`PublishOptions`]
//! - statistics snapshots and the health-check wire message

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod backlog;
pub mod envelope;
pub mod errors;
pub mod health;
pub mod options;
pub mod routing;
pub mod stats;

pub use backlog::{BacklogState, LagSample, PublisherBacklogSeverity, PublisherBacklogState};
pub use envelope::{extract_aggregate_id, validate_aggregate_id, Envelope};
pub use errors::{EnvelopeError, HealthCheckError};
pub use health::{
    health_check_topic, AlertSeverity, BusType, HealthAlert, HealthCheckMessage,
    HealthCheckMessageBuilder, HealthCheckStatus, HealthSubscriberStats,
    DEFAULT_HEALTH_CHECK_TOPIC,
};
pub use options::{PublishOptions, SubscribeOptions, DEFAULT_CONSUMER_GROUP};
pub use routing::{ErrorAction, ErrorActionType, RetryPolicy, RouteDecision};
pub use stats::{AdaptiveRateStats, BusMetrics, RateLimiterStats, SubscriberStats};
