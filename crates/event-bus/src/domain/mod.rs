//! Domain module for the event bus engine
//!
//! Pure state and algorithms with no I/O:
//! - rate_limiter: token bucket with reservations
//! - adaptive: outcome-driven rate control around the bucket
//! - sharding: stable key-to-worker routing
//! - backlog: lag thresholds, publisher limits and read-failure tracking
//! - classifier: default retry / skip / dead-letter decision
//! - recovery: Normal/Recovering state machine and the shared mode flag

pub mod adaptive;
pub mod backlog;
pub mod classifier;
pub mod rate_limiter;
pub mod recovery;
pub mod sharding;

pub use adaptive::AdaptiveRateLimiter;
pub use backlog::{BacklogThresholds, FailureTracker, PublisherThresholds, TopicHealth};
pub use classifier::DefaultErrorClassifier;
pub use rate_limiter::{RateLimiter, Reservation};
pub use recovery::{ModeFlag, RecoveryMode, RecoveryStateMachine, RecoveryTuning, Transition};
pub use sharding::{fnv1a32, shard_for, Keyed};
