//! Error types for the event bus engine

use bus_types::{EnvelopeError, HealthCheckError};
use std::time::Duration;
use thiserror::Error;

/// Event bus errors
#[derive(Debug, Clone, Error)]
pub enum EventBusError {
    /// Operation attempted after `close`
    #[error("event bus is closed")]
    Closed,

    /// Rejected configuration or call parameters
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    /// Topic name violates transport constraints
    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: String },

    /// Transport publish/subscribe call failed
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// Business handler returned an error
    #[error("handler error: {reason}")]
    Handler { reason: String },

    /// Business handler panicked
    #[error("handler panicked: {reason}")]
    HandlerPanic { reason: String },

    /// Business handler exceeded its processing timeout
    #[error("handler timed out after {timeout:?}")]
    HandlerTimeout { timeout: Duration },

    /// Worker queue stayed full for the whole wait budget
    #[error("worker {worker} queue full")]
    QueueFull { worker: usize },

    /// Keyed worker pool no longer accepts work
    #[error("keyed worker pool is stopped")]
    PoolStopped,

    /// Non-blocking acquire found no token
    #[error("rate limit exceeded")]
    RateLimited,

    /// Caller cancelled a blocking call
    #[error("operation cancelled")]
    Cancelled,

    /// Deadline passed (or cannot be met) before the operation completed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Lag signal could not be read from the transport
    #[error("lag read failed for {topic}: {reason}")]
    LagRead { topic: String, reason: String },

    /// Publish failed on every attempt allowed by the retry policy
    #[error("publish failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    HealthCheck(#[from] HealthCheckError),
}

impl EventBusError {
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler {
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// True when the error came from using a closed bus.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Config { .. } => "config",
            Self::InvalidTopic { .. } => "invalid_topic",
            Self::Transport { .. } => "transport",
            Self::Handler { .. } => "handler",
            Self::HandlerPanic { .. } => "panic",
            Self::HandlerTimeout { .. } => "timeout",
            Self::QueueFull { .. } => "queue_full",
            Self::PoolStopped => "pool_stopped",
            Self::RateLimited => "rate_limited",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline",
            Self::LagRead { .. } => "lag_read",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Envelope(_) => "envelope",
            Self::HealthCheck(_) => "health_check",
        }
    }
}

/// Result type for event bus operations
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Maximum topic length accepted by every transport.
pub const MAX_TOPIC_LEN: usize = 255;

/// Reject topics that no transport can carry.
pub fn validate_topic(topic: &str) -> EventBusResult<()> {
    let invalid = |reason: &str| EventBusError::InvalidTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };
    if topic.is_empty() {
        return Err(invalid("topic is empty"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(invalid("topic longer than 255 bytes"));
    }
    if topic.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("topic contains whitespace or control characters"));
    }
    if topic.starts_with('.') || topic.ends_with('.') || topic.contains("..") {
        return Err(invalid("topic has an empty segment"));
    }
    Ok(())
}
