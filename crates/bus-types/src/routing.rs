//! # Routing and Failure Classification
//!
//! Per-message routing decisions, handler-failure classification, and
//! retry policy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Output of message routing logic. Computed per message, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub should_process: bool,
    pub priority: i32,
    pub aggregate_id: String,
    /// Worker-pool shard key, normally the aggregate id.
    pub processor_key: String,
    pub metadata: HashMap<String, String>,
}

impl RouteDecision {
    /// Process the message on the shard owning `aggregate_id`.
    pub fn process(aggregate_id: impl Into<String>) -> Self {
        let aggregate_id = aggregate_id.into();
        Self {
            should_process: true,
            priority: 0,
            processor_key: aggregate_id.clone(),
            aggregate_id,
            metadata: HashMap::new(),
        }
    }

    /// Drop the message without invoking the handler.
    pub fn skip() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// What to do with a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorActionType {
    Retry,
    Skip,
    DeadLetter,
}

impl ErrorActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Skip => "skip",
            Self::DeadLetter => "dead_letter",
        }
    }
}

/// Result of classifying a handler failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorAction {
    pub action: ErrorActionType,
    pub retry_after: Duration,
    pub skip_message: bool,
    pub dead_letter: bool,
}

impl ErrorAction {
    pub fn retry(after: Duration) -> Self {
        Self {
            action: ErrorActionType::Retry,
            retry_after: after,
            skip_message: false,
            dead_letter: false,
        }
    }

    pub fn skip() -> Self {
        Self {
            action: ErrorActionType::Skip,
            retry_after: Duration::ZERO,
            skip_message: true,
            dead_letter: false,
        }
    }

    pub fn dead_letter() -> Self {
        Self {
            action: ErrorActionType::DeadLetter,
            retry_after: Duration::ZERO,
            skip_message: false,
            dead_letter: true,
        }
    }
}

/// Exponential backoff policy for explicitly configured retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_interval`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let secs = self.initial_interval.as_secs_f64() * factor;
        let capped = secs.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_decision_defaults_processor_key() {
        let d = RouteDecision::process("acct-1").with_priority(5);
        assert!(d.should_process);
        assert_eq!(d.processor_key, "acct-1");
        assert_eq!(d.priority, 5);
        assert!(!RouteDecision::skip().should_process);
    }

    #[test]
    fn test_error_action_flags() {
        assert!(ErrorAction::skip().skip_message);
        assert!(ErrorAction::dead_letter().dead_letter);
        let retry = ErrorAction::retry(Duration::from_millis(10));
        assert_eq!(retry.action, ErrorActionType::Retry);
        assert_eq!(retry.retry_after, Duration::from_millis(10));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
    }
}
