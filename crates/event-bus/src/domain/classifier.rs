//! Default handler-failure classification

use crate::error::EventBusError;
use crate::ports::ErrorClassifier;
use bus_types::{ErrorAction, RetryPolicy};
use std::time::Duration;

/// Longest backoff between in-place retries.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Retry while attempts remain, then dead-letter panics and timeouts and
/// skip the rest.
///
/// Undecodable messages are dead-lettered immediately since retrying
/// cannot change their bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorClassifier;

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify(
        &self,
        _topic: &str,
        error: &EventBusError,
        attempt: u32,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> ErrorAction {
        if matches!(error, EventBusError::Envelope(_)) {
            return ErrorAction::dead_letter();
        }
        if attempt < max_retries {
            let policy = RetryPolicy {
                max_retries,
                initial_interval: retry_backoff,
                max_interval: MAX_RETRY_BACKOFF,
                multiplier: 2.0,
            };
            return ErrorAction::retry(policy.backoff(attempt));
        }
        match error {
            EventBusError::HandlerPanic { .. } | EventBusError::HandlerTimeout { .. } => {
                ErrorAction::dead_letter()
            }
            _ => ErrorAction::skip(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_types::{EnvelopeError, ErrorActionType};

    const BACKOFF: Duration = Duration::from_millis(100);

    #[test]
    fn test_decode_errors_dead_letter_immediately() {
        let err = EventBusError::Envelope(EnvelopeError::Decode("bad".into()));
        let action = DefaultErrorClassifier.classify("t", &err, 0, 3, BACKOFF);
        assert_eq!(action.action, ErrorActionType::DeadLetter);
    }

    #[test]
    fn test_retries_back_off_then_skip() {
        let err = EventBusError::handler("boom");
        let first = DefaultErrorClassifier.classify("t", &err, 0, 2, BACKOFF);
        assert_eq!(first.action, ErrorActionType::Retry);
        assert_eq!(first.retry_after, BACKOFF);

        let second = DefaultErrorClassifier.classify("t", &err, 1, 2, BACKOFF);
        assert_eq!(second.retry_after, BACKOFF * 2);

        let last = DefaultErrorClassifier.classify("t", &err, 2, 2, BACKOFF);
        assert!(last.skip_message);
    }

    #[test]
    fn test_exhausted_panic_dead_letters() {
        let err = EventBusError::HandlerPanic {
            reason: "oops".into(),
        };
        let action = DefaultErrorClassifier.classify("t", &err, 0, 0, BACKOFF);
        assert!(action.dead_letter);
    }
}
