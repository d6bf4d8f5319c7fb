//! # Error Types
//!
//! Errors raised while building, validating, or decoding shared bus types.

use thiserror::Error;

/// Errors produced by envelope construction, validation, and decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// A required field was empty.
    #[error("{field} is required")]
    MissingField { field: &'static str },

    /// Event version must be strictly positive.
    #[error("event_version must be positive, got {version}")]
    InvalidVersion { version: i64 },

    /// Aggregate identifier failed format validation.
    #[error("invalid aggregate_id: {reason}")]
    InvalidAggregateId { reason: String },

    /// No aggregate identifier could be found in any candidate source.
    #[error("aggregate_id not found in any source")]
    AggregateIdNotFound,

    /// Bytes could not be decoded into an envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(String),

    /// Envelope could not be encoded.
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

/// Errors produced by health-check message validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthCheckError {
    /// A required field was empty.
    #[error("health check {field} is required")]
    MissingField { field: &'static str },

    /// Event bus type is not one of the known transports.
    #[error("unknown event bus type: {0}")]
    UnknownBusType(String),

    /// Timestamp is too far in the future or older than the TTL.
    #[error("health check message expired or from the future (age {age_ms}ms)")]
    Stale { age_ms: i64 },

    /// Message could not be decoded.
    #[error("failed to decode health check message: {0}")]
    Decode(String),
}
