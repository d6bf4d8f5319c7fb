//! # Envelope
//!
//! The canonical unit of ordered data carried by the bus.
//!
//! Two envelopes sharing an `aggregate_id` are delivered to the business
//! handler in arrival order; envelopes for different aggregates have no
//! ordering relationship.

use crate::errors::EnvelopeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Maximum length of an aggregate identifier.
pub const MAX_AGGREGATE_ID_LEN: usize = 256;

/// Header names searched (in order) when extracting an aggregate id.
pub const AGGREGATE_ID_HEADERS: [&str; 4] =
    ["X-Aggregate-ID", "x-aggregate-id", "Aggregate-ID", "aggregate-id"];

/// Immutable event envelope.
///
/// Constructed by the publisher, serialized for transport, reconstructed by
/// the subscriber. Fields are read through accessors only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    event_id: String,
    aggregate_id: String,
    event_type: String,
    event_version: i64,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant_id: Option<String>,
    payload: Vec<u8>,
}

impl Envelope {
    /// Create an envelope with an auto-assigned time-ordered event id.
    pub fn new(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        event_version: i64,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            event_version,
            timestamp: Utc::now(),
            trace_id: None,
            correlation_id: None,
            tenant_id: None,
            payload: payload.into(),
        }
    }

    /// Replace the event id (producer-assigned ids).
    #[must_use]
    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> i64 {
        self.event_version
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Check structural validity.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.event_id.trim().is_empty() {
            return Err(EnvelopeError::MissingField { field: "event_id" });
        }
        validate_aggregate_id(&self.aggregate_id)?;
        if self.event_type.trim().is_empty() {
            return Err(EnvelopeError::MissingField { field: "event_type" });
        }
        if self.event_version <= 0 {
            return Err(EnvelopeError::InvalidVersion {
                version: self.event_version,
            });
        }
        if self.payload.is_empty() {
            return Err(EnvelopeError::MissingField { field: "payload" });
        }
        Ok(())
    }

    /// Validate and serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        self.validate()?;
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Deserialize from JSON bytes and validate.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }
}

/// Validate an aggregate identifier.
///
/// Allowed characters: `A-Z a-z 0-9 : _ - . /`, at most 256 characters
/// after trimming surrounding whitespace.
pub fn validate_aggregate_id(id: &str) -> Result<(), EnvelopeError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(EnvelopeError::MissingField {
            field: "aggregate_id",
        });
    }
    if id.chars().count() > MAX_AGGREGATE_ID_LEN {
        return Err(EnvelopeError::InvalidAggregateId {
            reason: format!("too long (max {MAX_AGGREGATE_ID_LEN} characters)"),
        });
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '-' | '.' | '/')))
    {
        return Err(EnvelopeError::InvalidAggregateId {
            reason: format!("invalid character {bad:?}"),
        });
    }
    Ok(())
}

/// Find the aggregate id for a raw transport message.
///
/// Sources are tried in priority order: an encoded envelope in `message`,
/// well-known headers, the transport message key, then subject segments
/// scanned from the last one backwards. The first valid candidate wins.
pub fn extract_aggregate_id(
    message: &[u8],
    headers: Option<&HashMap<String, String>>,
    key: Option<&[u8]>,
    subject: Option<&str>,
) -> Result<String, EnvelopeError> {
    if !message.is_empty() {
        if let Ok(envelope) = Envelope::from_bytes(message) {
            return Ok(envelope.aggregate_id);
        }
    }

    if let Some(headers) = headers {
        for name in AGGREGATE_ID_HEADERS {
            if let Some(value) = headers.get(name) {
                let value = value.trim();
                if validate_aggregate_id(value).is_ok() {
                    return Ok(value.to_string());
                }
            }
        }
    }

    if let Some(key) = key {
        if let Ok(key) = std::str::from_utf8(key) {
            let key = key.trim();
            if validate_aggregate_id(key).is_ok() {
                return Ok(key.to_string());
            }
        }
    }

    if let Some(subject) = subject {
        for segment in subject.rsplit('.') {
            let segment = segment.trim();
            if validate_aggregate_id(segment).is_ok() {
                return Ok(segment.to_string());
            }
        }
    }

    Err(EnvelopeError::AggregateIdNotFound)
}
