//! # Health Check Protocol
//!
//! Liveness probe message published periodically on a well-known topic,
//! plus the status, alert, and statistics snapshots produced by the
//! publishing and monitoring sides.

use crate::errors::HealthCheckError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Topic used when no transport-specific topic is configured.
pub const DEFAULT_HEALTH_CHECK_TOPIC: &str = "event-bus-health-check";

/// Protocol version stamped on every probe.
pub const HEALTH_CHECK_VERSION: &str = "2.0.0";

/// Maximum clock skew tolerated for probes timestamped in the future.
pub const MAX_FUTURE_SKEW: Duration = Duration::from_secs(60);

/// Default age after which a probe is considered stale.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(300);

/// Transport family a bus instance runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    Kafka,
    Nats,
    Memory,
}

impl BusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::Nats => "nats",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusType {
    type Err = HealthCheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kafka" => Ok(Self::Kafka),
            "nats" => Ok(Self::Nats),
            "memory" => Ok(Self::Memory),
            other => Err(HealthCheckError::UnknownBusType(other.to_string())),
        }
    }
}

/// Health-check topic for a given transport family.
pub fn health_check_topic(bus_type: BusType) -> String {
    format!("event-bus-{}-health-check", bus_type.as_str())
}

/// Liveness probe message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckMessage {
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub event_bus_type: String,
    pub version: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl HealthCheckMessage {
    /// Build a fresh probe for `source`.
    pub fn new(source: impl Into<String>, bus_type: BusType) -> Self {
        let now = Utc::now();
        let nanos = now.timestamp_nanos_opt().unwrap_or_default();
        Self {
            message_id: format!("hc-{nanos}-{:08x}", rand::random::<u32>()),
            timestamp: now,
            source: source.into(),
            event_bus_type: bus_type.as_str().to_string(),
            version: HEALTH_CHECK_VERSION.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Age of the probe relative to now. Negative for future timestamps.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.timestamp
    }

    /// Check required fields, known bus type, and freshness against `ttl`.
    pub fn validate(&self, ttl: Duration) -> Result<(), HealthCheckError> {
        if self.message_id.is_empty() {
            return Err(HealthCheckError::MissingField {
                field: "message_id",
            });
        }
        if self.source.is_empty() {
            return Err(HealthCheckError::MissingField { field: "source" });
        }
        if self.version.is_empty() {
            return Err(HealthCheckError::MissingField { field: "version" });
        }
        self.event_bus_type.parse::<BusType>()?;

        let age = self.age();
        let future_limit =
            chrono::Duration::from_std(MAX_FUTURE_SKEW).unwrap_or_else(|_| chrono::Duration::zero());
        let ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        if age < -future_limit || age > ttl {
            return Err(HealthCheckError::Stale {
                age_ms: age.num_milliseconds(),
            });
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate(DEFAULT_MESSAGE_TTL).is_ok()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HealthCheckError> {
        serde_json::to_vec(self).map_err(|e| HealthCheckError::Decode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HealthCheckError> {
        serde_json::from_slice(bytes).map_err(|e| HealthCheckError::Decode(e.to_string()))
    }
}

/// Builder for probes carrying extra metadata.
#[derive(Debug, Clone)]
pub struct HealthCheckMessageBuilder {
    message: HealthCheckMessage,
}

impl HealthCheckMessageBuilder {
    pub fn new(source: impl Into<String>, bus_type: BusType) -> Self {
        Self {
            message: HealthCheckMessage::new(source, bus_type),
        }
    }

    #[must_use]
    pub fn check_type(self, check_type: impl Into<String>) -> Self {
        self.metadata("checkType", check_type)
    }

    #[must_use]
    pub fn instance_id(self, instance_id: impl Into<String>) -> Self {
        self.metadata("instanceId", instance_id)
    }

    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> HealthCheckMessage {
        self.message
    }
}

/// Publishing-side health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckStatus {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub total_checks: u64,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub source: String,
    pub event_bus_type: String,
}

/// Alert severity raised by the monitoring side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// Severity for `misses` consecutive missed probes given a failure threshold.
    pub fn for_misses(misses: u32, threshold: u32) -> Self {
        if misses >= threshold {
            Self::Critical
        } else if misses >= threshold / 2 {
            Self::Error
        } else {
            Self::Warning
        }
    }
}

/// Raised when probes stop arriving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub topic: String,
    pub last_message_time: Option<DateTime<Utc>>,
    pub time_since_last: Duration,
    pub consecutive_misses: u32,
    pub timestamp: DateTime<Utc>,
}

/// Monitoring-side statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSubscriberStats {
    pub start_time: Option<DateTime<Utc>>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub total_messages_received: u64,
    pub consecutive_misses: u32,
    pub total_alerts: u64,
    pub last_alert_time: Option<DateTime<Utc>>,
    pub is_healthy: bool,
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_is_valid() {
        let msg = HealthCheckMessage::new("orders-svc", BusType::Memory);
        assert!(msg.message_id.starts_with("hc-"));
        assert_eq!(msg.version, HEALTH_CHECK_VERSION);
        assert!(msg.is_valid());
    }

    #[test]
    fn test_rejects_stale_and_future() {
        let mut msg = HealthCheckMessage::new("svc", BusType::Nats);
        msg.timestamp = Utc::now() - chrono::Duration::minutes(6);
        assert!(matches!(
            msg.validate(DEFAULT_MESSAGE_TTL),
            Err(HealthCheckError::Stale { .. })
        ));

        msg.timestamp = Utc::now() + chrono::Duration::minutes(2);
        assert!(!msg.is_valid());
    }

    #[test]
    fn test_rejects_unknown_type_and_missing_source() {
        let mut msg = HealthCheckMessage::new("svc", BusType::Kafka);
        msg.event_bus_type = "redis".to_string();
        assert_eq!(
            msg.validate(DEFAULT_MESSAGE_TTL),
            Err(HealthCheckError::UnknownBusType("redis".to_string()))
        );

        let msg = HealthCheckMessage::new("", BusType::Kafka);
        assert_eq!(
            msg.validate(DEFAULT_MESSAGE_TTL),
            Err(HealthCheckError::MissingField { field: "source" })
        );
    }

    #[test]
    fn test_builder_metadata() {
        let msg = HealthCheckMessageBuilder::new("svc", BusType::Memory)
            .check_type("periodic")
            .instance_id("node-1")
            .build();
        assert_eq!(msg.metadata.get("checkType").map(String::as_str), Some("periodic"));
        assert_eq!(msg.metadata.get("instanceId").map(String::as_str), Some("node-1"));

        let decoded = HealthCheckMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_alert_severity_ladder() {
        assert_eq!(AlertSeverity::for_misses(1, 4), AlertSeverity::Warning);
        assert_eq!(AlertSeverity::for_misses(2, 4), AlertSeverity::Error);
        assert_eq!(AlertSeverity::for_misses(4, 4), AlertSeverity::Critical);
    }

    #[test]
    fn test_topic_per_bus_type() {
        assert_eq!(health_check_topic(BusType::Kafka), "event-bus-kafka-health-check");
    }
}
