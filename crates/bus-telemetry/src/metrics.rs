//! Prometheus registry for processes embedding the event bus.
//!
//! Metrics follow `event_bus_<metric>_<unit>`. The engine's own counters
//! (enabled by the `metrics` feature of `event-bus`) live in the default
//! Prometheus registry; [`encode_metrics`] exports both.

use lazy_static::lazy_static;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Constant 1, labeled with service name and crate version
    pub static ref SERVICE_INFO: GaugeVec = GaugeVec::new(
        Opts::new("event_bus_service_info", "Service running the event bus"),
        &["service", "version"]
    ).expect("metric creation failed");
}

/// Keeps the registered collectors alive for the process.
pub struct MetricsHandle {
    _registry: Registry,
}

/// Register the service info gauge with [`REGISTRY`] and set it.
///
/// # Errors
///
/// `MetricsInit` when the gauge is already registered.
pub fn register_metrics(service_name: &str) -> Result<MetricsHandle, TelemetryError> {
    REGISTRY
        .register(Box::new(SERVICE_INFO.clone()))
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    SERVICE_INFO
        .with_label_values(&[service_name, env!("CARGO_PKG_VERSION")])
        .set(1.0);

    Ok(MetricsHandle {
        _registry: REGISTRY.clone(),
    })
}

/// Encode [`REGISTRY`] and the default registry in Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let mut metric_families = REGISTRY.gather();
    metric_families.extend(prometheus::gather());
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
