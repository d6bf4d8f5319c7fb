//! Shared fixtures for the integration suite.

use bus_telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
use event_bus::adapters::{ManualLagSource, MemoryTransport};
use event_bus::{EventBus, EventBusConfig};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;

static TELEMETRY: OnceLock<Option<TelemetryGuard>> = OnceLock::new();

/// Install logging once per test process. Set `EVENT_BUS_TEST_LOGS` to see output.
pub fn init_logging() {
    TELEMETRY.get_or_init(|| {
        let mut config = TelemetryConfig::from_env();
        config.console_output = std::env::var("EVENT_BUS_TEST_LOGS").is_ok();
        init_telemetry(config).ok()
    });
}

/// A bus over a fresh in-process transport and manual lag source.
pub struct Fixture {
    pub bus: EventBus,
    pub transport: Arc<MemoryTransport>,
    pub lag: Arc<ManualLagSource>,
}

impl Fixture {
    pub fn new(config: EventBusConfig) -> Self {
        init_logging();
        let transport = Arc::new(MemoryTransport::new());
        let lag = Arc::new(ManualLagSource::new());
        let bus = EventBus::new(config, transport.clone(), lag.clone())
            .expect("valid test configuration");
        Self {
            bus,
            transport,
            lag,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(test_config())
    }
}

/// Defaults with a small pool and no publish throttling.
pub fn test_config() -> EventBusConfig {
    let mut config = EventBusConfig::default();
    config.keyed_pool.worker_count = 16;
    config.keyed_pool.shutdown_grace = Duration::from_secs(1);
    config.rate_limiter.enabled = false;
    config
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Await `future` or fail the test after `timeout`.
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("operation did not complete in time")
}
