//! # Health Check Protocol
//!
//! Probes published by one bus are seen by the monitor of another sharing
//! the same transport; silence turns into alerts.

#[cfg(test)]
mod tests {
    use crate::integration::common::{test_config, wait_until, Fixture};
    use bus_types::{AlertSeverity, HealthAlert, HealthCheckMessage};
    use event_bus::adapters::ManualLagSource;
    use event_bus::{byte_handler_fn, listener_fn, EventBus, EventBusApi, EventBusConfig, Transport};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_health() -> EventBusConfig {
        let mut config = test_config();
        config.health_check.interval = Duration::from_millis(150);
        config.health_check.monitor_interval = Duration::from_millis(100);
        config.health_check.failure_threshold = 2;
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probes_keep_monitor_healthy() {
        let fixture = Fixture::new(fast_health());
        let payloads = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&payloads);
        fixture
            .transport
            .subscribe(
                &fixture.bus.config().health_check.topic,
                byte_handler_fn(move |message| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().push(message.payload);
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        fixture.bus.start_health_check_subscriber().await.unwrap();
        fixture.bus.start_health_check_publisher().unwrap();

        tokio::time::sleep(Duration::from_millis(700)).await;
        let stats = fixture.bus.health_subscriber_stats().unwrap();
        assert!(stats.total_messages_received >= 3);
        assert!(stats.is_healthy);

        let status = fixture.bus.health_status().unwrap();
        assert!(status.is_healthy);
        assert_eq!(status.event_bus_type, "memory");
        assert_eq!(fixture.bus.metrics().health_check_status, "healthy");
        assert!(fixture.bus.metrics().last_health_check.is_some());

        let first = HealthCheckMessage::from_bytes(&payloads.lock()[0]).unwrap();
        assert!(first.is_valid());
        assert_eq!(first.source, "event-bus");
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_silence_raises_alerts_until_probes_resume() {
        let config = fast_health();
        let monitor = Fixture::new(config.clone());
        let alerts: Arc<Mutex<Vec<HealthAlert>>> = Arc::default();
        monitor.bus.start_health_check_subscriber().await.unwrap();
        let sink = Arc::clone(&alerts);
        monitor
            .bus
            .add_health_alert_listener(listener_fn(move |alert: HealthAlert| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(alert);
                }
            }))
            .unwrap();

        let silent = Duration::from_millis(150);
        assert!(
            wait_until(Duration::from_secs(2), || {
                alerts
                    .lock()
                    .iter()
                    .any(|a| a.severity == AlertSeverity::Critical)
            })
            .await
        );
        let stats = monitor.bus.health_subscriber_stats().unwrap();
        assert!(!stats.is_healthy);
        assert!(alerts.lock().iter().all(|a| a.time_since_last > silent));

        // a second bus on the same transport starts probing
        let publisher = EventBus::new(
            config,
            monitor.transport.clone(),
            Arc::new(ManualLagSource::new()),
        )
        .unwrap();
        publisher.start_health_check_publisher().unwrap();
        assert!(
            wait_until(Duration::from_secs(1), || {
                monitor
                    .bus
                    .health_subscriber_stats()
                    .is_some_and(|s| s.total_messages_received > 0 && s.is_healthy)
            })
            .await
        );

        publisher.close().await.unwrap();
        monitor.bus.close().await.unwrap();
    }
}
