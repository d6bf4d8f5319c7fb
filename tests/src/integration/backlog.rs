//! # Backlog Round Trip
//!
//! A synthetic lag signal above threshold switches the topic to recovery
//! mode within one poll; once lag stays low for the dwell time the topic
//! returns to normal. Lag-read failures degrade the topic without stopping
//! the bus.

#[cfg(test)]
mod tests {
    use crate::integration::common::{test_config, wait_until, Fixture};
    use bus_types::SubscribeOptions;
    use event_bus::{
        byte_handler_fn, listener_fn, EventBusApi, EventBusConfig, ModeChange, RecoveryMode,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    const POLL: Duration = Duration::from_millis(50);
    const DWELL: Duration = Duration::from_millis(300);

    fn backlog_config() -> EventBusConfig {
        let mut config = test_config();
        config.backlog.check_interval = POLL;
        config.backlog.lag_threshold = 100;
        config.backlog.time_threshold = Duration::from_secs(60);
        config.recovery.min_dwell = DWELL;
        config
    }

    async fn subscribed(topic: &str) -> Fixture {
        let fixture = Fixture::new(backlog_config());
        fixture
            .bus
            .subscribe(
                topic,
                byte_handler_fn(|_| async { Ok(()) }),
                SubscribeOptions::default(),
            )
            .await
            .unwrap();
        fixture
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lag_drives_recovery_and_back() {
        let fixture = subscribed("orders").await;
        let changes: Arc<Mutex<Vec<ModeChange>>> = Arc::default();
        let sink = Arc::clone(&changes);
        fixture.bus.add_mode_listener(listener_fn(move |change: ModeChange| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(change);
            }
        }));
        assert_eq!(fixture.bus.subscriber().recovery_mode("orders"), RecoveryMode::Normal);

        fixture.lag.set_lag("orders", 500, Duration::from_secs(1));
        let recovery = fixture.bus.recovery_manager();
        assert!(
            wait_until(POLL * 4, || recovery.is_recovering("orders")).await,
            "backlog did not trigger recovery"
        );
        let entered = Instant::now();
        assert_eq!(
            fixture.bus.subscriber().recovery_mode("orders"),
            RecoveryMode::Recovering
        );
        assert!(fixture.bus.metrics().message_backlog >= 500);

        fixture.lag.set_lag("orders", 0, Duration::ZERO);
        assert!(
            wait_until(Duration::from_secs(2), || !recovery.is_recovering("orders")).await,
            "recovery never ended"
        );
        // dwell measured from the switch, which happened before `entered`
        assert!(entered.elapsed() >= DWELL - POLL * 2);
        assert_eq!(fixture.bus.subscriber().recovery_mode("orders"), RecoveryMode::Normal);

        assert!(wait_until(Duration::from_secs(1), || changes.lock().len() == 2).await);
        let changes = changes.lock().clone();
        assert_eq!(changes[0].to, RecoveryMode::Recovering);
        assert_eq!(changes[0].lag_count, Some(500));
        assert_eq!(changes[1].to, RecoveryMode::Normal);
        assert!(changes.iter().all(|c| !c.forced && c.topic == "orders"));
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_brief_lag_dip_does_not_end_recovery() {
        let fixture = subscribed("payments").await;
        let recovery = fixture.bus.recovery_manager();

        fixture.lag.set_lag("payments", 1000, Duration::from_secs(1));
        assert!(wait_until(POLL * 4, || recovery.is_recovering("payments")).await);

        fixture.lag.set_lag("payments", 0, Duration::ZERO);
        tokio::time::sleep(DWELL / 3).await;
        assert!(recovery.is_recovering("payments"));
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_lag_read_failures_degrade_topic() {
        let fixture = subscribed("audit").await;
        fixture.lag.set_failing("audit", true);

        let detector = fixture.bus.backlog_detector();
        assert!(
            wait_until(POLL * 10, || detector.is_degraded("audit")).await,
            "topic never marked degraded"
        );
        assert!(!fixture.bus.is_closed());

        fixture.lag.set_failing("audit", false);
        assert!(wait_until(POLL * 10, || !detector.is_degraded("audit")).await);
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_forced_recovery_reported() {
        let fixture = subscribed("orders").await;
        let recovery = fixture.bus.recovery_manager();

        assert!(recovery.force_recovery("orders").is_some());
        assert_eq!(
            fixture.bus.subscriber().recovery_mode("orders"),
            RecoveryMode::Recovering
        );
        assert!(recovery.force_normal("orders").is_some());
        assert_eq!(recovery.stats().transitions, 2);
        fixture.bus.close().await.unwrap();
    }
}
