//! # Lifecycle
//!
//! Stop and close are idempotent; everything after close fails with the
//! distinguishable closed error; lifecycle events reach listeners.

#[cfg(test)]
mod tests {
    use crate::integration::common::{wait_until, Fixture};
    use bus_types::{Envelope, SubscribeOptions};
    use event_bus::{
        byte_handler_fn, envelope_handler_fn, listener_fn, EventBusApi, SubscriptionEvent,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn noop() -> Arc<dyn event_bus::ByteHandler> {
        byte_handler_fn(|_| async { Ok(()) })
    }

    #[tokio::test]
    async fn test_stop_twice_succeeds() {
        let fixture = Fixture::with_defaults();
        fixture
            .bus
            .subscribe("orders", noop(), SubscribeOptions::default())
            .await
            .unwrap();

        fixture.bus.subscriber().stop().await.unwrap();
        fixture.bus.subscriber().stop().await.unwrap();
        fixture.bus.backlog_detector().stop().await;
        fixture.bus.backlog_detector().stop().await;

        fixture.bus.close().await.unwrap();
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_close_return_closed() {
        let fixture = Fixture::with_defaults();
        fixture.bus.close().await.unwrap();

        for _ in 0..2 {
            let err = fixture.bus.publish("orders", b"x").await.unwrap_err();
            assert!(err.is_closed());

            let env = Envelope::new("order-1", "OrderPlaced", 1, b"{}".to_vec());
            let err = fixture.bus.publish_envelope("orders", &env).await.unwrap_err();
            assert!(err.is_closed());

            let err = fixture
                .bus
                .subscribe("orders", noop(), SubscribeOptions::default())
                .await
                .unwrap_err();
            assert!(err.is_closed());

            let handler = envelope_handler_fn(|_| async { Ok(()) });
            let err = fixture
                .bus
                .subscribe_envelope("orders", handler, SubscribeOptions::default())
                .await
                .unwrap_err();
            assert!(err.is_closed());

            assert!(fixture.bus.unsubscribe("orders").await.unwrap_err().is_closed());
            assert!(fixture
                .bus
                .start_health_check_publisher()
                .unwrap_err()
                .is_closed());
        }
    }

    #[tokio::test]
    async fn test_close_releases_transport() {
        let fixture = Fixture::with_defaults();
        fixture
            .bus
            .subscribe("orders", noop(), SubscribeOptions::default())
            .await
            .unwrap();
        assert_eq!(fixture.transport.handler_count("orders"), 1);

        fixture.bus.close().await.unwrap();
        assert_eq!(fixture.transport.handler_count("orders"), 0);
        assert!(!fixture.bus.subscriber_stats().is_started);
        let info = fixture.bus.subscription_info("orders").unwrap();
        assert!(!info.is_active);
    }

    #[tokio::test]
    async fn test_lifecycle_events_reach_listeners() {
        let fixture = Fixture::with_defaults();
        let events: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let sink = Arc::clone(&events);
        fixture
            .bus
            .add_subscription_listener(listener_fn(move |event: SubscriptionEvent| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(event.kind());
                }
            }));

        fixture
            .bus
            .subscribe("orders", noop(), SubscribeOptions::default().unordered())
            .await
            .unwrap();
        fixture.bus.publish("orders", b"payload").await.unwrap();
        fixture.bus.unsubscribe("orders").await.unwrap();

        assert!(
            wait_until(Duration::from_secs(1), || {
                let events = events.lock();
                ["started", "message", "stopped"]
                    .iter()
                    .all(|kind| events.contains(kind))
            })
            .await,
            "events: {:?}",
            events.lock()
        );
        fixture.bus.close().await.unwrap();
    }
}
