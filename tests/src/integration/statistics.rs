//! # Statistics Consistency
//!
//! Counters exposed by the subscriber and the bus agree with what the
//! handler actually did.

#[cfg(test)]
mod tests {
    use crate::integration::common::{wait_until, Fixture};
    use bus_types::{Envelope, RouteDecision, SubscribeOptions};
    use event_bus::{byte_handler_fn, EventBusApi, EventBusError, MessageRouter, RawMessage};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const N: u64 = 20;

    fn no_retries() -> SubscribeOptions {
        SubscribeOptions::default().with_retries(0, Duration::from_millis(10))
    }

    fn number(message: &RawMessage) -> u64 {
        std::str::from_utf8(&message.payload)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }

    async fn publish_numbers(fixture: &Fixture, topic: &str) {
        for i in 0..N {
            fixture
                .bus
                .publish(topic, i.to_string().as_bytes())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_all_successes_counted() {
        let fixture = Fixture::with_defaults();
        fixture
            .bus
            .subscribe("orders", byte_handler_fn(|_| async { Ok(()) }), no_retries())
            .await
            .unwrap();

        publish_numbers(&fixture, "orders").await;
        assert!(
            wait_until(Duration::from_secs(2), || {
                fixture.bus.subscriber_stats().messages_processed == N
            })
            .await
        );
        let stats = fixture.bus.subscriber_stats();
        assert_eq!(stats.processing_errors, 0);
        assert_eq!(stats.active_subscriptions, 1);

        let metrics = fixture.bus.metrics();
        assert_eq!(metrics.messages_published, N);
        assert_eq!(metrics.messages_consumed, N);
        assert_eq!(metrics.publish_errors, 0);

        let info = fixture.bus.subscription_info("orders").unwrap();
        assert_eq!(info.messages_count, N);
        assert_eq!(info.error_count, 0);
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_odd_failures_counted() {
        let fixture = Fixture::with_defaults();
        let handler = byte_handler_fn(|message| async move {
            if number(&message) % 2 == 1 {
                Err(EventBusError::handler("odd message"))
            } else {
                Ok(())
            }
        });
        fixture
            .bus
            .subscribe("orders", handler, no_retries())
            .await
            .unwrap();

        publish_numbers(&fixture, "orders").await;
        assert!(
            wait_until(Duration::from_secs(2), || {
                fixture.bus.subscriber_stats().messages_processed == N
            })
            .await
        );
        let stats = fixture.bus.subscriber_stats();
        assert_eq!(stats.processing_errors, N / 2);
        assert_eq!(fixture.bus.metrics().consume_errors, N / 2);
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_retried_failure_counted_once() {
        let fixture = Fixture::with_defaults();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let handler = byte_handler_fn(move |_| {
            let counter = Arc::clone(&counter);
            async move {
                // fails on the first two attempts
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EventBusError::handler("transient"))
                } else {
                    Ok(())
                }
            }
        });
        let options = SubscribeOptions::default().with_retries(3, Duration::from_millis(5));
        fixture.bus.subscribe("orders", handler, options).await.unwrap();

        fixture.bus.publish("orders", b"1").await.unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                fixture.bus.subscriber_stats().messages_processed == 1
            })
            .await
        );
        assert_eq!(fixture.bus.subscriber_stats().processing_errors, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        fixture.bus.close().await.unwrap();
    }

    struct EvenOnly;

    impl MessageRouter for EvenOnly {
        fn route(&self, message: &RawMessage, _envelope: Option<&Envelope>) -> RouteDecision {
            if number(message) % 2 == 0 {
                RouteDecision::process(format!("n-{}", number(message)))
            } else {
                RouteDecision::skip()
            }
        }
    }

    #[tokio::test]
    async fn test_router_skips_are_not_errors() {
        let fixture = Fixture::with_defaults();
        let handled = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&handled);
        fixture.bus.set_router(Arc::new(EvenOnly));
        fixture
            .bus
            .subscribe(
                "orders",
                byte_handler_fn(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
                no_retries(),
            )
            .await
            .unwrap();

        publish_numbers(&fixture, "orders").await;
        assert!(
            wait_until(Duration::from_secs(2), || {
                fixture.bus.subscriber_stats().messages_processed == N
            })
            .await
        );
        assert_eq!(fixture.bus.subscriber_stats().processing_errors, 0);
        assert_eq!(handled.load(Ordering::SeqCst), N / 2);
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_outcomes_match_counters() {
        use event_bus::{listener_fn, PublishOutcome};

        let fixture = Fixture::with_defaults();
        let outcomes = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));
        let (seen_sink, err_sink) = (Arc::clone(&outcomes), Arc::clone(&failures));
        fixture
            .bus
            .add_publish_listener(listener_fn(move |outcome: PublishOutcome| {
                let seen_sink = Arc::clone(&seen_sink);
                let err_sink = Arc::clone(&err_sink);
                async move {
                    seen_sink.fetch_add(1, Ordering::SeqCst);
                    if !outcome.is_success() {
                        err_sink.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));

        publish_numbers(&fixture, "orders").await;
        fixture.transport.fail_next_publishes(100);
        let options = event_bus::PublishOptions::default()
            .with_retry_policy(event_bus::RetryPolicy {
                max_retries: 0,
                ..event_bus::RetryPolicy::default()
            });
        assert!(fixture
            .bus
            .publish_with_options("orders", b"lost", options)
            .await
            .is_err());

        assert!(
            wait_until(Duration::from_secs(2), || {
                outcomes.load(Ordering::SeqCst) == N + 1
            })
            .await
        );
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        let metrics = fixture.bus.metrics();
        assert_eq!(metrics.messages_published, N);
        assert_eq!(metrics.publish_errors, 1);
        assert_eq!(fixture.bus.publisher().in_flight(), 0);
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_service_info_is_exported() {
        crate::integration::common::init_logging();
        let text = bus_telemetry::encode_metrics().unwrap();
        assert!(text.contains("event_bus_service_info"));
    }
}
