//! # Panic Isolation
//!
//! Two handlers on one topic: one panics on every message, the other always
//! succeeds. Both see every message, and the panics neither kill workers
//! nor suppress the sibling's successes.

#[cfg(test)]
mod tests {
    use crate::integration::common::{wait_until, Fixture};
    use bus_types::{Envelope, SubscribeOptions};
    use event_bus::{byte_handler_fn, envelope_handler_fn, EventBusApi, EventBusResult, Transport};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    const N: u64 = 10;

    async fn explode(what: String) -> EventBusResult<()> {
        panic!("cannot handle {what}");
    }

    fn no_retries() -> SubscribeOptions {
        SubscribeOptions::default().with_retries(0, Duration::from_millis(10))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_handler_does_not_starve_sibling() {
        let fixture = Fixture::with_defaults();
        let panicked = Arc::new(AtomicU64::new(0));
        let succeeded = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&panicked);
        fixture
            .bus
            .subscribe_envelope(
                "orders",
                envelope_handler_fn(move |env| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    explode(env.aggregate_id().to_string())
                }),
                no_retries(),
            )
            .await
            .unwrap();

        let counter = Arc::clone(&succeeded);
        fixture
            .bus
            .subscribe_envelope(
                "orders",
                envelope_handler_fn(move |_| {
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
        assert_eq!(fixture.transport.handler_count("orders"), 2);

        for version in 1..=N as i64 {
            let env = Envelope::new("order-1", "OrderUpdated", version, b"{}".to_vec());
            fixture.bus.publish_envelope("orders", &env).await.unwrap();
        }

        assert!(
            wait_until(Duration::from_secs(3), || {
                panicked.load(Ordering::SeqCst) == N && succeeded.load(Ordering::SeqCst) == N
            })
            .await,
            "panicked {} succeeded {}",
            panicked.load(Ordering::SeqCst),
            succeeded.load(Ordering::SeqCst)
        );
        assert!(
            wait_until(Duration::from_secs(1), || {
                fixture.bus.subscriber_stats().messages_processed == 2 * N
            })
            .await
        );
        assert_eq!(fixture.bus.subscriber_stats().processing_errors, N);
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_panics_are_dead_lettered() {
        let fixture = Fixture::with_defaults();
        let dead = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&dead);
        fixture
            .transport
            .subscribe(
                "orders.dlq",
                byte_handler_fn(move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        fixture
            .bus
            .subscribe(
                "orders",
                byte_handler_fn(|_| explode("poison".to_string())),
                no_retries().unordered(),
            )
            .await
            .unwrap();
        fixture.bus.publish("orders", b"poison").await.unwrap();

        assert!(wait_until(Duration::from_secs(1), || dead.load(Ordering::SeqCst) == 1).await);
        assert_eq!(fixture.bus.subscriber_stats().processing_errors, 1);
        fixture.bus.close().await.unwrap();
    }
}
