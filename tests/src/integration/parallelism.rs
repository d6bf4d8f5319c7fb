//! # Cross-Aggregate Parallelism
//!
//! A handler stuck on one aggregate must not delay aggregates owned by
//! other workers.

#[cfg(test)]
mod tests {
    use crate::integration::common::{test_config, wait_until, Fixture};
    use bus_types::{Envelope, SubscribeOptions};
    use event_bus::domain::shard_for;
    use event_bus::{envelope_handler_fn, EventBusApi};
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    const BLOCKED: &str = "order-blocked";

    /// First key that lands on a different worker than `BLOCKED`.
    fn free_key(workers: usize) -> String {
        (0..)
            .map(|i| format!("order-{i}"))
            .find(|k| shard_for(k, workers) != shard_for(BLOCKED, workers))
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_blocked_aggregate_does_not_stall_others() {
        let config = test_config();
        let workers = config.keyed_pool.worker_count;
        let fixture = Fixture::new(config);
        let (release, released) = watch::channel(false);
        let completed: Arc<Mutex<Vec<String>>> = Arc::default();

        let sink = Arc::clone(&completed);
        fixture
            .bus
            .subscribe_envelope(
                "orders",
                envelope_handler_fn(move |env| {
                    let sink = Arc::clone(&sink);
                    let mut released = released.clone();
                    async move {
                        if env.aggregate_id() == BLOCKED {
                            let _ = released.wait_for(|r| *r).await;
                        }
                        sink.lock().push(env.aggregate_id().to_string());
                        Ok(())
                    }
                }),
                SubscribeOptions::default(),
            )
            .await
            .unwrap();

        let blocked = Envelope::new(BLOCKED, "OrderPlaced", 1, b"{}".to_vec());
        fixture.bus.publish_envelope("orders", &blocked).await.unwrap();

        let other = free_key(workers);
        let started = tokio::time::Instant::now();
        let env = Envelope::new(&other, "OrderPlaced", 1, b"{}".to_vec());
        fixture.bus.publish_envelope("orders", &env).await.unwrap();

        assert!(
            wait_until(Duration::from_millis(500), || {
                completed.lock().iter().any(|id| id == &other)
            })
            .await,
            "independent aggregate waited on the blocked one"
        );
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!completed.lock().iter().any(|id| id == BLOCKED));

        release.send(true).unwrap();
        assert!(
            wait_until(Duration::from_secs(1), || {
                completed.lock().iter().any(|id| id == BLOCKED)
            })
            .await
        );
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_aggregate_waits_behind_blocked_event() {
        let fixture = Fixture::with_defaults();
        let (release, released) = watch::channel(false);
        let completed: Arc<Mutex<Vec<i64>>> = Arc::default();

        let sink = Arc::clone(&completed);
        fixture
            .bus
            .subscribe_envelope(
                "orders",
                envelope_handler_fn(move |env| {
                    let sink = Arc::clone(&sink);
                    let mut released = released.clone();
                    async move {
                        if env.event_version() == 1 {
                            let _ = released.wait_for(|r| *r).await;
                        }
                        sink.lock().push(env.event_version());
                        Ok(())
                    }
                }),
                SubscribeOptions::default(),
            )
            .await
            .unwrap();

        for version in 1..=3 {
            let env = Envelope::new(BLOCKED, "OrderUpdated", version, b"{}".to_vec());
            fixture.bus.publish_envelope("orders", &env).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(completed.lock().is_empty());

        release.send(true).unwrap();
        assert!(wait_until(Duration::from_secs(1), || completed.lock().len() == 3).await);
        assert_eq!(*completed.lock(), vec![1, 2, 3]);
        fixture.bus.close().await.unwrap();
    }
}
