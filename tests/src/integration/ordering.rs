//! # Per-Aggregate Ordering
//!
//! Several producers publish concurrently, each owning one aggregate and
//! publishing its versions in order. Whatever the interleaving, the handler
//! must observe every aggregate's versions in order.

#[cfg(test)]
mod tests {
    use crate::integration::common::{wait_until, Fixture};
    use bus_types::{Envelope, SubscribeOptions};
    use event_bus::{envelope_handler_fn, EventBusApi};
    use parking_lot::Mutex;
    use rand::Rng;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    const AGGREGATES: usize = 8;
    const VERSIONS: i64 = 40;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_versions_applied_in_order_per_aggregate() {
        let fixture = Arc::new(Fixture::with_defaults());
        let seen: Arc<Mutex<HashMap<String, Vec<i64>>>> = Arc::default();

        let sink = Arc::clone(&seen);
        fixture
            .bus
            .subscribe_envelope(
                "orders",
                envelope_handler_fn(move |env| {
                    let sink = Arc::clone(&sink);
                    async move {
                        let jitter = rand::thread_rng().gen_range(0..300);
                        tokio::time::sleep(Duration::from_micros(jitter)).await;
                        sink.lock()
                            .entry(env.aggregate_id().to_string())
                            .or_default()
                            .push(env.event_version());
                        Ok(())
                    }
                }),
                SubscribeOptions::default(),
            )
            .await
            .unwrap();

        let producers: Vec<_> = (0..AGGREGATES)
            .map(|i| {
                let fixture = Arc::clone(&fixture);
                tokio::spawn(async move {
                    let aggregate = format!("order-{i}");
                    for version in 1..=VERSIONS {
                        let env = Envelope::new(&aggregate, "OrderUpdated", version, b"{}".to_vec());
                        fixture.bus.publish_envelope("orders", &env).await.unwrap();
                        if rand::thread_rng().gen_bool(0.3) {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        let total = AGGREGATES * VERSIONS as usize;
        assert!(
            wait_until(Duration::from_secs(10), || {
                seen.lock().values().map(Vec::len).sum::<usize>() == total
            })
            .await
        );

        let expected: Vec<i64> = (1..=VERSIONS).collect();
        for (aggregate, versions) in seen.lock().iter() {
            assert_eq!(versions, &expected, "out of order for {aggregate}");
        }
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_worker_keeps_order_across_aggregates() {
        let mut config = crate::integration::common::test_config();
        config.keyed_pool.worker_count = 1;
        let fixture = Fixture::new(config);
        let last: Arc<Mutex<HashMap<String, i64>>> = Arc::default();
        let regressions = Arc::new(Mutex::new(0u32));

        let (last_sink, regress_sink) = (Arc::clone(&last), Arc::clone(&regressions));
        fixture
            .bus
            .subscribe_envelope(
                "ledger",
                envelope_handler_fn(move |env| {
                    let last = Arc::clone(&last_sink);
                    let regressions = Arc::clone(&regress_sink);
                    async move {
                        let mut last = last.lock();
                        let previous = last.insert(env.aggregate_id().to_string(), env.event_version());
                        if previous.is_some_and(|p| p > env.event_version()) {
                            *regressions.lock() += 1;
                        }
                        Ok(())
                    }
                }),
                SubscribeOptions::default(),
            )
            .await
            .unwrap();

        for version in 1..=20 {
            for aggregate in ["acct-a", "acct-b", "acct-c"] {
                let env = Envelope::new(aggregate, "Posted", version, b"{}".to_vec());
                fixture.bus.publish_envelope("ledger", &env).await.unwrap();
            }
        }

        assert!(
            wait_until(Duration::from_secs(5), || {
                let last = last.lock();
                last.len() == 3 && last.values().all(|v| *v == 20)
            })
            .await
        );
        assert_eq!(*regressions.lock(), 0);
        fixture.bus.close().await.unwrap();
    }
}
