//! # Backpressure
//!
//! Publisher side: the token bucket delays callers once the burst is spent.
//! Subscriber side: a worker queue that stays full turns into a delivery
//! error the transport sees.

#[cfg(test)]
mod tests {
    use crate::integration::common::{test_config, wait_until, Fixture};
    use bus_types::{Envelope, PublishOptions, SubscribeOptions};
    use event_bus::{envelope_handler_fn, EventBusApi, EventBusError, RateLimiter};
    use std::time::{Duration, Instant};
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_wait_enforces_rate_after_burst() {
        let limiter = RateLimiter::new(5.0, 2).unwrap();
        let started = Instant::now();
        for _ in 0..10 {
            limiter.wait(None).await.unwrap();
        }
        let elapsed = started.elapsed();
        // (10 - 2) / 5 = 1.6s
        assert!(elapsed >= Duration::from_millis(1550), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_disabled_limiter_never_blocks() {
        let limiter = RateLimiter::disabled();
        let started = Instant::now();
        assert!((0..1000).all(|_| limiter.allow()));
        for _ in 0..100 {
            limiter.wait(None).await.unwrap();
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!limiter.stats().enabled);
    }

    #[tokio::test]
    async fn test_publisher_throttled_by_configured_rate() {
        let mut config = test_config();
        config.rate_limiter.enabled = true;
        config.rate_limiter.rate_per_second = 10.0;
        config.rate_limiter.burst = 2;
        let fixture = Fixture::new(config);

        let started = Instant::now();
        for i in 0..6 {
            fixture.bus.publish("metrics", format!("{i}").as_bytes()).await.unwrap();
        }
        // 4 tokens beyond the burst at 10/s
        assert!(started.elapsed() >= Duration::from_millis(350));

        let err = fixture
            .bus
            .publish_with_options(
                "metrics",
                b"late",
                PublishOptions::default().with_timeout(Duration::from_millis(10)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::DeadlineExceeded));
        fixture.bus.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_worker_queue_reports_error() {
        let mut config = test_config();
        config.keyed_pool.worker_count = 1;
        config.keyed_pool.queue_size = 1;
        config.keyed_pool.wait_timeout = Some(Duration::from_millis(50));
        let fixture = Fixture::new(config);
        let (release, released) = watch::channel(false);

        fixture
            .bus
            .subscribe_envelope(
                "orders",
                envelope_handler_fn(move |_| {
                    let mut released = released.clone();
                    async move {
                        let _ = released.wait_for(|r| *r).await;
                        Ok(())
                    }
                }),
                SubscribeOptions::default(),
            )
            .await
            .unwrap();

        for version in 1..=3 {
            let env = Envelope::new("order-1", "OrderUpdated", version, b"{}".to_vec());
            fixture.bus.publish_envelope("orders", &env).await.unwrap();
        }

        let stats = fixture.bus.subscriber_stats();
        assert_eq!(stats.processing_errors, 1);

        release.send(true).unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                fixture.bus.subscriber_stats().messages_processed == 3
            })
            .await
        );
        fixture.bus.close().await.unwrap();
    }
}
