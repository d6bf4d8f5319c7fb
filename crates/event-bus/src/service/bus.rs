//! # Event Bus
//!
//! The handle callers own. Wires one transport and one lag source into the
//! publisher, the advanced subscriber, the backlog detector, and the
//! recovery manager, and optionally the health-check publisher and monitor
//! and the publisher backlog monitor.
//!
//! Once [`close`](EventBusApi::close) has been called every operation fails
//! with `Closed`; `close` itself can be repeated.

use super::backlog_detector::BacklogDetector;
use super::health_checker::HealthChecker;
use super::health_subscriber::HealthCheckSubscriber;
use super::listeners::Listener;
use super::publisher::{PublishOutcome, Publisher};
use super::recovery_manager::{ModeChange, RecoveryManager};
use super::subscriber::{AdvancedSubscriber, SubscriptionEvent, SubscriptionInfo};
use crate::config::EventBusConfig;
use crate::error::{EventBusError, EventBusResult};
use crate::ports::inbound::EventBusApi;
use crate::ports::outbound::{
    ByteHandler, EnvelopeHandler, ErrorClassifier, LagSource, MessageRouter, Transport,
};
use async_trait::async_trait;
use bus_types::{
    AdaptiveRateStats, BacklogState, BusMetrics, Envelope, HealthAlert, HealthCheckStatus,
    HealthSubscriberStats, PublishOptions, PublisherBacklogState, SubscribeOptions,
    SubscriberStats,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Broker-agnostic event bus over a single [`Transport`].
pub struct EventBus {
    config: EventBusConfig,
    transport: Arc<dyn Transport>,
    publisher: Arc<Publisher>,
    subscriber: AdvancedSubscriber,
    detector: Arc<BacklogDetector>,
    recovery: Arc<RecoveryManager>,
    health_checker: Mutex<Option<Arc<HealthChecker>>>,
    health_subscriber: Mutex<Option<Arc<HealthCheckSubscriber>>>,
    closed: AtomicBool,
}

impl EventBus {
    /// Validate `config`, build every component, and start the background
    /// loops. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Config` for rejected configuration.
    pub fn new(
        config: EventBusConfig,
        transport: Arc<dyn Transport>,
        lag_source: Arc<dyn LagSource>,
    ) -> EventBusResult<Self> {
        config.validate()?;

        let recovery = Arc::new(RecoveryManager::new(
            config.recovery.clone(),
            config.keyed_pool.recovery_queue_multiplier,
        ));
        let detector = Arc::new(BacklogDetector::with_recovery(
            config.backlog.clone(),
            lag_source,
            Arc::clone(&recovery),
        ));
        let subscriber = AdvancedSubscriber::with_backlog(
            Arc::clone(&transport),
            config.keyed_pool.clone(),
            config.subscriber.clone(),
            Arc::clone(&detector),
            Arc::clone(&recovery),
        );
        let publisher = Arc::new(Publisher::new(
            Arc::clone(&transport),
            &config.rate_limiter,
            &config.adaptive_rate,
            &config.publisher,
        )?);

        recovery.start();
        detector.start();
        subscriber.start();
        info!(
            bus_type = %transport.bus_type(),
            workers = config.keyed_pool.worker_count,
            rate_limited = config.rate_limiter.enabled,
            "Event bus started"
        );

        Ok(Self {
            config,
            transport,
            publisher,
            subscriber,
            detector,
            recovery,
            health_checker: Mutex::new(None),
            health_subscriber: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> EventBusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        Ok(())
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn subscriber(&self) -> &AdvancedSubscriber {
        &self.subscriber
    }

    pub fn backlog_detector(&self) -> &BacklogDetector {
        &self.detector
    }

    pub fn recovery_manager(&self) -> &RecoveryManager {
        &self.recovery
    }

    pub fn set_error_classifier(&self, classifier: Arc<dyn ErrorClassifier>) {
        self.subscriber.set_error_classifier(classifier);
    }

    pub fn set_router(&self, router: Arc<dyn MessageRouter>) {
        self.subscriber.set_router(router);
    }

    pub fn add_subscription_listener(&self, listener: Arc<dyn Listener<SubscriptionEvent>>) {
        self.subscriber.add_listener(listener);
    }

    pub fn add_backlog_listener(&self, listener: Arc<dyn Listener<BacklogState>>) {
        self.detector.add_listener(listener);
    }

    pub fn add_mode_listener(&self, listener: Arc<dyn Listener<ModeChange>>) {
        self.recovery.add_listener(listener);
    }

    pub fn subscriber_stats(&self) -> SubscriberStats {
        self.subscriber.stats()
    }

    pub fn subscription_info(&self, topic: &str) -> Option<SubscriptionInfo> {
        self.subscriber.subscription_info(topic)
    }

    pub fn adaptive_stats(&self) -> Option<AdaptiveRateStats> {
        self.publisher.adaptive_stats()
    }

    /// Listen for the result of every publish call.
    pub fn add_publish_listener(&self, listener: Arc<dyn Listener<PublishOutcome>>) {
        self.publisher.add_outcome_listener(listener);
    }

    pub fn add_publisher_backlog_listener(
        &self,
        listener: Arc<dyn Listener<PublisherBacklogState>>,
    ) {
        self.publisher.backlog_detector().add_listener(listener);
    }

    /// Start the periodic publisher backlog check. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](EventBusApi::close).
    pub fn start_publisher_backlog_monitoring(&self) -> EventBusResult<()> {
        self.ensure_open()?;
        self.publisher.backlog_detector().start();
        Ok(())
    }

    pub async fn stop_publisher_backlog_monitoring(&self) {
        self.publisher.backlog_detector().stop().await;
    }

    /// Publishing pressure in the current window.
    pub fn publisher_backlog_state(&self) -> PublisherBacklogState {
        self.publisher.backlog_detector().state()
    }

    /// Start publishing health probes. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](EventBusApi::close).
    pub fn start_health_check_publisher(&self) -> EventBusResult<()> {
        self.ensure_open()?;
        let checker = {
            let mut slot = self.health_checker.lock();
            if slot.is_some() {
                return Ok(());
            }
            let checker = Arc::new(HealthChecker::new(
                self.config.health_check.clone(),
                Arc::clone(&self.publisher),
                self.transport.bus_type(),
            ));
            *slot = Some(Arc::clone(&checker));
            checker
        };
        checker.start();
        Ok(())
    }

    /// Start monitoring the health topic. Idempotent.
    ///
    /// # Errors
    ///
    /// `Closed` after close, or the transport's subscribe error.
    pub async fn start_health_check_subscriber(&self) -> EventBusResult<()> {
        self.ensure_open()?;
        let monitor = {
            let mut slot = self.health_subscriber.lock();
            if slot.is_some() {
                return Ok(());
            }
            let monitor = Arc::new(HealthCheckSubscriber::new(
                self.config.health_check.clone(),
                Arc::clone(&self.transport),
            ));
            *slot = Some(Arc::clone(&monitor));
            monitor
        };
        if let Err(e) = monitor.start().await {
            self.health_subscriber.lock().take();
            return Err(e);
        }
        Ok(())
    }

    /// Register an alert listener on the running health monitor.
    ///
    /// # Errors
    ///
    /// `Config` when the monitor has not been started.
    pub fn add_health_alert_listener(
        &self,
        listener: Arc<dyn Listener<HealthAlert>>,
    ) -> EventBusResult<()> {
        let monitor = self.health_subscriber.lock().clone();
        match monitor {
            Some(monitor) => {
                monitor.add_alert_listener(listener);
                Ok(())
            }
            None => Err(EventBusError::config("health check subscriber not started")),
        }
    }

    /// Status of the probe publisher, if started.
    pub fn health_status(&self) -> Option<HealthCheckStatus> {
        let checker = self.health_checker.lock().clone();
        checker.map(|c| c.status())
    }

    /// Statistics of the health monitor, if started.
    pub fn health_subscriber_stats(&self) -> Option<HealthSubscriberStats> {
        let monitor = self.health_subscriber.lock().clone();
        monitor.map(|m| m.stats())
    }
}

#[async_trait]
impl EventBusApi for EventBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> EventBusResult<()> {
        self.ensure_open()?;
        self.publisher.publish(topic, payload).await
    }

    async fn publish_envelope(&self, topic: &str, envelope: &Envelope) -> EventBusResult<()> {
        self.ensure_open()?;
        self.publisher.publish_envelope(topic, envelope).await
    }

    async fn publish_with_options(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> EventBusResult<()> {
        self.ensure_open()?;
        self.publisher
            .publish_with_options(topic, payload, options)
            .await
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn ByteHandler>,
        options: SubscribeOptions,
    ) -> EventBusResult<()> {
        self.ensure_open()?;
        self.subscriber.subscribe(topic, handler, options).await
    }

    async fn subscribe_envelope(
        &self,
        topic: &str,
        handler: Arc<dyn EnvelopeHandler>,
        options: SubscribeOptions,
    ) -> EventBusResult<()> {
        self.ensure_open()?;
        self.subscriber
            .subscribe_envelope(topic, handler, options)
            .await
    }

    async fn unsubscribe(&self, topic: &str) -> EventBusResult<()> {
        self.ensure_open()?;
        self.subscriber.unsubscribe(topic).await
    }

    fn metrics(&self) -> BusMetrics {
        let subscriber = self.subscriber.stats();
        let health = self.health_status();
        BusMetrics {
            messages_published: self.publisher.published(),
            messages_consumed: subscriber.messages_processed,
            publish_errors: self.publisher.errors(),
            consume_errors: subscriber.processing_errors,
            last_health_check: health
                .as_ref()
                .and_then(|h| h.last_success_time.max(h.last_failure_time)),
            health_check_status: match &health {
                None => "unknown",
                Some(h) if h.is_healthy => "healthy",
                Some(_) => "unhealthy",
            }
            .to_string(),
            message_backlog: self.detector.total_lag(),
        }
    }

    async fn close(&self) -> EventBusResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Closing event bus");

        let checker = self.health_checker.lock().take();
        if let Some(checker) = checker {
            checker.stop().await;
        }
        let monitor = self.health_subscriber.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
        self.publisher.backlog_detector().stop().await;
        if let Err(e) = self.subscriber.stop().await {
            warn!(error = %e, "Subscriber stop failed");
        }
        self.detector.stop().await;
        self.recovery.stop().await;
        self.transport.close().await?;

        info!("Event bus closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
