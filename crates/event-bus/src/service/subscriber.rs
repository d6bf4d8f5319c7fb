//! # Advanced Subscriber
//!
//! Wraps every registered handler so each delivery updates the topic's
//! bookkeeping and the global counters, fires lifecycle events, and is
//! routed through a keyed-worker pool when ordering is requested.
//!
//! ## Per-message flow
//!
//! ```text
//! transport ─→ Dispatch ─┬─ decode envelope (envelope handlers)
//!                        ├─ MessageRouter (optional skip / re-key)
//!                        ├─ routing key: envelope → headers → key → subject → round robin
//!                        └─→ KeyedWorkerPool ─→ Processor ─→ handler
//!                                                  │
//!                      retry in place / skip / dead-letter ←┘
//! ```
//!
//! Per-message failures never cross back over the subscribe boundary; they
//! show up in statistics and `Error` events only.

use super::backlog_detector::BacklogDetector;
use super::keyed_pool::{KeyedWorkerPool, PoolHandler};
use super::listeners::{listener_fn, Listener, ListenerSet};
use super::panic_message;
use super::recovery_manager::{ModeChange, RecoveryManager};
use crate::config::{KeyedPoolConfig, SubscriberConfig};
use crate::domain::{DefaultErrorClassifier, Keyed, ModeFlag, RateLimiter, RecoveryMode};
use crate::error::{validate_topic, EventBusError, EventBusResult};
use crate::metrics;
use crate::ports::outbound::{
    ByteHandler, EnvelopeHandler, ErrorClassifier, MessageRouter, RawMessage, Transport,
};
use async_trait::async_trait;
use bus_types::{
    extract_aggregate_id, Envelope, ErrorActionType, SubscribeOptions, SubscriberStats,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle event delivered to subscription listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Started {
        topic: String,
        timestamp: DateTime<Utc>,
    },
    /// A message was handled successfully. Suppressed while recovering.
    Message {
        topic: String,
        aggregate_id: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        topic: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    Stopped {
        topic: String,
        timestamp: DateTime<Utc>,
    },
}

impl SubscriptionEvent {
    pub fn topic(&self) -> &str {
        match self {
            Self::Started { topic, .. }
            | Self::Message { topic, .. }
            | Self::Error { topic, .. }
            | Self::Stopped { topic, .. } => topic,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Message { .. } => "message",
            Self::Error { .. } => "error",
            Self::Stopped { .. } => "stopped",
        }
    }
}

/// Copy of one topic's bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    pub topic: String,
    pub consumer_group: String,
    pub options: SubscribeOptions,
    /// Handlers registered for the topic.
    pub handler_count: usize,
    pub is_active: bool,
    pub start_time: DateTime<Utc>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub messages_count: u64,
    pub error_count: u64,
    pub mode: RecoveryMode,
}

struct Subscription {
    info: SubscriptionInfo,
    flag: ModeFlag,
    pools: Vec<Arc<KeyedWorkerPool<Delivery>>>,
}

/// One message on its way to a handler.
#[derive(Clone)]
struct Delivery {
    key: String,
    message: RawMessage,
    envelope: Option<Envelope>,
}

impl Keyed for Delivery {
    fn routing_key(&self) -> &str {
        &self.key
    }
}

#[derive(Clone)]
enum HandlerKind {
    Bytes(Arc<dyn ByteHandler>),
    Envelope(Arc<dyn EnvelopeHandler>),
}

struct Shared {
    transport: Arc<dyn Transport>,
    pool_config: KeyedPoolConfig,
    config: SubscriberConfig,
    recovery: Option<Arc<RecoveryManager>>,
    detector: Option<Arc<BacklogDetector>>,
    classifier: RwLock<Arc<dyn ErrorClassifier>>,
    router: RwLock<Option<Arc<dyn MessageRouter>>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    listeners: ListenerSet<SubscriptionEvent>,
    started: AtomicBool,
    stopped: AtomicBool,
    start_time: RwLock<Option<(DateTime<Utc>, Instant)>>,
    processed: AtomicU64,
    errors: AtomicU64,
    round_robin: AtomicU64,
    pool_seq: AtomicU64,
}

impl Shared {
    fn classifier(&self) -> Arc<dyn ErrorClassifier> {
        self.classifier.read().clone()
    }

    fn emit(&self, event: SubscriptionEvent) {
        self.listeners.notify(event);
    }
}

/// Runs the business handler for one subscription.
struct Processor {
    topic: String,
    handler: HandlerKind,
    options: SubscribeOptions,
    limiter: Option<RateLimiter>,
    flag: ModeFlag,
    shared: Arc<Shared>,
}

impl Processor {
    async fn process(&self, delivery: &Delivery) -> EventBusResult<()> {
        if let Some(limiter) = &self.limiter {
            limiter.wait(None).await?;
        }
        let mut attempt = 0u32;
        loop {
            let err = match self.invoke(delivery).await {
                Ok(()) => {
                    self.record_success(&delivery.key);
                    return Ok(());
                }
                Err(err) => err,
            };
            let action = self.shared.classifier().classify(
                &self.topic,
                &err,
                attempt,
                self.options.max_retries,
                self.options.retry_backoff,
            );
            match action.action {
                ErrorActionType::Retry if attempt < self.options.max_retries => {
                    debug!(
                        topic = %self.topic,
                        aggregate_id = %delivery.key,
                        attempt = attempt + 1,
                        retry_after_ms = action.retry_after.as_millis() as u64,
                        error = %err,
                        "Retrying message"
                    );
                    tokio::time::sleep(action.retry_after).await;
                    attempt += 1;
                }
                ErrorActionType::DeadLetter => {
                    self.record_failure(&err);
                    self.dead_letter(&delivery.message, &err).await;
                    return Err(err);
                }
                ErrorActionType::Retry | ErrorActionType::Skip => {
                    self.record_failure(&err);
                    return Err(err);
                }
            }
        }
    }

    async fn invoke(&self, delivery: &Delivery) -> EventBusResult<()> {
        let call = match (&self.handler, &delivery.envelope) {
            (HandlerKind::Bytes(handler), _) => handler.handle(&delivery.message),
            (HandlerKind::Envelope(handler), Some(envelope)) => handler.handle(envelope),
            (HandlerKind::Envelope(_), None) => {
                return Err(EventBusError::handler("envelope handler without envelope"));
            }
        };
        let timeout = self.options.processing_timeout;
        match tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let reason = panic_message(panic.as_ref());
                error!(
                    topic = %self.topic,
                    aggregate_id = %delivery.key,
                    panic = %reason,
                    "Handler panicked"
                );
                Err(EventBusError::HandlerPanic { reason })
            }
            Err(_) => Err(EventBusError::HandlerTimeout { timeout }),
        }
    }

    /// Failure that never reached the handler (decode error, full queue).
    async fn reject(&self, message: &RawMessage, err: EventBusError) {
        let action = self.shared.classifier().classify(
            &self.topic,
            &err,
            self.options.max_retries,
            self.options.max_retries,
            self.options.retry_backoff,
        );
        self.record_failure(&err);
        if action.action == ErrorActionType::DeadLetter {
            self.dead_letter(message, &err).await;
        }
    }

    fn record_success(&self, aggregate_id: &str) {
        self.shared.processed.fetch_add(1, Ordering::Relaxed);
        metrics::record_consumed(&self.topic);
        let now = Utc::now();
        if let Some(sub) = self.shared.subscriptions.write().get_mut(&self.topic) {
            sub.info.messages_count += 1;
            sub.info.last_message_time = Some(now);
        }
        if !self.flag.is_recovering() {
            self.shared.emit(SubscriptionEvent::Message {
                topic: self.topic.clone(),
                aggregate_id: aggregate_id.to_string(),
                timestamp: now,
            });
        }
    }

    /// A router-declined message: counted, no callback.
    fn record_skipped(&self) {
        self.shared.processed.fetch_add(1, Ordering::Relaxed);
        if let Some(sub) = self.shared.subscriptions.write().get_mut(&self.topic) {
            sub.info.messages_count += 1;
            sub.info.last_message_time = Some(Utc::now());
        }
    }

    fn record_failure(&self, err: &EventBusError) {
        self.shared.processed.fetch_add(1, Ordering::Relaxed);
        self.shared.errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_consume_error(&self.topic, err.kind());
        let now = Utc::now();
        if let Some(sub) = self.shared.subscriptions.write().get_mut(&self.topic) {
            sub.info.messages_count += 1;
            sub.info.error_count += 1;
            sub.info.last_message_time = Some(now);
        }
        warn!(topic = %self.topic, kind = err.kind(), error = %err, "Message processing failed");
        self.shared.emit(SubscriptionEvent::Error {
            topic: self.topic.clone(),
            error: err.to_string(),
            timestamp: now,
        });
    }

    async fn dead_letter(&self, message: &RawMessage, err: &EventBusError) {
        let suffix = self.shared.config.dead_letter_suffix.as_str();
        if suffix.is_empty() || self.topic.ends_with(suffix) {
            warn!(topic = %self.topic, error = %err, "Dead-letter message dropped");
            return;
        }
        let dlq = format!("{}{}", self.topic, suffix);
        match self.shared.transport.publish(&dlq, &message.payload).await {
            Ok(()) => {
                metrics::record_dead_letter(&self.topic);
                info!(topic = %self.topic, dlq = %dlq, error = %err, "Message dead-lettered");
            }
            Err(e) => {
                error!(topic = %self.topic, dlq = %dlq, error = %e, "Dead-letter publish failed");
            }
        }
    }

    fn fallback_key(&self, message: &RawMessage, envelope: Option<&Envelope>) -> String {
        if let Some(envelope) = envelope {
            return envelope.aggregate_id().to_string();
        }
        extract_aggregate_id(
            &message.payload,
            Some(&message.headers),
            message.key.as_deref(),
            Some(&message.topic),
        )
        .unwrap_or_else(|_| {
            let n = self.shared.round_robin.fetch_add(1, Ordering::Relaxed);
            format!("rr-{}", n % self.shared.pool_config.worker_count.max(1) as u64)
        })
    }
}

#[async_trait]
impl PoolHandler<Delivery> for Processor {
    async fn handle(&self, item: &Delivery) -> EventBusResult<()> {
        self.process(item).await
    }
}

/// The handler registered with the transport.
struct Dispatch {
    processor: Arc<Processor>,
    pool: Option<Arc<KeyedWorkerPool<Delivery>>>,
}

#[async_trait]
impl ByteHandler for Dispatch {
    async fn handle(&self, message: &RawMessage) -> EventBusResult<()> {
        let processor = &self.processor;
        if processor.shared.stopped.load(Ordering::Acquire) {
            debug!(topic = %processor.topic, "Subscriber stopped; message ignored");
            return Ok(());
        }

        let envelope = match &processor.handler {
            HandlerKind::Envelope(_) => match Envelope::from_bytes(&message.payload) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    processor.reject(message, e.into()).await;
                    return Ok(());
                }
            },
            HandlerKind::Bytes(_) => None,
        };

        let router = processor.shared.router.read().clone();
        let mut key = None;
        if let Some(router) = router {
            let decision = router.route(message, envelope.as_ref());
            if !decision.should_process {
                debug!(topic = %processor.topic, "Message skipped by router");
                processor.record_skipped();
                return Ok(());
            }
            if !decision.aggregate_id.is_empty() {
                key = Some(decision.aggregate_id);
            } else if !decision.processor_key.is_empty() {
                key = Some(decision.processor_key);
            }
        }
        let key = key.unwrap_or_else(|| processor.fallback_key(message, envelope.as_ref()));

        let delivery = Delivery {
            key,
            message: message.clone(),
            envelope,
        };
        match &self.pool {
            Some(pool) => match pool.route(delivery).await {
                Ok(completion) => {
                    drop(completion);
                    Ok(())
                }
                Err(e) => {
                    processor.reject(message, e.clone()).await;
                    Err(e)
                }
            },
            None => {
                let _ = processor.process(&delivery).await;
                Ok(())
            }
        }
    }
}

/// Subscription façade over a [`Transport`].
#[derive(Clone)]
pub struct AdvancedSubscriber {
    shared: Arc<Shared>,
}

impl AdvancedSubscriber {
    pub fn new(
        transport: Arc<dyn Transport>,
        pool_config: KeyedPoolConfig,
        config: SubscriberConfig,
    ) -> Self {
        Self::build(transport, pool_config, config, None, None)
    }

    /// Subscriber whose topics are watched by `detector` and whose pools
    /// follow the modes kept by `recovery`.
    pub fn with_backlog(
        transport: Arc<dyn Transport>,
        pool_config: KeyedPoolConfig,
        config: SubscriberConfig,
        detector: Arc<BacklogDetector>,
        recovery: Arc<RecoveryManager>,
    ) -> Self {
        Self::build(transport, pool_config, config, Some(detector), Some(recovery))
    }

    fn build(
        transport: Arc<dyn Transport>,
        pool_config: KeyedPoolConfig,
        config: SubscriberConfig,
        detector: Option<Arc<BacklogDetector>>,
        recovery: Option<Arc<RecoveryManager>>,
    ) -> Self {
        let listeners = ListenerSet::new("subscription", config.listener_timeout);
        let shared = Arc::new(Shared {
            transport,
            pool_config,
            config,
            recovery,
            detector,
            classifier: RwLock::new(Arc::new(DefaultErrorClassifier)),
            router: RwLock::new(None),
            subscriptions: RwLock::new(HashMap::new()),
            listeners,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            start_time: RwLock::new(None),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            round_robin: AtomicU64::new(0),
            pool_seq: AtomicU64::new(0),
        });
        if let Some(recovery) = &shared.recovery {
            recovery.add_listener(mode_forwarder(Arc::downgrade(&shared)));
        }
        Self { shared }
    }

    pub fn set_error_classifier(&self, classifier: Arc<dyn ErrorClassifier>) {
        *self.shared.classifier.write() = classifier;
    }

    pub fn set_router(&self, router: Arc<dyn MessageRouter>) {
        *self.shared.router.write() = Some(router);
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener<SubscriptionEvent>>) {
        self.shared.listeners.add(listener);
    }

    /// Mark the subscriber started. Idempotent.
    pub fn start(&self) {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.shared.start_time.write() = Some((Utc::now(), Instant::now()));
        info!("Advanced subscriber started");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Register a raw-bytes handler for `topic`.
    ///
    /// # Errors
    /// - `Closed`: the subscriber was stopped
    /// - `InvalidTopic`, `Config`: rejected parameters
    /// - any transport error from registering the handler
    pub async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn ByteHandler>,
        options: SubscribeOptions,
    ) -> EventBusResult<()> {
        self.register(topic, HandlerKind::Bytes(handler), options)
            .await
    }

    /// Register an envelope handler for `topic`.
    pub async fn subscribe_envelope(
        &self,
        topic: &str,
        handler: Arc<dyn EnvelopeHandler>,
        options: SubscribeOptions,
    ) -> EventBusResult<()> {
        self.register(topic, HandlerKind::Envelope(handler), options)
            .await
    }

    async fn register(
        &self,
        topic: &str,
        handler: HandlerKind,
        options: SubscribeOptions,
    ) -> EventBusResult<()> {
        let shared = &self.shared;
        if self.is_stopped() {
            return Err(EventBusError::Closed);
        }
        validate_topic(topic)?;
        if options.processing_timeout.is_zero() {
            return Err(EventBusError::config("processing_timeout must be > 0"));
        }
        let limiter = options
            .rate_limit
            .map(|rate| RateLimiter::new(rate, options.rate_burst))
            .transpose()?;

        let existing_flag = shared
            .subscriptions
            .read()
            .get(topic)
            .filter(|s| s.info.is_active)
            .map(|s| s.flag.clone());
        let flag = existing_flag.unwrap_or_else(|| {
            shared
                .recovery
                .as_ref()
                .map_or_else(ModeFlag::new, |r| r.register_topic(topic))
        });

        let processor = Arc::new(Processor {
            topic: topic.to_string(),
            handler,
            options: options.clone(),
            limiter,
            flag: flag.clone(),
            shared: Arc::clone(shared),
        });
        let pool = if options.use_keyed_pool {
            let seq = shared.pool_seq.fetch_add(1, Ordering::Relaxed);
            let handler: Arc<dyn PoolHandler<Delivery>> = processor.clone();
            Some(Arc::new(KeyedWorkerPool::with_mode(
                format!("{topic}#{seq}"),
                &shared.pool_config,
                handler,
                flag.clone(),
            )?))
        } else {
            None
        };

        let dispatch = Arc::new(Dispatch {
            processor,
            pool: pool.clone(),
        });
        if let Err(e) = shared.transport.subscribe(topic, dispatch).await {
            if let Some(pool) = pool {
                pool.shutdown(shared.pool_config.shutdown_grace).await;
            }
            return Err(e);
        }

        let first = {
            let mut subs = shared.subscriptions.write();
            if shared.stopped.load(Ordering::Acquire) {
                None
            } else {
                let now = Utc::now();
                let entry = subs.entry(topic.to_string()).or_insert_with(|| Subscription {
                    info: SubscriptionInfo {
                        topic: topic.to_string(),
                        consumer_group: options.consumer_group.clone(),
                        options: options.clone(),
                        handler_count: 0,
                        is_active: false,
                        start_time: now,
                        last_message_time: None,
                        messages_count: 0,
                        error_count: 0,
                        mode: RecoveryMode::Normal,
                    },
                    flag: flag.clone(),
                    pools: Vec::new(),
                });
                let first = !entry.info.is_active;
                if first {
                    entry.flag = flag;
                    entry.info.handler_count = 0;
                    entry.info.is_active = true;
                    entry.info.start_time = now;
                    entry.info.options = options.clone();
                }
                entry.info.handler_count += 1;
                entry.pools.extend(pool.clone());
                Some(first)
            }
        };

        let Some(first) = first else {
            // Stopped while registering.
            let _ = shared.transport.unsubscribe(topic).await;
            if let Some(pool) = pool {
                pool.shutdown(shared.pool_config.shutdown_grace).await;
            }
            return Err(EventBusError::Closed);
        };

        if first {
            if let Some(detector) = &shared.detector {
                detector.watch_topic(topic, &options.consumer_group);
            }
            shared.emit(SubscriptionEvent::Started {
                topic: topic.to_string(),
                timestamp: Utc::now(),
            });
        }
        metrics::set_active_subscriptions(self.active_count());
        info!(
            topic = %topic,
            keyed = options.use_keyed_pool,
            consumer_group = %options.consumer_group,
            "Subscribed"
        );
        Ok(())
    }

    /// Remove every handler for `topic` and mark it inactive.
    pub async fn unsubscribe(&self, topic: &str) -> EventBusResult<()> {
        let shared = &self.shared;
        if self.is_stopped() {
            return Err(EventBusError::Closed);
        }
        let active = shared
            .subscriptions
            .read()
            .get(topic)
            .is_some_and(|s| s.info.is_active);
        if !active {
            return Ok(());
        }

        // Bookkeeping stays untouched until the transport lets go.
        shared.transport.unsubscribe(topic).await?;
        let pools = {
            let mut subs = shared.subscriptions.write();
            match subs.get_mut(topic) {
                Some(sub) if sub.info.is_active => {
                    sub.info.is_active = false;
                    std::mem::take(&mut sub.pools)
                }
                _ => return Ok(()),
            }
        };
        if let Some(detector) = &shared.detector {
            detector.unwatch_topic(topic);
        }
        if let Some(recovery) = &shared.recovery {
            recovery.forget_topic(topic);
        }
        let grace = shared.pool_config.shutdown_grace;
        join_all(pools.iter().map(|p| p.shutdown(grace))).await;
        shared.emit(SubscriptionEvent::Stopped {
            topic: topic.to_string(),
            timestamp: Utc::now(),
        });
        metrics::set_active_subscriptions(self.active_count());
        info!(topic = %topic, "Unsubscribed");
        Ok(())
    }

    /// Mark every subscription inactive, fire `Stopped` events, and drain the
    /// worker pools. Idempotent.
    pub async fn stop(&self) -> EventBusResult<()> {
        let shared = &self.shared;
        if shared.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (topics, pools) = {
            let mut subs = shared.subscriptions.write();
            let mut topics = Vec::new();
            let mut pools = Vec::new();
            for (topic, sub) in subs.iter_mut() {
                if sub.info.is_active {
                    sub.info.is_active = false;
                    topics.push(topic.clone());
                }
                pools.append(&mut sub.pools);
            }
            (topics, pools)
        };

        for topic in &topics {
            if let Err(e) = shared.transport.unsubscribe(topic).await {
                debug!(topic = %topic, error = %e, "Transport unsubscribe failed during stop");
            }
            if let Some(detector) = &shared.detector {
                detector.unwatch_topic(topic);
            }
            if let Some(recovery) = &shared.recovery {
                recovery.forget_topic(topic);
            }
            shared.emit(SubscriptionEvent::Stopped {
                topic: topic.clone(),
                timestamp: Utc::now(),
            });
        }

        let grace = shared.pool_config.shutdown_grace;
        join_all(pools.iter().map(|p| p.shutdown(grace))).await;
        metrics::set_active_subscriptions(0);
        info!(topics = topics.len(), "Advanced subscriber stopped");
        Ok(())
    }

    /// Copy of the bookkeeping for `topic`.
    pub fn subscription_info(&self, topic: &str) -> Option<SubscriptionInfo> {
        self.shared.subscriptions.read().get(topic).map(snapshot)
    }

    /// Copies of every tracked subscription, keyed by topic.
    pub fn all_subscriptions(&self) -> HashMap<String, SubscriptionInfo> {
        self.shared
            .subscriptions
            .read()
            .iter()
            .map(|(topic, sub)| (topic.clone(), snapshot(sub)))
            .collect()
    }

    pub fn recovery_mode(&self, topic: &str) -> RecoveryMode {
        self.shared
            .subscriptions
            .read()
            .get(topic)
            .map_or(RecoveryMode::Normal, |s| s.flag.load())
    }

    fn active_count(&self) -> usize {
        self.shared
            .subscriptions
            .read()
            .values()
            .filter(|s| s.info.is_active)
            .count()
    }

    pub fn stats(&self) -> SubscriberStats {
        let shared = &self.shared;
        let (total, active) = {
            let subs = shared.subscriptions.read();
            let active = subs.values().filter(|s| s.info.is_active).count();
            (subs.len(), active)
        };
        let start = *shared.start_time.read();
        SubscriberStats {
            is_started: shared.started.load(Ordering::Acquire) && !self.is_stopped(),
            start_time: start.map(|(wall, _)| wall),
            total_subscriptions: total as u64,
            active_subscriptions: active as u64,
            messages_processed: shared.processed.load(Ordering::Relaxed),
            processing_errors: shared.errors.load(Ordering::Relaxed),
            uptime: start.map(|(_, at)| at.elapsed()).unwrap_or_default(),
        }
    }
}

/// Pushes mode changes of active topics down to the transport.
fn mode_forwarder(shared: Weak<Shared>) -> Arc<dyn Listener<ModeChange>> {
    listener_fn(move |change: ModeChange| {
        let shared = shared.clone();
        async move {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let active = shared
                .subscriptions
                .read()
                .get(&change.topic)
                .is_some_and(|s| s.info.is_active);
            if active {
                shared
                    .transport
                    .on_mode_change(&change.topic, change.tuning)
                    .await;
            }
        }
    })
}

fn snapshot(sub: &Subscription) -> SubscriptionInfo {
    SubscriptionInfo {
        mode: sub.flag.load(),
        ..sub.info.clone()
    }
}
