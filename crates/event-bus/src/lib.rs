//! # event-bus
//!
//! Broker-agnostic event bus engine sitting between a message transport and
//! business handlers.
//!
//! ## Overview
//!
//! - **Keyed ordering**: events sharing an aggregate id run in order on one
//!   worker; distinct aggregates run in parallel
//! - **Backlog detection**: consumer lag is polled per topic and compared to
//!   count/time thresholds
//! - **Recovery mode**: a backlogged topic switches to catch-up tuning until
//!   lag stays low for the dwell time
//! - **Rate limiting**: token bucket (optionally adaptive) on the publish path
//! - **Publisher backlog**: in-flight depth, attempt latency and rate checked
//!   against limits on the publish path
//! - **Health checks**: periodic probes and a monitor that alerts on misses
//!
//! ## Architecture
//!
//! ```text
//! publish ──→ Publisher ──RateLimiter──→ Transport
//!                                           │
//!                                           ▼
//!             AdvancedSubscriber ──route──→ KeyedWorkerPool ──→ handler
//!                    ▲                          ▲
//!                    │ watch                    │ ModeFlag
//! LagSource ──→ BacklogDetector ──BacklogState──→ RecoveryManager
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use event_bus::{EventBus, EventBusConfig};
//! use event_bus::adapters::{ManualLagSource, MemoryTransport};
//! use event_bus::ports::{envelope_handler_fn, EventBusApi};
//!
//! let bus = EventBus::new(
//!     EventBusConfig::default(),
//!     Arc::new(MemoryTransport::new()),
//!     Arc::new(ManualLagSource::new()),
//! )?;
//!
//! bus.subscribe_envelope("orders", envelope_handler_fn(|env| async move {
//!     apply(env).await
//! }), SubscribeOptions::default()).await?;
//!
//! bus.publish_envelope("orders", &Envelope::new("order-1", "OrderPlaced", 1, payload)).await?;
//! bus.close().await?;
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

pub use config::{
    AdaptiveRateConfig, BacklogConfig, EventBusConfig, HealthCheckConfig, KeyedPoolConfig,
    PublisherBacklogConfig, PublisherConfig, RateLimiterConfig, RecoveryConfig, SubscriberConfig,
};
pub use domain::{
    AdaptiveRateLimiter, DefaultErrorClassifier, RateLimiter, RecoveryMode, RecoveryTuning,
    TopicHealth,
};
pub use error::{validate_topic, EventBusError, EventBusResult};
pub use ports::{
    byte_handler_fn, envelope_handler_fn, ByteHandler, EnvelopeHandler, ErrorClassifier,
    EventBusApi, LagSource, MessageRouter, RawMessage, Transport,
};
pub use service::{
    listener_fn, AdvancedSubscriber, BacklogDetector, EventBus, HealthCheckSubscriber,
    HealthChecker, KeyedWorkerPool, Listener, ModeChange, PublishOutcome, Publisher,
    PublisherBacklogDetector, RecoveryManager, SubscriptionEvent, SubscriptionInfo,
};

pub use bus_types::{
    BacklogState, BusMetrics, Envelope, ErrorAction, ErrorActionType, PublishOptions,
    PublisherBacklogSeverity, PublisherBacklogState, RetryPolicy, RouteDecision,
    SubscribeOptions,
};
