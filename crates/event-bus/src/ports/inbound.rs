//! # Inbound Port - EventBusApi
//!
//! Primary driving port: the surface application code publishes and
//! subscribes through.
//!
//! | Method | Ordering |
//! |--------|----------|
//! | `subscribe` / `subscribe_envelope` | per aggregate id when the keyed pool is enabled |
//! | `publish*` | rate limited, retried per policy |
//! | `close` | idempotent; every later call fails with `Closed` |

use super::outbound::{ByteHandler, EnvelopeHandler};
use crate::error::EventBusResult;
use async_trait::async_trait;
use bus_types::{BusMetrics, Envelope, PublishOptions, SubscribeOptions};
use std::sync::Arc;

/// Broker-agnostic event bus.
///
/// # Example
///
/// ```rust,ignore
/// use event_bus::ports::{envelope_handler_fn, EventBusApi};
///
/// async fn example(bus: &impl EventBusApi) -> event_bus::EventBusResult<()> {
///     let handler = envelope_handler_fn(|env| async move {
///         println!("{} v{}", env.aggregate_id(), env.event_version());
///         Ok(())
///     });
///     bus.subscribe_envelope("orders", handler, Default::default()).await?;
///
///     let env = Envelope::new("order-1", "OrderPlaced", 1, b"{}".to_vec());
///     bus.publish_envelope("orders", &env).await
/// }
/// ```
#[async_trait]
pub trait EventBusApi: Send + Sync {
    /// Publish raw bytes.
    ///
    /// # Errors
    /// - `Closed`: the bus was closed
    /// - `InvalidTopic`: the topic cannot be carried by any transport
    /// - `RetriesExhausted`: every attempt failed
    async fn publish(&self, topic: &str, payload: &[u8]) -> EventBusResult<()>;

    /// Validate, encode, and publish an envelope.
    async fn publish_envelope(&self, topic: &str, envelope: &Envelope) -> EventBusResult<()>;

    /// Publish with a per-call timeout and retry policy.
    async fn publish_with_options(
        &self,
        topic: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> EventBusResult<()>;

    /// Register a raw-bytes handler.
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn ByteHandler>,
        options: SubscribeOptions,
    ) -> EventBusResult<()>;

    /// Register an envelope handler. Payloads that fail to decode are
    /// counted as processing errors.
    async fn subscribe_envelope(
        &self,
        topic: &str,
        handler: Arc<dyn EnvelopeHandler>,
        options: SubscribeOptions,
    ) -> EventBusResult<()>;

    /// Remove every handler for `topic`.
    async fn unsubscribe(&self, topic: &str) -> EventBusResult<()>;

    fn metrics(&self) -> BusMetrics;

    /// Stop all background work and release the transport. Idempotent.
    async fn close(&self) -> EventBusResult<()>;

    fn is_closed(&self) -> bool;
}
