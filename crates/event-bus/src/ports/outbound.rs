//! Driven Ports (SPI - Outbound Dependencies)
//!
//! Transports, lag signals, and the handler capabilities the subscription
//! layer adapts between.

use crate::domain::RecoveryTuning;
use crate::error::{EventBusError, EventBusResult};
use async_trait::async_trait;
use bus_types::{BusType, Envelope, ErrorAction, LagSample, RouteDecision};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A message as delivered by a transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Transport message key (partition key, subject token, ...)
    pub key: Option<Vec<u8>>,
    pub headers: HashMap<String, String>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            key: None,
            headers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Handler for raw transport bytes.
#[async_trait]
pub trait ByteHandler: Send + Sync {
    async fn handle(&self, message: &RawMessage) -> EventBusResult<()>;
}

/// Handler for decoded envelopes.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> EventBusResult<()>;
}

/// Closure adapter for [`ByteHandler`].
pub struct FnByteHandler<F>(F);

#[async_trait]
impl<F, Fut> ByteHandler for FnByteHandler<F>
where
    F: Fn(RawMessage) -> Fut + Send + Sync,
    Fut: Future<Output = EventBusResult<()>> + Send + 'static,
{
    async fn handle(&self, message: &RawMessage) -> EventBusResult<()> {
        (self.0)(message.clone()).await
    }
}

/// Closure adapter for [`EnvelopeHandler`].
pub struct FnEnvelopeHandler<F>(F);

#[async_trait]
impl<F, Fut> EnvelopeHandler for FnEnvelopeHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = EventBusResult<()>> + Send + 'static,
{
    async fn handle(&self, envelope: &Envelope) -> EventBusResult<()> {
        (self.0)(envelope.clone()).await
    }
}

/// Wrap an async closure as a shared [`ByteHandler`].
pub fn byte_handler_fn<F, Fut>(f: F) -> Arc<dyn ByteHandler>
where
    F: Fn(RawMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EventBusResult<()>> + Send + 'static,
{
    Arc::new(FnByteHandler(f))
}

/// Wrap an async closure as a shared [`EnvelopeHandler`].
pub fn envelope_handler_fn<F, Fut>(f: F) -> Arc<dyn EnvelopeHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EventBusResult<()>> + Send + 'static,
{
    Arc::new(FnEnvelopeHandler(f))
}

/// Concrete broker driver.
///
/// Implementations must be safe to call concurrently and must return
/// `EventBusError::Closed` from every call after `close`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> EventBusResult<()>;

    async fn subscribe(&self, topic: &str, handler: Arc<dyn ByteHandler>) -> EventBusResult<()>;

    /// Remove every handler registered for `topic`.
    async fn unsubscribe(&self, topic: &str) -> EventBusResult<()>;

    /// Idempotent.
    async fn close(&self) -> EventBusResult<()>;

    fn bus_type(&self) -> BusType;

    /// `topic` entered or left recovery mode. Drivers that fetch in batches
    /// scale their batch size by `tuning.batch_multiplier`.
    async fn on_mode_change(&self, _topic: &str, _tuning: RecoveryTuning) {}
}

/// Source of consumer lag for the backlog detector.
#[async_trait]
pub trait LagSource: Send + Sync {
    async fn get_lag(&self, topic: &str, consumer_group: &str) -> EventBusResult<LagSample>;
}

/// Per-message routing hook.
pub trait MessageRouter: Send + Sync {
    fn route(&self, message: &RawMessage, envelope: Option<&Envelope>) -> RouteDecision;
}

/// Classifies handler failures into retry / skip / dead-letter.
pub trait ErrorClassifier: Send + Sync {
    /// `attempt` is 0 for the first failure of a message.
    fn classify(
        &self,
        topic: &str,
        error: &EventBusError,
        attempt: u32,
        max_retries: u32,
        retry_backoff: Duration,
    ) -> ErrorAction;
}
