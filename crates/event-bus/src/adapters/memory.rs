//! # In-Process Transport
//!
//! Single-node [`Transport`]: every handler registered for a topic receives
//! each published payload on its own task. `publish` returns after all
//! handlers have accepted the message, so sequential publishes reach each
//! handler in publish order.

use crate::domain::RecoveryTuning;
use crate::error::{validate_topic, EventBusError, EventBusResult};
use crate::ports::outbound::{ByteHandler, RawMessage, Transport};
use async_trait::async_trait;
use bus_types::BusType;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// In-memory broker.
#[derive(Default)]
pub struct MemoryTransport {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn ByteHandler>>>>,
    closed: AtomicBool,
    published: AtomicU64,
    /// Remaining publishes that fail with a transport error (test hook).
    fail_publishes: AtomicU32,
    fail_unsubscribes: AtomicU32,
    tunings: RwLock<HashMap<String, RecoveryTuning>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publishes fail with a transport error.
    pub fn fail_next_publishes(&self, count: u32) {
        self.fail_publishes.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` unsubscribes fail with a transport error.
    pub fn fail_next_unsubscribes(&self, count: u32) {
        self.fail_unsubscribes.store(count, Ordering::SeqCst);
    }

    /// Last tuning pushed for `topic` by a mode change.
    pub fn tuning(&self, topic: &str) -> Option<RecoveryTuning> {
        self.tunings.read().get(topic).copied()
    }

    pub fn handler_count(&self, topic: &str) -> usize {
        self.handlers.read().get(topic).map_or(0, Vec::len)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> EventBusResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventBusError::Closed);
        }
        Ok(())
    }

    fn take_injected_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> EventBusResult<()> {
        self.ensure_open()?;
        validate_topic(topic)?;
        if Self::take_injected_failure(&self.fail_publishes) {
            return Err(EventBusError::transport("injected publish failure"));
        }

        let handlers = self.handlers.read().get(topic).cloned().unwrap_or_default();
        self.published.fetch_add(1, Ordering::Relaxed);
        if handlers.is_empty() {
            debug!(topic = %topic, "Message dropped (no handlers)");
            return Ok(());
        }

        let message = Arc::new(RawMessage::new(topic, payload));
        let deliveries = handlers.into_iter().map(|handler| {
            let message = Arc::clone(&message);
            tokio::spawn(async move { handler.handle(&message).await })
        });
        for outcome in join_all(deliveries).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(topic = %topic, error = %e, "Handler rejected message");
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Handler task failed");
                }
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn ByteHandler>) -> EventBusResult<()> {
        self.ensure_open()?;
        validate_topic(topic)?;
        self.handlers
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(handler);
        debug!(topic = %topic, "Handler registered");
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> EventBusResult<()> {
        self.ensure_open()?;
        if Self::take_injected_failure(&self.fail_unsubscribes) {
            return Err(EventBusError::transport("injected unsubscribe failure"));
        }
        self.handlers.write().remove(topic);
        Ok(())
    }

    async fn close(&self) -> EventBusResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.handlers.write().clear();
            debug!("Memory transport closed");
        }
        Ok(())
    }

    fn bus_type(&self) -> BusType {
        BusType::Memory
    }

    async fn on_mode_change(&self, topic: &str, tuning: RecoveryTuning) {
        debug!(
            topic = %topic,
            batch_multiplier = tuning.batch_multiplier,
            "Recovery tuning applied"
        );
        self.tunings.write().insert(topic.to_string(), tuning);
    }
}
