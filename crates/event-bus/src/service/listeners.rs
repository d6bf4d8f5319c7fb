//! # Listener Dispatch
//!
//! Fire-and-forget notification of registered listeners. Each listener runs
//! on its own task under its own timeout; a slow or panicking listener
//! affects neither the caller nor the other listeners.

use super::panic_message;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Receives events of type `E`.
#[async_trait]
pub trait Listener<E>: Send + Sync
where
    E: Send + Sync + 'static,
{
    async fn on_event(&self, event: &E);
}

/// Closure adapter for [`Listener`].
pub struct FnListener<F, E> {
    f: F,
    _event: PhantomData<fn(E)>,
}

#[async_trait]
impl<F, Fut, E> Listener<E> for FnListener<F, E>
where
    F: Fn(E) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn on_event(&self, event: &E) {
        (self.f)(event.clone()).await;
    }
}

/// Wrap an async closure as a shared listener.
pub fn listener_fn<E, F, Fut>(f: F) -> Arc<dyn Listener<E>>
where
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    Arc::new(FnListener {
        f,
        _event: PhantomData,
    })
}

/// A set of listeners notified with a per-listener timeout.
pub struct ListenerSet<E> {
    name: &'static str,
    timeout: Duration,
    listeners: RwLock<Vec<Arc<dyn Listener<E>>>>,
}

impl<E> ListenerSet<E>
where
    E: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn Listener<E>>) {
        self.listeners.write().push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Notify every listener on its own task. Must be called within a Tokio runtime.
    pub fn notify(&self, event: E) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for listener in listeners {
            let event = Arc::clone(&event);
            let name = self.name;
            let timeout = self.timeout;
            tokio::spawn(async move {
                let call = AssertUnwindSafe(listener.on_event(&event)).catch_unwind();
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(())) => {}
                    Ok(Err(panic)) => {
                        warn!(listener = name, panic = %panic_message(panic.as_ref()), "Listener panicked");
                    }
                    Err(_) => {
                        warn!(
                            listener = name,
                            timeout_ms = timeout.as_millis() as u64,
                            "Listener timed out"
                        );
                    }
                }
            });
        }
    }
}
