//! Service layer for the event bus engine
//!
//! Runtime components built from the domain rules and the ports:
//! - keyed_pool: per-aggregate ordered execution
//! - backlog_detector / recovery_manager: lag polling and catch-up mode
//! - subscriber: the advanced subscriber façade
//! - publisher: rate-limited, retried publishing
//! - publisher_backlog: in-flight depth, latency and rate of the publish side
//! - health_checker / health_subscriber: liveness probes
//! - bus: the [`EventBus`] handle tying everything together

pub mod backlog_detector;
pub mod bus;
pub mod health_checker;
pub mod health_subscriber;
pub mod keyed_pool;
pub mod listeners;
pub mod publisher;
pub mod publisher_backlog;
pub mod recovery_manager;
pub mod subscriber;

pub use backlog_detector::BacklogDetector;
pub use bus::EventBus;
pub use health_checker::HealthChecker;
pub use health_subscriber::HealthCheckSubscriber;
pub use keyed_pool::{pool_handler_fn, Completion, KeyedWorkerPool, PoolHandler, PoolStats};
pub use listeners::{listener_fn, Listener, ListenerSet};
pub use publisher::{PublishOutcome, Publisher};
pub use publisher_backlog::PublisherBacklogDetector;
pub use recovery_manager::{ModeChange, RecoveryManager, RecoveryStats};
pub use subscriber::{AdvancedSubscriber, SubscriptionEvent, SubscriptionInfo};

use std::any::Any;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
