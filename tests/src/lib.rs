//! # Event Bus Test Suite
//!
//! Cross-crate integration tests run against the in-process transport.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── common.rs            # bus fixtures and polling helpers
//!     ├── ordering.rs          # per-aggregate order under concurrent producers
//!     ├── parallelism.rs       # a blocked aggregate does not stall others
//!     ├── backpressure.rs      # token bucket timing, full worker queues
//!     ├── lifecycle.rs         # idempotent stop/close, closed errors
//!     ├── backlog.rs           # lag → recovery mode → normal
//!     ├── statistics.rs        # processed / error counters
//!     ├── panic_isolation.rs   # a panicking handler does not starve its sibling
//!     └── health.rs            # health-check publisher and monitor
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p bus-tests
//! cargo test -p bus-tests integration::backlog::
//! ```

#![allow(dead_code)]

pub mod integration;
