//! Integration tests for the event bus engine.

pub mod common;

mod backlog;
mod backpressure;
mod health;
mod lifecycle;
mod ordering;
mod panic_isolation;
mod parallelism;
mod statistics;
