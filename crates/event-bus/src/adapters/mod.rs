//! Adapters layer for the event bus engine.
//!
//! In-process implementations of the outbound ports.

pub mod lag;
pub mod memory;

pub use lag::ManualLagSource;
pub use memory::MemoryTransport;
