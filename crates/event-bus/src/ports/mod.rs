//! Ports module for the event bus engine

pub mod inbound;
pub mod outbound;

pub use inbound::EventBusApi;
pub use outbound::{
    byte_handler_fn, envelope_handler_fn, ByteHandler, EnvelopeHandler, ErrorClassifier,
    LagSource, MessageRouter, RawMessage, Transport,
};
