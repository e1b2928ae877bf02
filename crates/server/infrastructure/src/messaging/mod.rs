//! Broker adapters

pub mod nats;

pub use nats::{NatsBroker, StreamSettings};
