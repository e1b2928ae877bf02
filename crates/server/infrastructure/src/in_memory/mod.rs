//! Process-local adapters for every port.
//!
//! Used by the integration tests and for running the pipeline without
//! PostgreSQL or NATS.

pub mod broker;
pub mod database;
pub mod idempotency;
pub mod sinks;

pub use broker::InMemoryBroker;
pub use database::{InMemoryDatabase, MemoryTx};
pub use idempotency::InMemoryIdempotencyStore;
pub use sinks::{InMemoryWarehouse, RecordingNotificationSink};
