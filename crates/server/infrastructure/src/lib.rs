// Marketplace event bus - Infrastructure Layer
// - persistence: PostgreSQL pool, schema, transactions and stores
// - messaging: NATS JetStream broker
// - in_memory: process-local adapters for tests and local runs
// - notifications: default notification sink

pub mod in_memory;
pub mod messaging;
pub mod notifications;
pub mod persistence;

pub use in_memory::{
    InMemoryBroker, InMemoryDatabase, InMemoryIdempotencyStore, InMemoryWarehouse, MemoryTx,
    RecordingNotificationSink,
};
pub use messaging::{NatsBroker, StreamSettings};
pub use notifications::LoggingNotificationSink;
