// Marketplace event bus - Application Layer
// - transaction: run a closure inside one business transaction
// - outbox: emitter, publisher loop and retention sweep
// - consumer: idempotent consumer runtime and the downstream handlers
// - orders: order lifecycle use cases

pub mod consumer;
pub mod orders;
pub mod outbox;
pub mod transaction;

pub use consumer::{ConsumedEvent, ConsumerRuntime, DeliveryOutcome, EventHandler};
pub use orders::{CashCollectionOutcome, OrderLifecycleService, PlaceOrder};
pub use outbox::{
    EventEmitter, OutboxPublisher, OutboxRetentionWorker, PublisherMetrics, PublisherSettings,
};
pub use transaction::TransactionRunner;
