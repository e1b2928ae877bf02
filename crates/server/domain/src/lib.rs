// Marketplace event bus - Domain Layer
// - shared_kernel: error taxonomy and small helpers shared by every context
// - events: domain events, wire envelope and the payload registry
// - outbox: outbox and dead letter models plus their store ports
// - transaction: transaction provider port
// - idempotency: per-consumer processed marks
// - event_bus: broker port
// - orders: order aggregate, money rules and transition guards
// - sinks: downstream effect ports (warehouse, notifications)

pub mod event_bus;
pub mod events;
pub mod idempotency;
pub mod orders;
pub mod outbox;
pub mod shared_kernel;
pub mod sinks;
pub mod transaction;

pub use marketplace_shared::*;
pub use shared_kernel::*;
