//! Outbox application services
//!
//! - [`EventEmitter`]: appends events to the outbox inside a business transaction
//! - [`OutboxPublisher`]: leases rows and forwards them to the broker
//! - [`OutboxRetentionWorker`]: deletes old published rows

pub mod emitter;
pub mod metrics;
pub mod publisher;
pub mod retention;

pub use emitter::EventEmitter;
pub use metrics::{PublisherMetrics, PublisherMetricsSnapshot};
pub use publisher::{CycleReport, OutboxPublisher, PublisherSettings};
pub use retention::{OutboxRetentionWorker, RetentionMetrics, RetentionSettings};
