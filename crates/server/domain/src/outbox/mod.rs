//! Transactional outbox and dead letter queue.

pub mod dlq_model;
pub mod dlq_repository;
pub mod model;
pub mod repository;

pub use dlq_model::{DlqEntry, DlqError, DEFAULT_DLQ_LIST_LIMIT};
pub use dlq_repository::DlqStore;
pub use model::{truncate_error, EventKey, OutboxError, OutboxRow, OutboxStats};
pub use repository::OutboxStore;
