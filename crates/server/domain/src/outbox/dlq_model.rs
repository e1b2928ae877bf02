//! Dead Letter Queue (DLQ) model
//!
//! Outbox rows that exhausted the terminal attempt threshold are archived
//! here, keyed by the envelope's event id, and never retried automatically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::{truncate_error, OutboxError, OutboxRow};
use crate::shared_kernel::DomainError;
use crate::transaction::TransactionError;
use marketplace_shared::EventId;

pub const DEFAULT_DLQ_LIST_LIMIT: u32 = 50;

/// Error types for DLQ operations
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DlqError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<TransactionError> for DlqError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::AlreadyCompleted => {
                DlqError::InvalidArgument("no active transaction".to_string())
            }
            other => DlqError::Database(other.to_string()),
        }
    }
}

impl From<DlqError> for DomainError {
    fn from(err: DlqError) -> Self {
        match err {
            DlqError::InvalidArgument(message) => DomainError::InvalidArg(message),
            DlqError::Database(message) => DomainError::Dependency(format!("dlq: {}", message)),
        }
    }
}

impl From<DlqError> for OutboxError {
    fn from(err: DlqError) -> Self {
        match err {
            DlqError::InvalidArgument(message) => OutboxError::InvalidArgument(message),
            DlqError::Database(message) => OutboxError::Database(message),
        }
    }
}

/// A terminally failed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlqEntry {
    pub event_id: EventId,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// Last publish error, at most 1024 bytes
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Build the entry for an outbox row. `event_id` is the envelope id, or
    /// the row id when the envelope itself could not be decoded.
    pub fn from_outbox_row(row: &OutboxRow, event_id: EventId, error: &str) -> Self {
        Self {
            event_id,
            event_type: row.event_type.clone(),
            aggregate_type: row.aggregate_type.clone(),
            aggregate_id: row.aggregate_id,
            error_message: truncate_error(error),
            failed_at: Utc::now(),
        }
    }

    /// Time spent in the DLQ
    pub fn time_in_dlq(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.failed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AggregateType, EventType};

    #[test]
    fn test_entry_from_outbox_row_truncates_error() {
        let row = OutboxRow::pending(
            EventType::OrderPaid,
            AggregateType::Order,
            Uuid::new_v4(),
            Vec::new(),
        );
        let event_id = EventId::new();
        let entry = DlqEntry::from_outbox_row(&row, event_id, &"e".repeat(4096));

        assert_eq!(entry.event_id, event_id);
        assert_eq!(entry.event_type, "order.paid");
        assert_eq!(entry.aggregate_id, row.aggregate_id);
        assert_eq!(entry.error_message.len(), 1024);
    }
}
