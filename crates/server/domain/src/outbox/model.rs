//! Outbox row model
//!
//! Rows are appended inside business transactions and drained by the
//! publisher. `published_at` is never cleared once set, and `attempt_count`
//! only grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{AggregateType, EventType};
use crate::shared_kernel::{truncate_message, DomainError, MAX_ERROR_BYTES};
use crate::transaction::TransactionError;

/// Error types for outbox operations
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OutboxError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The optional unique index over the event key rejected the insert
    #[error("Event {event_type} already exists for {aggregate_type} {aggregate_id}")]
    DuplicateEventKey {
        event_type: String,
        aggregate_type: String,
        aggregate_id: Uuid,
    },

    #[error("Outbox row not found: {0}")]
    NotFound(Uuid),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<TransactionError> for OutboxError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::AlreadyCompleted => {
                OutboxError::InvalidArgument("no active transaction".to_string())
            }
            other => OutboxError::Database(other.to_string()),
        }
    }
}

impl From<OutboxError> for DomainError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::InvalidArgument(message) => DomainError::InvalidArg(message),
            OutboxError::DuplicateEventKey { .. } => DomainError::Conflict(err.to_string()),
            OutboxError::NotFound(id) => DomainError::not_found("Outbox row", id),
            OutboxError::Database(message) => DomainError::Dependency(format!("outbox: {}", message)),
            OutboxError::Serialization(message) => DomainError::Internal(message),
        }
    }
}

/// A stored outbox row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// Serialized envelope, opaque to the store
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
}

impl OutboxRow {
    /// A fresh, unpublished row
    pub fn pending(
        event_type: EventType,
        aggregate_type: AggregateType,
        aggregate_id: Uuid,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.as_str().to_string(),
            aggregate_type: aggregate_type.as_str().to_string(),
            aggregate_id,
            payload,
            created_at: Utc::now(),
            published_at: None,
            attempt_count: 0,
            last_error: None,
        }
    }

    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Eligible for leasing under the given terminal threshold. A threshold
    /// of zero or less disables the attempt guard.
    pub fn is_leasable(&self, max_attempts: i32) -> bool {
        !self.is_published() && (max_attempts <= 0 || self.attempt_count < max_attempts)
    }

    /// Whether the optional event-key index covers this row. Repeatable
    /// event types (nudges, retries) are left out of it.
    pub fn has_unique_event_key(&self) -> bool {
        self.event_type
            .parse::<EventType>()
            .map(|event_type| event_type.is_idempotent_by_key())
            .unwrap_or(true)
    }

    /// Age of the row
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

/// The event key used by "emit only if absent"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub event_type: EventType,
    pub aggregate_type: AggregateType,
    pub aggregate_id: Uuid,
}

impl EventKey {
    pub fn matches(&self, row: &OutboxRow) -> bool {
        row.event_type == self.event_type.as_str()
            && row.aggregate_type == self.aggregate_type.as_str()
            && row.aggregate_id == self.aggregate_id
    }
}

/// Outbox counters for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    /// Unpublished rows still below the terminal threshold
    pub pending: u64,
    pub published: u64,
    /// Unpublished rows at or above the terminal threshold
    pub terminal: u64,
}

/// Error text as persisted on outbox and DLQ rows
pub fn truncate_error(message: &str) -> String {
    truncate_message(message, MAX_ERROR_BYTES)
}
