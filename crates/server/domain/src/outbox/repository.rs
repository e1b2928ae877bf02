//! Outbox store port

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{EventKey, OutboxError, OutboxRow, OutboxStats};
use crate::transaction::TxHandle;

/// Durable queue of events co-located with the business tables.
///
/// Writes go through the caller's transaction; the store never commits.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    type Tx: TxHandle;

    /// Append a row. Fails with `InvalidArgument` on an inactive transaction.
    async fn insert(&self, tx: &mut Self::Tx, row: OutboxRow) -> Result<(), OutboxError>;

    /// Lease up to `limit` unpublished rows with `attempt_count < max_attempts`
    /// (no attempt guard when `max_attempts <= 0`), oldest first, ties broken
    /// by id.
    ///
    /// Leased rows stay locked until `tx` ends; rows leased by a concurrent
    /// transaction are skipped, never waited on.
    async fn fetch_batch(
        &self,
        tx: &mut Self::Tx,
        limit: u32,
        max_attempts: i32,
    ) -> Result<Vec<OutboxRow>, OutboxError>;

    /// Set `published_at` to now. Repeat-safe: an already published row keeps
    /// its original timestamp.
    async fn mark_published(&self, tx: &mut Self::Tx, id: Uuid) -> Result<(), OutboxError>;

    /// Record the (truncated) error and increment `attempt_count`.
    async fn mark_failed(&self, tx: &mut Self::Tx, id: Uuid, error: &str)
        -> Result<(), OutboxError>;

    /// Record the error and raise `attempt_count` to at least `terminal`.
    async fn mark_terminal(
        &self,
        tx: &mut Self::Tx,
        id: Uuid,
        error: &str,
        terminal: i32,
    ) -> Result<(), OutboxError>;

    /// Whether any row exists for the event key
    async fn exists(&self, tx: &mut Self::Tx, key: &EventKey) -> Result<bool, OutboxError>;

    /// Retention sweep: delete rows published before `cutoff` whose
    /// `attempt_count >= min_attempts`. Runs in its own transaction.
    async fn delete_published_before(
        &self,
        cutoff: DateTime<Utc>,
        min_attempts: i32,
    ) -> Result<u64, OutboxError>;

    async fn stats(&self, terminal_attempts: i32) -> Result<OutboxStats, OutboxError>;

    /// Committed state of a single row
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxRow>, OutboxError>;
}
