//! DLQ store port

use async_trait::async_trait;

use super::dlq_model::{DlqEntry, DlqError};
use crate::transaction::TxHandle;
use marketplace_shared::EventId;

/// Insert-only archive of terminally failed events
#[async_trait]
pub trait DlqStore: Send + Sync {
    type Tx: TxHandle;

    /// Archive an entry inside the publisher's transaction. The error message
    /// is truncated to 1024 bytes on write.
    async fn insert(&self, tx: &mut Self::Tx, entry: DlqEntry) -> Result<(), DlqError>;

    async fn find_by_event_id(&self, event_id: &EventId) -> Result<Option<DlqEntry>, DlqError>;

    /// Most recent failures first
    async fn list(&self, limit: u32) -> Result<Vec<DlqEntry>, DlqError>;
}
