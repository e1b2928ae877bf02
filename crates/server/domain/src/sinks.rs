//! Downstream effect ports used by consumer handlers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared_kernel::DomainError;
use marketplace_shared::{EventId, OrderId, StoreId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
    #[error("Sink rejected record: {0}")]
    Rejected(String),
}

impl From<SinkError> for DomainError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Unavailable(message) => DomainError::Dependency(message),
            SinkError::Rejected(message) => DomainError::InvalidArg(message),
        }
    }
}

/// One analytics fact, keyed by the envelope event id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseRow {
    pub event_id: EventId,
    pub event_type: String,
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
    pub actor_user_id: Option<UserId>,
    pub actor_store_id: Option<StoreId>,
    pub actor_role: Option<String>,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait WarehouseSink: Send + Sync {
    /// Insert unless a row with the same event id exists. Returns `true` when
    /// a row was written.
    async fn insert(&self, row: WarehouseRow) -> Result<bool, SinkError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Buyer(UserId),
    Store(StoreId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub event_id: EventId,
    pub order_id: OrderId,
    pub recipient: Recipient,
    pub template: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, request: NotificationRequest) -> Result<(), SinkError>;
}
