//! Persistence ports for orders, inventory and the ledger.
//!
//! All of them write through the caller's business transaction so the
//! mutation commits together with the outbox row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::OrderAggregate;
use crate::shared_kernel::DomainError;
use crate::transaction::TxHandle;
use marketplace_shared::{LedgerEventId, OrderId, ProductId};

#[async_trait]
pub trait OrderRepository: Send + Sync {
    type Tx: TxHandle;

    /// Load the aggregate, locking it for the rest of the transaction.
    async fn load(
        &self,
        tx: &mut Self::Tx,
        id: &OrderId,
    ) -> Result<Option<OrderAggregate>, DomainError>;

    /// Insert or update the order with its items, payment and assignment.
    async fn save(&self, tx: &mut Self::Tx, aggregate: &OrderAggregate) -> Result<(), DomainError>;
}

/// Stock reservation primitive
#[async_trait]
pub trait InventoryRepository: Send + Sync {
    type Tx: TxHandle;

    /// Reserve `quantity` units. Returns `false` when stock is insufficient.
    async fn reserve(
        &self,
        tx: &mut Self::Tx,
        product_id: &ProductId,
        quantity: i32,
    ) -> Result<bool, DomainError>;

    async fn release(
        &self,
        tx: &mut Self::Tx,
        product_id: &ProductId,
        quantity: i32,
    ) -> Result<(), DomainError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    CashCollected,
    VendorPayout,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::CashCollected => "cash_collected",
            LedgerEntryType::VendorPayout => "vendor_payout",
        }
    }
}

impl fmt::Display for LedgerEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only money movement, unique per `(order_id, entry_type)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEventId,
    pub order_id: OrderId,
    pub entry_type: LedgerEntryType,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(order_id: OrderId, entry_type: LedgerEntryType, amount_cents: i64) -> Self {
        Self {
            id: LedgerEventId::new(),
            order_id,
            entry_type,
            amount_cents,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    type Tx: TxHandle;

    /// Append unless an entry of the same type exists for the order. Returns
    /// `true` when the entry was written.
    async fn append(&self, tx: &mut Self::Tx, entry: &LedgerEntry) -> Result<bool, DomainError>;

    async fn entries_for_order(
        &self,
        tx: &mut Self::Tx,
        order_id: &OrderId,
    ) -> Result<Vec<LedgerEntry>, DomainError>;
}
