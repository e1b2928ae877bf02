//! PostgreSQL order, inventory and ledger repositories
//!
//! The order aggregate is stored as a JSONB document next to the columns
//! used for lookups. Every statement runs on the caller's transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use marketplace_server_domain::orders::{
    InventoryRepository, LedgerEntry, LedgerEntryType, LedgerRepository, OrderAggregate,
    OrderRepository,
};
use marketplace_server_domain::{DomainError, LedgerEventId, OrderId, ProductId};

use super::transaction::PgTx;

fn db_error(err: sqlx::Error) -> DomainError {
    DomainError::Dependency(format!("database: {}", err))
}

#[derive(Debug, Clone, Default)]
pub struct PostgresOrderRepository;

impl PostgresOrderRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    type Tx = PgTx;

    async fn load(&self, tx: &mut PgTx, id: &OrderId) -> Result<Option<OrderAggregate>, DomainError> {
        let row: Option<(Json<OrderAggregate>,)> =
            sqlx::query_as("SELECT aggregate FROM orders WHERE id = $1 FOR UPDATE")
                .bind(*id.as_uuid())
                .fetch_optional(tx.conn()?)
                .await
                .map_err(db_error)?;
        Ok(row.map(|(Json(aggregate),)| aggregate))
    }

    async fn save(&self, tx: &mut PgTx, aggregate: &OrderAggregate) -> Result<(), DomainError> {
        let order = &aggregate.order;
        sqlx::query(
            r#"
            INSERT INTO orders
                (id, checkout_group_id, store_id, buyer_id, status, payment_status,
                 aggregate, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                payment_status = EXCLUDED.payment_status,
                aggregate = EXCLUDED.aggregate,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(*order.id.as_uuid())
        .bind(*order.checkout_group_id.as_uuid())
        .bind(*order.store_id.as_uuid())
        .bind(*order.buyer_id.as_uuid())
        .bind(order.status.as_str())
        .bind(aggregate.payment.status.as_str())
        .bind(Json(aggregate))
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(tx.conn()?)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgresInventoryRepository;

impl PostgresInventoryRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InventoryRepository for PostgresInventoryRepository {
    type Tx = PgTx;

    async fn reserve(
        &self,
        tx: &mut PgTx,
        product_id: &ProductId,
        quantity: i32,
    ) -> Result<bool, DomainError> {
        if quantity <= 0 {
            return Err(DomainError::InvalidArg(
                "reservation quantity must be positive".to_string(),
            ));
        }
        let result = sqlx::query(
            r#"
            UPDATE inventory
            SET available = available - $2
            WHERE product_id = $1 AND available >= $2
            "#,
        )
        .bind(*product_id.as_uuid())
        .bind(i64::from(quantity))
        .execute(tx.conn()?)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(
        &self,
        tx: &mut PgTx,
        product_id: &ProductId,
        quantity: i32,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO inventory (product_id, available)
            VALUES ($1, $2)
            ON CONFLICT (product_id) DO UPDATE
            SET available = inventory.available + EXCLUDED.available
            "#,
        )
        .bind(*product_id.as_uuid())
        .bind(i64::from(quantity.max(0)))
        .execute(tx.conn()?)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

#[derive(FromRow)]
struct LedgerRecord {
    id: Uuid,
    order_id: Uuid,
    entry_type: String,
    amount_cents: i64,
    created_at: DateTime<Utc>,
}

fn parse_entry_type(value: &str) -> Result<LedgerEntryType, DomainError> {
    match value {
        "cash_collected" => Ok(LedgerEntryType::CashCollected),
        "vendor_payout" => Ok(LedgerEntryType::VendorPayout),
        other => Err(DomainError::Internal(format!(
            "unknown ledger entry type: {}",
            other
        ))),
    }
}

impl TryFrom<LedgerRecord> for LedgerEntry {
    type Error = DomainError;

    fn try_from(record: LedgerRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: LedgerEventId::from_uuid(record.id),
            order_id: OrderId::from_uuid(record.order_id),
            entry_type: parse_entry_type(&record.entry_type)?,
            amount_cents: record.amount_cents,
            created_at: record.created_at,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostgresLedgerRepository;

impl PostgresLedgerRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    type Tx = PgTx;

    async fn append(&self, tx: &mut PgTx, entry: &LedgerEntry) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO ledger_events (id, order_id, entry_type, amount_cents, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_id, entry_type) DO NOTHING
            "#,
        )
        .bind(*entry.id.as_uuid())
        .bind(*entry.order_id.as_uuid())
        .bind(entry.entry_type.as_str())
        .bind(entry.amount_cents)
        .bind(entry.created_at)
        .execute(tx.conn()?)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn entries_for_order(
        &self,
        tx: &mut PgTx,
        order_id: &OrderId,
    ) -> Result<Vec<LedgerEntry>, DomainError> {
        let records: Vec<LedgerRecord> = sqlx::query_as(
            r#"
            SELECT id, order_id, entry_type, amount_cents, created_at
            FROM ledger_events
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(*order_id.as_uuid())
        .fetch_all(tx.conn()?)
        .await
        .map_err(db_error)?;

        records.into_iter().map(LedgerEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_names_round_trip() {
        for entry_type in [LedgerEntryType::CashCollected, LedgerEntryType::VendorPayout] {
            assert_eq!(parse_entry_type(entry_type.as_str()).unwrap(), entry_type);
        }
        assert!(parse_entry_type("refund").is_err());
    }
}
