//! PostgreSQL outbox and DLQ stores
//!
//! Writes go through the caller's [`PgTx`]; the publisher's lease is a
//! `FOR UPDATE SKIP LOCKED` row lock held until that transaction ends.
//! Maintenance reads and the retention sweep use the pool directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use marketplace_server_domain::outbox::{
    truncate_error, DlqEntry, DlqError, DlqStore, EventKey, OutboxError, OutboxRow, OutboxStats,
    OutboxStore,
};
use marketplace_server_domain::transaction::TxHandle;
use marketplace_server_domain::EventId;

use super::transaction::PgTx;

fn outbox_db_error(err: sqlx::Error) -> OutboxError {
    OutboxError::Database(err.to_string())
}

fn dlq_db_error(err: sqlx::Error) -> DlqError {
    DlqError::Database(err.to_string())
}

#[derive(FromRow)]
struct OutboxRecord {
    id: Uuid,
    event_type: String,
    aggregate_type: String,
    aggregate_id: Uuid,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    attempt_count: i32,
    last_error: Option<String>,
}

impl From<OutboxRecord> for OutboxRow {
    fn from(record: OutboxRecord) -> Self {
        Self {
            id: record.id,
            event_type: record.event_type,
            aggregate_type: record.aggregate_type,
            aggregate_id: record.aggregate_id,
            payload: record.payload,
            created_at: record.created_at,
            published_at: record.published_at,
            attempt_count: record.attempt_count,
            last_error: record.last_error,
        }
    }
}

const OUTBOX_COLUMNS: &str = "id, event_type, aggregate_type, aggregate_id, payload, created_at, \
                              published_at, attempt_count, last_error";

#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Rows affected by an update that targets one outbox row
    async fn update_one(
        tx: &mut PgTx,
        id: Uuid,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<(), OutboxError> {
        let result = query.execute(tx.conn()?).await.map_err(outbox_db_error)?;
        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    type Tx = PgTx;

    async fn insert(&self, tx: &mut PgTx, row: OutboxRow) -> Result<(), OutboxError> {
        tx.ensure_active()?;
        // ON CONFLICT keeps the caller's transaction usable when the
        // event-key index rejects the row.
        let result = sqlx::query(
            r#"
            INSERT INTO event_outbox
                (id, event_type, aggregate_type, aggregate_id, payload, created_at, attempt_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(&row.event_type)
        .bind(&row.aggregate_type)
        .bind(row.aggregate_id)
        .bind(&row.payload)
        .bind(row.created_at)
        .bind(row.attempt_count)
        .execute(tx.conn()?)
        .await
        .map_err(outbox_db_error)?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::DuplicateEventKey {
                event_type: row.event_type,
                aggregate_type: row.aggregate_type,
                aggregate_id: row.aggregate_id,
            });
        }
        Ok(())
    }

    async fn fetch_batch(
        &self,
        tx: &mut PgTx,
        limit: u32,
        max_attempts: i32,
    ) -> Result<Vec<OutboxRow>, OutboxError> {
        if limit == 0 {
            return Err(OutboxError::InvalidArgument(
                "batch limit must be positive".to_string(),
            ));
        }
        let query = format!(
            r#"
            SELECT {}
            FROM event_outbox
            WHERE published_at IS NULL
              AND ($2 <= 0 OR attempt_count < $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
            OUTBOX_COLUMNS
        );
        let records: Vec<OutboxRecord> = sqlx::query_as(&query)
            .bind(i64::from(limit))
            .bind(max_attempts)
            .fetch_all(tx.conn()?)
            .await
            .map_err(outbox_db_error)?;

        Ok(records.into_iter().map(OutboxRow::from).collect())
    }

    async fn mark_published(&self, tx: &mut PgTx, id: Uuid) -> Result<(), OutboxError> {
        let query = sqlx::query(
            "UPDATE event_outbox SET published_at = COALESCE(published_at, NOW()) WHERE id = $1",
        )
        .bind(id);
        Self::update_one(tx, id, query).await
    }

    async fn mark_failed(&self, tx: &mut PgTx, id: Uuid, error: &str) -> Result<(), OutboxError> {
        let query = sqlx::query(
            r#"
            UPDATE event_outbox
            SET attempt_count = attempt_count + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(truncate_error(error));
        Self::update_one(tx, id, query).await
    }

    async fn mark_terminal(
        &self,
        tx: &mut PgTx,
        id: Uuid,
        error: &str,
        terminal: i32,
    ) -> Result<(), OutboxError> {
        let query = sqlx::query(
            r#"
            UPDATE event_outbox
            SET attempt_count = GREATEST(attempt_count, $3), last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(truncate_error(error))
        .bind(terminal);
        Self::update_one(tx, id, query).await
    }

    async fn exists(&self, tx: &mut PgTx, key: &EventKey) -> Result<bool, OutboxError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM event_outbox
                WHERE event_type = $1 AND aggregate_type = $2 AND aggregate_id = $3
            )
            "#,
        )
        .bind(key.event_type.as_str())
        .bind(key.aggregate_type.as_str())
        .bind(key.aggregate_id)
        .fetch_one(tx.conn()?)
        .await
        .map_err(outbox_db_error)
    }

    async fn delete_published_before(
        &self,
        cutoff: DateTime<Utc>,
        min_attempts: i32,
    ) -> Result<u64, OutboxError> {
        let result = sqlx::query(
            r#"
            DELETE FROM event_outbox
            WHERE published_at IS NOT NULL
              AND published_at < $1
              AND attempt_count >= $2
            "#,
        )
        .bind(cutoff)
        .bind(min_attempts)
        .execute(&self.pool)
        .await
        .map_err(outbox_db_error)?;

        Ok(result.rows_affected())
    }

    async fn stats(&self, terminal_attempts: i32) -> Result<OutboxStats, OutboxError> {
        let (pending, published, terminal): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE published_at IS NULL AND ($1 <= 0 OR attempt_count < $1)),
                COUNT(*) FILTER (WHERE published_at IS NOT NULL),
                COUNT(*) FILTER (WHERE published_at IS NULL AND $1 > 0 AND attempt_count >= $1)
            FROM event_outbox
            "#,
        )
        .bind(terminal_attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(outbox_db_error)?;

        Ok(OutboxStats {
            pending: pending.max(0) as u64,
            published: published.max(0) as u64,
            terminal: terminal.max(0) as u64,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxRow>, OutboxError> {
        let query = format!("SELECT {} FROM event_outbox WHERE id = $1", OUTBOX_COLUMNS);
        let record: Option<OutboxRecord> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(outbox_db_error)?;
        Ok(record.map(OutboxRow::from))
    }
}

#[derive(FromRow)]
struct DlqRecord {
    event_id: Uuid,
    event_type: String,
    aggregate_type: String,
    aggregate_id: Uuid,
    error_message: String,
    failed_at: DateTime<Utc>,
}

impl From<DlqRecord> for DlqEntry {
    fn from(record: DlqRecord) -> Self {
        Self {
            event_id: EventId::from_uuid(record.event_id),
            event_type: record.event_type,
            aggregate_type: record.aggregate_type,
            aggregate_id: record.aggregate_id,
            error_message: record.error_message,
            failed_at: record.failed_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresDlqStore {
    pool: PgPool,
}

impl PostgresDlqStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DlqStore for PostgresDlqStore {
    type Tx = PgTx;

    async fn insert(&self, tx: &mut PgTx, entry: DlqEntry) -> Result<(), DlqError> {
        sqlx::query(
            r#"
            INSERT INTO event_dlq
                (event_id, event_type, aggregate_type, aggregate_id, error_message, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(*entry.event_id.as_uuid())
        .bind(&entry.event_type)
        .bind(&entry.aggregate_type)
        .bind(entry.aggregate_id)
        .bind(truncate_error(&entry.error_message))
        .bind(entry.failed_at)
        .execute(tx.conn()?)
        .await
        .map_err(dlq_db_error)?;
        Ok(())
    }

    async fn find_by_event_id(&self, event_id: &EventId) -> Result<Option<DlqEntry>, DlqError> {
        let record: Option<DlqRecord> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, aggregate_type, aggregate_id, error_message, failed_at
            FROM event_dlq
            WHERE event_id = $1
            "#,
        )
        .bind(*event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(dlq_db_error)?;
        Ok(record.map(DlqEntry::from))
    }

    async fn list(&self, limit: u32) -> Result<Vec<DlqEntry>, DlqError> {
        let records: Vec<DlqRecord> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, aggregate_type, aggregate_id, error_message, failed_at
            FROM event_dlq
            ORDER BY failed_at DESC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(dlq_db_error)?;
        Ok(records.into_iter().map(DlqEntry::from).collect())
    }
}
