//! PostgreSQL-backed processed marks
//!
//! `set_if_absent` is a single upsert: it inserts the key, or takes over an
//! expired mark, and reports whether this call owns it.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::time::Duration;
use tracing::debug;

use marketplace_server_domain::idempotency::{IdempotencyError, IdempotencyStore};

#[derive(Debug, Clone)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Drop expired marks; returns how many were removed.
    pub async fn purge_expired(&self) -> Result<u64, IdempotencyError> {
        let result = sqlx::query("DELETE FROM idempotency_marks WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| IdempotencyError::Store(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, IdempotencyError> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_marks (key, expires_at)
            VALUES ($1, NOW() + make_interval(secs => $2))
            ON CONFLICT (key) DO UPDATE
            SET expires_at = EXCLUDED.expires_at
            WHERE idempotency_marks.expires_at <= NOW()
            "#,
        )
        .bind(key)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(|e| IdempotencyError::Store(e.to_string()))?;

        let created = result.rows_affected() == 1;
        debug!(key = %key, created, "Idempotency mark checked");
        Ok(created)
    }

    async fn delete(&self, key: &str) -> Result<(), IdempotencyError> {
        sqlx::query("DELETE FROM idempotency_marks WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| IdempotencyError::Store(e.to_string()))?;
        Ok(())
    }
}
