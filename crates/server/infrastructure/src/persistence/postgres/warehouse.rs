//! Analytics warehouse table, one row per event id.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::types::Json;

use marketplace_server_domain::sinks::{SinkError, WarehouseRow, WarehouseSink};

#[derive(Debug, Clone)]
pub struct PostgresWarehouseSink {
    pool: PgPool,
}

impl PostgresWarehouseSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WarehouseSink for PostgresWarehouseSink {
    async fn insert(&self, row: WarehouseRow) -> Result<bool, SinkError> {
        let result = sqlx::query(
            r#"
            INSERT INTO analytics_events
                (event_id, event_type, order_id, occurred_at,
                 actor_user_id, actor_store_id, actor_role, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(*row.event_id.as_uuid())
        .bind(&row.event_type)
        .bind(*row.order_id.as_uuid())
        .bind(row.occurred_at)
        .bind(row.actor_user_id.map(uuid::Uuid::from))
        .bind(row.actor_store_id.map(uuid::Uuid::from))
        .bind(row.actor_role.as_deref())
        .bind(Json(&row.data))
        .execute(&self.pool)
        .await
        .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}
