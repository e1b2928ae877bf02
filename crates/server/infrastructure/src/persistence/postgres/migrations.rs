//! Schema bootstrap
//!
//! Every statement is idempotent (`IF NOT EXISTS`), so the binary runs the
//! whole list on each start.

use sqlx::postgres::PgPool;
use tracing::{debug, info};

use marketplace_server_domain::events::EventType;

/// Name of the optional unique index over the outbox event key
pub const EVENT_KEY_INDEX: &str = "uq_event_outbox_event_key";

const SCHEMA: &[(&str, &str)] = &[
    (
        "event_outbox",
        r#"
        CREATE TABLE IF NOT EXISTS event_outbox (
            id UUID PRIMARY KEY,
            event_type TEXT NOT NULL,
            aggregate_type TEXT NOT NULL,
            aggregate_id UUID NOT NULL,
            payload BYTEA NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            published_at TIMESTAMPTZ,
            attempt_count INTEGER NOT NULL DEFAULT 0 CHECK (attempt_count >= 0),
            last_error TEXT
        )
        "#,
    ),
    (
        "idx_event_outbox_unpublished",
        r#"
        CREATE INDEX IF NOT EXISTS idx_event_outbox_unpublished
            ON event_outbox (created_at, id)
            WHERE published_at IS NULL
        "#,
    ),
    (
        "idx_event_outbox_published_at",
        r#"
        CREATE INDEX IF NOT EXISTS idx_event_outbox_published_at
            ON event_outbox (published_at)
            WHERE published_at IS NOT NULL
        "#,
    ),
    (
        "event_dlq",
        r#"
        CREATE TABLE IF NOT EXISTS event_dlq (
            event_id UUID PRIMARY KEY,
            event_type TEXT NOT NULL,
            aggregate_type TEXT NOT NULL,
            aggregate_id UUID NOT NULL,
            error_message TEXT NOT NULL,
            failed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "idx_event_dlq_failed_at",
        "CREATE INDEX IF NOT EXISTS idx_event_dlq_failed_at ON event_dlq (failed_at DESC)",
    ),
    (
        "idempotency_marks",
        r#"
        CREATE TABLE IF NOT EXISTS idempotency_marks (
            key TEXT PRIMARY KEY,
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "orders",
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id UUID PRIMARY KEY,
            checkout_group_id UUID NOT NULL,
            store_id UUID NOT NULL,
            buyer_id UUID NOT NULL,
            status TEXT NOT NULL,
            payment_status TEXT NOT NULL,
            aggregate JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "idx_orders_store_status",
        "CREATE INDEX IF NOT EXISTS idx_orders_store_status ON orders (store_id, status)",
    ),
    (
        "inventory",
        r#"
        CREATE TABLE IF NOT EXISTS inventory (
            product_id UUID PRIMARY KEY,
            available BIGINT NOT NULL CHECK (available >= 0)
        )
        "#,
    ),
    (
        "ledger_events",
        r#"
        CREATE TABLE IF NOT EXISTS ledger_events (
            id UUID PRIMARY KEY,
            order_id UUID NOT NULL,
            entry_type TEXT NOT NULL,
            amount_cents BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (order_id, entry_type)
        )
        "#,
    ),
    (
        "analytics_events",
        r#"
        CREATE TABLE IF NOT EXISTS analytics_events (
            event_id UUID PRIMARY KEY,
            event_type TEXT NOT NULL,
            order_id UUID NOT NULL,
            occurred_at TIMESTAMPTZ NOT NULL,
            actor_user_id UUID,
            actor_store_id UUID,
            actor_role TEXT,
            data JSONB NOT NULL,
            ingested_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
];

#[derive(Debug, Clone, Copy)]
pub struct MigrationOptions {
    /// Create the unique `(event_type, aggregate_type, aggregate_id)` index
    /// on the outbox; dropped when disabled.
    pub event_key_index: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            event_key_index: true,
        }
    }
}

/// Unique index over `(event_type, aggregate_type, aggregate_id)`, partial
/// so that repeatable event types stay out of it.
fn event_key_index_statement() -> String {
    let repeatable: Vec<String> = EventType::ALL
        .iter()
        .filter(|event_type| !event_type.is_idempotent_by_key())
        .map(|event_type| format!("'{}'", event_type.as_str()))
        .collect();
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON event_outbox (event_type, aggregate_type, aggregate_id) \
         WHERE event_type NOT IN ({})",
        EVENT_KEY_INDEX,
        repeatable.join(", ")
    )
}

pub async fn run_migrations(pool: &PgPool, options: MigrationOptions) -> Result<(), sqlx::Error> {
    info!(steps = SCHEMA.len(), "Running schema migrations");

    for (name, statement) in SCHEMA {
        debug!(step = name, "Applying schema step");
        sqlx::query(statement).execute(pool).await?;
    }

    let index_statement = if options.event_key_index {
        event_key_index_statement()
    } else {
        format!("DROP INDEX IF EXISTS {}", EVENT_KEY_INDEX)
    };
    sqlx::query(&index_statement).execute(pool).await?;

    info!(event_key_index = options.event_key_index, "Schema migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_steps_are_idempotent() {
        for (name, statement) in SCHEMA {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "step {} is not idempotent",
                name
            );
        }
    }

    #[test]
    fn test_event_key_index_leaves_out_repeatable_events() {
        let statement = event_key_index_statement();
        assert!(statement.contains(EVENT_KEY_INDEX));
        assert!(statement.contains("'notification.requested'"));
        assert!(statement.contains("'order.retried'"));
        assert!(!statement.contains("'order.created'"));
    }

    #[test]
    fn test_step_names_are_unique() {
        let mut names: Vec<&str> = SCHEMA.iter().map(|(name, _)| *name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), SCHEMA.len());
    }
}
