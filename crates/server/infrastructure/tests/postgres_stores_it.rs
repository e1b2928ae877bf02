//! PostgreSQL store tests.
//!
//! Run with `MARKETPLACE_TEST_DATABASE_URL=postgres://... cargo test -- --ignored`.
//! Each test works on fresh aggregate ids, so a shared database is fine.

use std::time::Duration;

use marketplace_server_domain::events::{AggregateType, EventType};
use marketplace_server_domain::idempotency::IdempotencyStore;
use marketplace_server_domain::outbox::{DlqEntry, DlqStore, EventKey, OutboxError, OutboxRow, OutboxStore};
use marketplace_server_domain::transaction::TransactionProvider;
use marketplace_server_domain::sinks::{WarehouseRow, WarehouseSink};
use marketplace_server_domain::{EventId, OrderId};
use marketplace_server_infrastructure::persistence::postgres::{
    run_migrations, DatabasePool, DatabasePoolConfig, MigrationOptions, PostgresDlqStore,
    PostgresIdempotencyStore, PostgresOutboxStore, PostgresTransactionProvider,
    PostgresWarehouseSink,
};
use sqlx::PgPool;
use uuid::Uuid;

async fn setup() -> PgPool {
    let url = std::env::var("MARKETPLACE_TEST_DATABASE_URL")
        .expect("MARKETPLACE_TEST_DATABASE_URL must be set for PostgreSQL tests");
    let pool = DatabasePool::new(&url, DatabasePoolConfig::new(5, 1, 10))
        .await
        .expect("Failed to connect to test database");
    run_migrations(pool.pool(), MigrationOptions::default())
        .await
        .expect("Failed to run migrations");
    pool.pg_pool()
}

fn row(event_type: EventType, aggregate_id: Uuid) -> OutboxRow {
    OutboxRow::pending(event_type, AggregateType::Order, aggregate_id, b"{}".to_vec())
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn test_insert_is_visible_only_after_commit() {
    let pool = setup().await;
    let provider = PostgresTransactionProvider::new(pool.clone());
    let outbox = PostgresOutboxStore::new(pool);

    let row = row(EventType::OrderCreated, Uuid::new_v4());
    let id = row.id;
    let mut tx = provider.begin().await.unwrap();
    outbox.insert(&mut tx, row).await.unwrap();
    assert!(outbox.find_by_id(id).await.unwrap().is_none());

    provider.commit(tx).await.unwrap();
    let stored = outbox.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 0);
    assert!(stored.published_at.is_none());
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn test_rollback_discards_insert() {
    let pool = setup().await;
    let provider = PostgresTransactionProvider::new(pool.clone());
    let outbox = PostgresOutboxStore::new(pool);

    let row = row(EventType::OrderCreated, Uuid::new_v4());
    let id = row.id;
    let mut tx = provider.begin().await.unwrap();
    outbox.insert(&mut tx, row).await.unwrap();
    provider.rollback(tx).await.unwrap();

    assert!(outbox.find_by_id(id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn test_concurrent_fetches_skip_locked_rows() {
    let pool = setup().await;
    let provider = PostgresTransactionProvider::new(pool.clone());
    let outbox = PostgresOutboxStore::new(pool);

    let mut tx = provider.begin().await.unwrap();
    for _ in 0..4 {
        outbox
            .insert(&mut tx, row(EventType::OrderCreated, Uuid::new_v4()))
            .await
            .unwrap();
    }
    provider.commit(tx).await.unwrap();

    let mut first = provider.begin().await.unwrap();
    let mut second = provider.begin().await.unwrap();
    let a = outbox.fetch_batch(&mut first, 1000, 0).await.unwrap();
    let b = outbox.fetch_batch(&mut second, 1000, 0).await.unwrap();

    assert!(!a.is_empty());
    assert!(a.iter().all(|row| b.iter().all(|other| other.id != row.id)));

    for leased in &a {
        outbox.mark_published(&mut first, leased.id).await.unwrap();
    }
    provider.commit(first).await.unwrap();
    provider.rollback(second).await.unwrap();
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn test_duplicate_event_key_keeps_transaction_usable() {
    let pool = setup().await;
    let provider = PostgresTransactionProvider::new(pool.clone());
    let outbox = PostgresOutboxStore::new(pool);
    let aggregate_id = Uuid::new_v4();

    let mut tx = provider.begin().await.unwrap();
    outbox
        .insert(&mut tx, row(EventType::OrderDecided, aggregate_id))
        .await
        .unwrap();
    let duplicate = outbox
        .insert(&mut tx, row(EventType::OrderDecided, aggregate_id))
        .await;
    assert!(matches!(duplicate, Err(OutboxError::DuplicateEventKey { .. })));

    let key = EventKey {
        event_type: EventType::OrderDecided,
        aggregate_type: AggregateType::Order,
        aggregate_id,
    };
    assert!(outbox.exists(&mut tx, &key).await.unwrap());
    provider.commit(tx).await.unwrap();
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn test_attempts_and_terminal_marking() {
    let pool = setup().await;
    let provider = PostgresTransactionProvider::new(pool.clone());
    let outbox = PostgresOutboxStore::new(pool.clone());
    let dlq = PostgresDlqStore::new(pool);

    let row = row(EventType::OrderPaid, Uuid::new_v4());
    let id = row.id;
    let mut tx = provider.begin().await.unwrap();
    outbox.insert(&mut tx, row.clone()).await.unwrap();
    outbox.mark_failed(&mut tx, id, &"x".repeat(5000)).await.unwrap();
    outbox.mark_terminal(&mut tx, id, "gave up", 5).await.unwrap();
    let event_id = EventId::new();
    dlq.insert(&mut tx, DlqEntry::from_outbox_row(&row, event_id, "gave up"))
        .await
        .unwrap();
    provider.commit(tx).await.unwrap();

    let stored = outbox.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(stored.attempt_count, 5);
    assert_eq!(stored.last_error.as_deref(), Some("gave up"));

    let entry = dlq.find_by_event_id(&event_id).await.unwrap().unwrap();
    assert_eq!(entry.aggregate_id, row.aggregate_id);
    assert!(!dlq.list(50).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn test_idempotency_marks() {
    let pool = setup().await;
    let store = PostgresIdempotencyStore::new(pool);
    let key = format!("pf:idempotency:evt:processed:it:{}", Uuid::new_v4());

    assert!(store.set_if_absent(&key, Duration::from_secs(60)).await.unwrap());
    assert!(!store.set_if_absent(&key, Duration::from_secs(60)).await.unwrap());
    store.delete(&key).await.unwrap();
    assert!(store.set_if_absent(&key, Duration::ZERO).await.unwrap());
    // an expired mark is taken over by the next caller
    assert!(store.set_if_absent(&key, Duration::from_secs(60)).await.unwrap());
    store.purge_expired().await.unwrap();
}

#[tokio::test]
#[ignore = "Requires PostgreSQL"]
async fn test_warehouse_insert_is_keyed_by_event_id() {
    let pool = setup().await;
    let sink = PostgresWarehouseSink::new(pool);
    let row = WarehouseRow {
        event_id: EventId::new(),
        event_type: "order.created".to_string(),
        order_id: OrderId::new(),
        occurred_at: chrono::Utc::now(),
        actor_user_id: None,
        actor_store_id: None,
        actor_role: Some("buyer".to_string()),
        data: serde_json::json!({ "total_cents": 1200 }),
    };

    assert!(sink.insert(row.clone()).await.unwrap());
    assert!(!sink.insert(row).await.unwrap());
}
