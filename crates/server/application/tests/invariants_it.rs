//! Properties every deployment of the bus relies on.

mod common;

use chrono::Utc;
use rstest::rstest;
use std::collections::HashSet;
use std::time::Duration;

use marketplace_server_application::outbox::{OutboxRetentionWorker, RetentionSettings};
use marketplace_server_application::EventEmitter;
use marketplace_server_domain::events::EventType;
use marketplace_server_domain::outbox::{OutboxRow, OutboxStore};
use marketplace_server_domain::transaction::TransactionProvider;
use marketplace_server_domain::{DomainError, ErrorKind, OrderId};
use marketplace_server_infrastructure::{InMemoryDatabase, MemoryTx};
use std::sync::Arc;
use uuid::Uuid;

use common::{order_created, test_settings, Harness};

async fn emit_then_fail(emitter: EventEmitter<MemoryTx>, tx: &mut MemoryTx) -> Result<(), DomainError> {
    emitter.emit(tx, order_created(OrderId::new())).await?;
    Err(DomainError::Conflict("business rule violated".to_string()))
}

async fn emit_then_panic(emitter: EventEmitter<MemoryTx>, tx: &mut MemoryTx) -> Result<(), DomainError> {
    emitter.emit(tx, order_created(OrderId::new())).await?;
    panic!("handler bug");
}

#[tokio::test]
async fn test_emission_commits_or_rolls_back_with_the_transaction() {
    let h = Harness::new();

    h.emit(order_created(OrderId::new())).await.unwrap();
    assert_eq!(h.db.outbox_rows().len(), 1);

    let emitter = h.emitter.clone();
    let failed = h
        .runner
        .with_tx(move |tx| Box::pin(emit_then_fail(emitter, tx)))
        .await;
    assert_eq!(failed.unwrap_err().kind(), ErrorKind::Conflict);

    let emitter = h.emitter.clone();
    let panicked = h
        .runner
        .with_tx(move |tx| Box::pin(emit_then_panic(emitter, tx)))
        .await;
    assert_eq!(panicked.unwrap_err().kind(), ErrorKind::Internal);

    h.db.fail_next_commit();
    assert!(h.emit(order_created(OrderId::new())).await.is_err());

    assert_eq!(h.db.outbox_rows().len(), 1);
}

#[tokio::test]
async fn test_emit_if_absent_with_and_without_index() {
    for db in [
        InMemoryDatabase::with_event_key_index(true),
        InMemoryDatabase::with_event_key_index(false),
    ] {
        let h = Harness::with_database(db);
        let order_id = OrderId::new();

        for _ in 0..3 {
            let emitter = h.emitter.clone();
            h.runner
                .with_tx(move |tx| Box::pin(async move {
                    emitter.emit_if_absent(tx, order_created(order_id)).await
                }))
                .await
                .unwrap();
        }
        assert_eq!(h.rows_of_type("order.created").len(), 1);
    }
}

#[tokio::test]
async fn test_concurrent_leases_are_disjoint() {
    let db = InMemoryDatabase::new();
    let h = Harness::with_database(db.clone());
    for _ in 0..10 {
        h.emit(order_created(OrderId::new())).await.unwrap();
    }

    let mut first = db.begin().await.unwrap();
    let mut second = db.begin().await.unwrap();
    let a = db.fetch_batch(&mut first, 6, 3).await.unwrap();
    let b = db.fetch_batch(&mut second, 6, 3).await.unwrap();

    let a_ids: HashSet<Uuid> = a.iter().map(|row| row.id).collect();
    let b_ids: HashSet<Uuid> = b.iter().map(|row| row.id).collect();
    assert_eq!(a_ids.len(), 6);
    assert_eq!(b_ids.len(), 4);
    assert!(a_ids.is_disjoint(&b_ids));

    db.rollback(first).await.unwrap();
    let mut third = db.begin().await.unwrap();
    let c = db.fetch_batch(&mut third, 10, 3).await.unwrap();
    assert_eq!(c.len(), 6);
    assert!(c.iter().all(|row| a_ids.contains(&row.id)));
}

#[tokio::test]
async fn test_attempt_count_never_decreases() {
    let h = Harness::new();
    h.emit(order_created(OrderId::new())).await.unwrap();
    let id = h.db.outbox_rows()[0].id;
    let publisher = h.publisher(test_settings().with_terminal_attempts(4));

    h.broker.set_unavailable(true);
    let mut seen = Vec::new();
    for _ in 0..4 {
        publisher.run_cycle().await.unwrap();
        seen.push(h.db.find_by_id(id).await.unwrap().unwrap().attempt_count);
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);

    // A lower terminal threshold leaves the count alone
    let mut tx = h.db.begin().await.unwrap();
    h.db.mark_terminal(&mut tx, id, "late", 2).await.unwrap();
    h.db.commit(tx).await.unwrap();
    assert_eq!(h.db.find_by_id(id).await.unwrap().unwrap().attempt_count, 4);
}

#[rstest]
#[case::unpublished(None, 5, false)]
#[case::published_recently(Some(1), 5, false)]
#[case::below_min_attempts(Some(30), 0, false)]
#[case::old_enough(Some(30), 5, true)]
#[tokio::test]
async fn test_retention_respects_cutoff_and_attempts(
    #[case] published_days_ago: Option<i64>,
    #[case] attempts: i32,
    #[case] deleted: bool,
) {
    let h = Harness::new();
    h.emit(order_created(OrderId::new())).await.unwrap();
    let id = h.db.outbox_rows()[0].id;
    h.db.update_outbox_row(id, |row: &mut OutboxRow| {
        row.published_at = published_days_ago.map(|days| Utc::now() - chrono::Duration::days(days));
        row.attempt_count = attempts;
    });

    let worker = OutboxRetentionWorker::new(
        Arc::new(h.db.clone()),
        RetentionSettings::default()
            .with_retention(Duration::from_secs(7 * 24 * 60 * 60))
            .with_min_attempts(1),
    );
    let removed = worker.sweep().await.unwrap();

    assert_eq!(removed, u64::from(deleted));
    assert_eq!(h.db.find_by_id(id).await.unwrap().is_none(), deleted);
}

#[tokio::test]
async fn test_stats_track_pending_published_and_terminal() {
    let h = Harness::new();
    for _ in 0..3 {
        h.emit(order_created(OrderId::new())).await.unwrap();
    }
    let rows = h.db.outbox_rows();
    h.db.update_outbox_row(rows[0].id, |row| row.published_at = Some(Utc::now()));
    h.db.update_outbox_row(rows[1].id, |row| row.attempt_count = 3);

    let stats = h.db.stats(3).await.unwrap();
    assert_eq!((stats.pending, stats.published, stats.terminal), (1, 1, 1));
    assert_eq!(h.rows_of_type(EventType::OrderCreated.as_str()).len(), 3);
}
