//! Event emitter
//!
//! Turns a [`DomainEvent`] into an enveloped outbox row and appends it
//! through the caller's transaction. Nothing reaches the broker until that
//! transaction commits and the publisher picks the row up.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use marketplace_server_domain::events::{DomainEvent, PayloadEnvelope};
use marketplace_server_domain::outbox::{EventKey, OutboxError, OutboxRow, OutboxStore};
use marketplace_server_domain::transaction::TxHandle;
use marketplace_server_domain::{DomainError, EventId};

pub struct EventEmitter<Tx: TxHandle> {
    outbox: Arc<dyn OutboxStore<Tx = Tx>>,
}

impl<Tx: TxHandle> Clone for EventEmitter<Tx> {
    fn clone(&self) -> Self {
        Self {
            outbox: self.outbox.clone(),
        }
    }
}

impl<Tx: TxHandle> EventEmitter<Tx> {
    pub fn new(outbox: Arc<dyn OutboxStore<Tx = Tx>>) -> Self {
        Self { outbox }
    }

    /// Append the event. Returns the fresh event id carried by the envelope.
    pub async fn emit(&self, tx: &mut Tx, event: DomainEvent) -> Result<EventId, DomainError> {
        ensure_tx(tx)?;
        let (row, event_id) = Self::build_row(event)?;
        self.outbox.insert(tx, row).await?;
        Ok(event_id)
    }

    /// Append the event unless one with the same `(type, aggregate)` key is
    /// already in the outbox. Returns `None` when the event was skipped.
    ///
    /// A rejection from the store's unique event-key index counts as "already
    /// present", so concurrent emitters converge on a single row.
    pub async fn emit_if_absent(
        &self,
        tx: &mut Tx,
        event: DomainEvent,
    ) -> Result<Option<EventId>, DomainError> {
        ensure_tx(tx)?;
        let key = EventKey {
            event_type: event.event_type,
            aggregate_type: event.aggregate_type,
            aggregate_id: event.aggregate_id,
        };

        if self.outbox.exists(tx, &key).await? {
            debug!(
                event_type = %key.event_type,
                aggregate_id = %key.aggregate_id,
                "Event already in outbox, skipping emission"
            );
            return Ok(None);
        }

        let (row, event_id) = Self::build_row(event)?;
        match self.outbox.insert(tx, row).await {
            Ok(()) => Ok(Some(event_id)),
            Err(OutboxError::DuplicateEventKey { .. }) => {
                debug!(
                    event_type = %key.event_type,
                    aggregate_id = %key.aggregate_id,
                    "Concurrent emission won the event key"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn build_row(event: DomainEvent) -> Result<(OutboxRow, EventId), DomainError> {
        let data = event
            .data
            .to_json()
            .map_err(|e| DomainError::Internal(format!("event data serialization: {}", e)))?;

        let envelope = PayloadEnvelope {
            version: event.version,
            event_id: EventId::new(),
            occurred_at: event.occurred_at.unwrap_or_else(Utc::now),
            actor: event.actor,
            data,
        };
        let payload = envelope
            .to_bytes()
            .map_err(|e| DomainError::Internal(format!("envelope serialization: {}", e)))?;

        let row = OutboxRow::pending(
            event.event_type,
            event.aggregate_type,
            event.aggregate_id,
            payload,
        );
        Ok((row, envelope.event_id))
    }
}

fn ensure_tx<Tx: TxHandle>(tx: &Tx) -> Result<(), DomainError> {
    if tx.is_active() {
        Ok(())
    } else {
        Err(DomainError::InvalidArg(
            "event emission requires an active transaction".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use marketplace_server_domain::events::{Actor, NotificationRequested, OrderExpired};
    use marketplace_server_domain::outbox::OutboxStats;
    use marketplace_server_domain::{ErrorKind, OrderId, StoreId, UserId};
    use parking_lot::Mutex;
    use uuid::Uuid;

    struct TestTx {
        active: bool,
    }

    impl TxHandle for TestTx {
        fn is_active(&self) -> bool {
            self.active
        }
    }

    /// Outbox that only supports insert and exists, optionally simulating
    /// a unique event-key index that the `exists` check cannot see yet.
    #[derive(Default)]
    struct RecordingOutbox {
        rows: Mutex<Vec<OutboxRow>>,
        hide_from_exists: bool,
    }

    #[async_trait]
    impl OutboxStore for RecordingOutbox {
        type Tx = TestTx;

        async fn insert(&self, _tx: &mut TestTx, row: OutboxRow) -> Result<(), OutboxError> {
            let mut rows = self.rows.lock();
            if rows.iter().any(|r| {
                r.event_type == row.event_type
                    && r.aggregate_id == row.aggregate_id
                    && row.event_type == "order.expired"
            }) {
                return Err(OutboxError::DuplicateEventKey {
                    event_type: row.event_type,
                    aggregate_type: row.aggregate_type,
                    aggregate_id: row.aggregate_id,
                });
            }
            rows.push(row);
            Ok(())
        }

        async fn fetch_batch(
            &self,
            _tx: &mut TestTx,
            _limit: u32,
            _max_attempts: i32,
        ) -> Result<Vec<OutboxRow>, OutboxError> {
            Ok(Vec::new())
        }

        async fn mark_published(&self, _tx: &mut TestTx, _id: Uuid) -> Result<(), OutboxError> {
            Ok(())
        }

        async fn mark_failed(
            &self,
            _tx: &mut TestTx,
            _id: Uuid,
            _error: &str,
        ) -> Result<(), OutboxError> {
            Ok(())
        }

        async fn mark_terminal(
            &self,
            _tx: &mut TestTx,
            _id: Uuid,
            _error: &str,
            _terminal: i32,
        ) -> Result<(), OutboxError> {
            Ok(())
        }

        async fn exists(&self, _tx: &mut TestTx, key: &EventKey) -> Result<bool, OutboxError> {
            if self.hide_from_exists {
                return Ok(false);
            }
            Ok(self.rows.lock().iter().any(|row| key.matches(row)))
        }

        async fn delete_published_before(
            &self,
            _cutoff: DateTime<Utc>,
            _min_attempts: i32,
        ) -> Result<u64, OutboxError> {
            Ok(0)
        }

        async fn stats(&self, _terminal_attempts: i32) -> Result<OutboxStats, OutboxError> {
            Ok(OutboxStats::default())
        }

        async fn find_by_id(&self, _id: Uuid) -> Result<Option<OutboxRow>, OutboxError> {
            Ok(None)
        }
    }

    fn expired_event(order_id: OrderId) -> DomainEvent {
        DomainEvent::for_order(
            order_id,
            OrderExpired {
                order_id,
                store_id: StoreId::new(),
                buyer_id: UserId::new(),
                expired_at: Utc::now(),
            }
            .into(),
        )
    }

    fn nudge_event(order_id: OrderId) -> DomainEvent {
        DomainEvent::for_order(
            order_id,
            NotificationRequested {
                order_id,
                store_id: StoreId::new(),
                buyer_id: UserId::new(),
                reason: "buyer_nudge".to_string(),
            }
            .into(),
        )
    }

    #[tokio::test]
    async fn test_emit_writes_envelope() {
        let outbox = Arc::new(RecordingOutbox::default());
        let emitter = EventEmitter::new(outbox.clone());
        let mut tx = TestTx { active: true };
        let order_id = OrderId::new();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let actor = Actor::buyer(UserId::new());

        let event_id = emitter
            .emit(
                &mut tx,
                nudge_event(order_id).with_actor(&actor).occurred_at(at),
            )
            .await
            .unwrap();

        let rows = outbox.rows.lock();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_type, "notification.requested");
        assert_eq!(rows[0].aggregate_type, "order");
        assert_eq!(rows[0].aggregate_id, *order_id.as_uuid());

        let envelope = PayloadEnvelope::from_bytes(&rows[0].payload).unwrap();
        assert_eq!(envelope.event_id, event_id);
        assert_eq!(envelope.version, 1);
        assert_eq!(envelope.occurred_at, at);
        assert_eq!(envelope.actor, Some(actor));
        assert_eq!(envelope.data["reason"], "buyer_nudge");
    }

    #[tokio::test]
    async fn test_emit_fills_missing_timestamp() {
        let outbox = Arc::new(RecordingOutbox::default());
        let emitter = EventEmitter::new(outbox.clone());
        let before = Utc::now();

        emitter
            .emit(&mut TestTx { active: true }, nudge_event(OrderId::new()))
            .await
            .unwrap();

        let envelope = PayloadEnvelope::from_bytes(&outbox.rows.lock()[0].payload).unwrap();
        assert!(envelope.occurred_at >= before);
        assert!(envelope.actor.is_none());
    }

    #[tokio::test]
    async fn test_emit_requires_active_transaction() {
        let emitter = EventEmitter::new(Arc::new(RecordingOutbox::default()));
        let err = emitter
            .emit(&mut TestTx { active: false }, nudge_event(OrderId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);

        let err = emitter
            .emit_if_absent(&mut TestTx { active: false }, expired_event(OrderId::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
    }

    #[tokio::test]
    async fn test_emit_if_absent_skips_existing_key() {
        let outbox = Arc::new(RecordingOutbox::default());
        let emitter = EventEmitter::new(outbox.clone());
        let mut tx = TestTx { active: true };
        let order_id = OrderId::new();

        let first = emitter
            .emit_if_absent(&mut tx, expired_event(order_id))
            .await
            .unwrap();
        let second = emitter
            .emit_if_absent(&mut tx, expired_event(order_id))
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(outbox.rows.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_emit_if_absent_treats_index_conflict_as_present() {
        let outbox = Arc::new(RecordingOutbox {
            hide_from_exists: true,
            ..Default::default()
        });
        let emitter = EventEmitter::new(outbox.clone());
        let mut tx = TestTx { active: true };
        let order_id = OrderId::new();

        emitter
            .emit_if_absent(&mut tx, expired_event(order_id))
            .await
            .unwrap();
        let skipped = emitter
            .emit_if_absent(&mut tx, expired_event(order_id))
            .await
            .unwrap();

        assert!(skipped.is_none());
        assert_eq!(outbox.rows.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_repeatable_events_emit_every_time() {
        let outbox = Arc::new(RecordingOutbox::default());
        let emitter = EventEmitter::new(outbox.clone());
        let mut tx = TestTx { active: true };
        let order_id = OrderId::new();

        let a = emitter.emit(&mut tx, nudge_event(order_id)).await.unwrap();
        let b = emitter.emit(&mut tx, nudge_event(order_id)).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(outbox.rows.lock().len(), 2);
    }
}
