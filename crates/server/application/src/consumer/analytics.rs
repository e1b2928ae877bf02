//! Analytics projection: one warehouse row per event.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use marketplace_server_domain::events::EventType;
use marketplace_server_domain::sinks::{WarehouseRow, WarehouseSink};
use marketplace_server_domain::DomainError;

use super::{ConsumedEvent, EventHandler};

pub const ANALYTICS_CONSUMER: &str = "analytics";

pub struct AnalyticsProjection {
    sink: Arc<dyn WarehouseSink>,
}

impl AnalyticsProjection {
    pub fn new(sink: Arc<dyn WarehouseSink>) -> Self {
        Self { sink }
    }

    fn row(event: &ConsumedEvent) -> WarehouseRow {
        let actor = event.envelope.actor.as_ref();
        WarehouseRow {
            event_id: event.envelope.event_id,
            event_type: event.event_type.as_str().to_string(),
            order_id: event.payload.order_id(),
            occurred_at: event.envelope.occurred_at,
            actor_user_id: actor.map(|a| a.user_id),
            actor_store_id: actor.and_then(|a| a.store_id),
            actor_role: actor.map(|a| a.role.clone()),
            data: event.envelope.data.clone(),
        }
    }
}

#[async_trait]
impl EventHandler for AnalyticsProjection {
    fn handles(&self, _event_type: EventType) -> bool {
        true
    }

    async fn handle(&self, event: &ConsumedEvent) -> Result<(), DomainError> {
        let inserted = self.sink.insert(Self::row(event)).await?;
        if !inserted {
            // Keyed by event id, so a replay after a released mark is harmless.
            debug!(event_id = %event.envelope.event_id, "Warehouse row already present");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketplace_server_domain::events::{Actor, OrderPaid, PayloadEnvelope};
    use marketplace_server_domain::sinks::SinkError;
    use marketplace_server_domain::{EventId, OrderId, PaymentIntentId, StoreId, UserId};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RowSink {
        rows: Mutex<Vec<WarehouseRow>>,
    }

    #[async_trait]
    impl WarehouseSink for RowSink {
        async fn insert(&self, row: WarehouseRow) -> Result<bool, SinkError> {
            let mut rows = self.rows.lock();
            if rows.iter().any(|r| r.event_id == row.event_id) {
                return Ok(false);
            }
            rows.push(row);
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_projects_envelope_into_row() {
        let sink = Arc::new(RowSink::default());
        let projection = AnalyticsProjection::new(sink.clone());
        let order_id = OrderId::new();
        let store_id = StoreId::new();
        let payload = OrderPaid {
            order_id,
            payment_intent_id: PaymentIntentId::new(),
            store_id,
            amount_cents: 2500,
            paid_at: Utc::now(),
        };
        let actor = Actor::admin(UserId::new());
        let event = ConsumedEvent {
            event_type: EventType::OrderPaid,
            envelope: PayloadEnvelope {
                version: 1,
                event_id: EventId::new(),
                occurred_at: Utc::now(),
                actor: Some(actor.clone()),
                data: serde_json::to_value(&payload).unwrap(),
            },
            payload: payload.into(),
        };

        projection.handle(&event).await.unwrap();
        projection.handle(&event).await.unwrap();

        let rows = sink.rows.lock();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].event_id, event.envelope.event_id);
        assert_eq!(rows[0].event_type, "order.paid");
        assert_eq!(rows[0].order_id, order_id);
        assert_eq!(rows[0].actor_user_id, Some(actor.user_id));
        assert_eq!(rows[0].actor_store_id, None);
        assert_eq!(rows[0].actor_role.as_deref(), Some("admin"));
        assert_eq!(rows[0].data["amount_cents"], 2500);
    }
}
