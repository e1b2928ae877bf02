//! Notification dispatcher
//!
//! Maps order events to the person who should hear about them and forwards
//! a templated request to the notification sink.

use async_trait::async_trait;
use std::sync::Arc;

use marketplace_server_domain::events::{EventPayload, EventType, OrderDecided, VendorDecision};
use marketplace_server_domain::sinks::{NotificationRequest, NotificationSink, Recipient};
use marketplace_server_domain::DomainError;

use super::{ConsumedEvent, EventHandler};

pub const NOTIFICATIONS_CONSUMER: &str = "notifications";

pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    fn request(event: &ConsumedEvent) -> Result<NotificationRequest, DomainError> {
        let (recipient, template) = match &event.payload {
            EventPayload::NotificationRequested(p) => {
                (Recipient::Store(p.store_id), format!("nudge.{}", p.reason))
            }
            EventPayload::OrderDecided(p) => (
                Recipient::Buyer(p.buyer_id),
                format!("order.decided.{}", decision_name(p)),
            ),
            EventPayload::OrderReadyForDispatch(p) => (
                Recipient::Buyer(p.buyer_id),
                format!("order.ready_for_dispatch.{}", p.fulfillment_status),
            ),
            EventPayload::OrderCanceled(p) => {
                (Recipient::Store(p.store_id), "order.canceled".to_string())
            }
            EventPayload::OrderDelivered(p) => {
                (Recipient::Buyer(p.buyer_id), "order.delivered".to_string())
            }
            other => {
                return Err(DomainError::InvalidArg(format!(
                    "no notification for {}",
                    other.event_type()
                )))
            }
        };

        Ok(NotificationRequest {
            event_id: event.envelope.event_id,
            order_id: event.payload.order_id(),
            recipient,
            template,
        })
    }
}

fn decision_name(payload: &OrderDecided) -> &'static str {
    match payload.decision {
        VendorDecision::Accept => "accepted",
        VendorDecision::Reject => "rejected",
    }
}

#[async_trait]
impl EventHandler for NotificationDispatcher {
    fn handles(&self, event_type: EventType) -> bool {
        matches!(
            event_type,
            EventType::NotificationRequested
                | EventType::OrderDecided
                | EventType::OrderReadyForDispatch
                | EventType::OrderCanceled
                | EventType::OrderDelivered
        )
    }

    async fn handle(&self, event: &ConsumedEvent) -> Result<(), DomainError> {
        let request = Self::request(event)?;
        self.sink.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use marketplace_server_domain::events::{NotificationRequested, OrderCanceled, PayloadEnvelope};
    use marketplace_server_domain::sinks::SinkError;
    use marketplace_server_domain::{EventId, OrderId, StoreId, UserId};
    use parking_lot::Mutex;
    use rstest::rstest;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<NotificationRequest>>,
    }

    #[async_trait]
    impl NotificationSink for Outbox {
        async fn send(&self, request: NotificationRequest) -> Result<(), SinkError> {
            self.sent.lock().push(request);
            Ok(())
        }
    }

    fn consumed(payload: EventPayload) -> ConsumedEvent {
        ConsumedEvent {
            event_type: payload.event_type(),
            envelope: PayloadEnvelope {
                version: 1,
                event_id: EventId::new(),
                occurred_at: Utc::now(),
                actor: None,
                data: payload.to_json().unwrap(),
            },
            payload,
        }
    }

    #[rstest]
    #[case(EventType::NotificationRequested, true)]
    #[case(EventType::OrderDecided, true)]
    #[case(EventType::OrderReadyForDispatch, true)]
    #[case(EventType::OrderCanceled, true)]
    #[case(EventType::OrderDelivered, true)]
    #[case(EventType::OrderCreated, false)]
    #[case(EventType::CashCollected, false)]
    #[case(EventType::OrderPaid, false)]
    fn test_handled_types(#[case] event_type: EventType, #[case] handled: bool) {
        let dispatcher = NotificationDispatcher::new(Arc::new(Outbox::default()));
        assert_eq!(dispatcher.handles(event_type), handled);
    }

    #[tokio::test]
    async fn test_decision_notifies_buyer() {
        let sink = Arc::new(Outbox::default());
        let dispatcher = NotificationDispatcher::new(sink.clone());
        let buyer_id = UserId::new();
        let order_id = OrderId::new();
        let event = consumed(
            OrderDecided {
                order_id,
                store_id: StoreId::new(),
                buyer_id,
                decision: VendorDecision::Reject,
            }
            .into(),
        );

        dispatcher.handle(&event).await.unwrap();

        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, Recipient::Buyer(buyer_id));
        assert_eq!(sent[0].template, "order.decided.rejected");
        assert_eq!(sent[0].order_id, order_id);
        assert_eq!(sent[0].event_id, event.envelope.event_id);
    }

    #[tokio::test]
    async fn test_store_facing_events() {
        let sink = Arc::new(Outbox::default());
        let dispatcher = NotificationDispatcher::new(sink.clone());
        let store_id = StoreId::new();

        dispatcher
            .handle(&consumed(
                NotificationRequested {
                    order_id: OrderId::new(),
                    store_id,
                    buyer_id: UserId::new(),
                    reason: "buyer_nudge".into(),
                }
                .into(),
            ))
            .await
            .unwrap();
        dispatcher
            .handle(&consumed(
                OrderCanceled {
                    order_id: OrderId::new(),
                    store_id,
                    buyer_id: UserId::new(),
                    released_line_items: Vec::new(),
                    canceled_at: Utc::now(),
                }
                .into(),
            ))
            .await
            .unwrap();

        let sent = sink.sent.lock();
        assert_eq!(sent[0].template, "nudge.buyer_nudge");
        assert_eq!(sent[1].template, "order.canceled");
        assert!(sent
            .iter()
            .all(|request| request.recipient == Recipient::Store(store_id)));
    }
}
