//! Version 1 payloads of every event type.
//!
//! Payloads are flat value types: they carry ids, never nested aggregates.
//! Consumers that need more context look it up by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EventType;
use marketplace_shared::{
    AssignmentId, CheckoutGroupId, FulfillmentStatus, LineItemId, OrderId, PaymentIntentId,
    PaymentMethod, StoreId, UserId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub checkout_group_id: CheckoutGroupId,
    pub store_id: StoreId,
    pub buyer_id: UserId,
    pub total_cents: i64,
    pub payment_method: PaymentMethod,
    pub line_item_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorDecision {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDecided {
    pub order_id: OrderId,
    pub store_id: StoreId,
    pub buyer_id: UserId,
    pub decision: VendorDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReadyForDispatch {
    pub order_id: OrderId,
    pub store_id: StoreId,
    pub buyer_id: UserId,
    /// The line item whose decision resolved the order
    pub line_item_id: LineItemId,
    pub rejected_count: u32,
    pub fulfillment_status: FulfillmentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCanceled {
    pub order_id: OrderId,
    pub store_id: StoreId,
    pub buyer_id: UserId,
    pub released_line_items: Vec<LineItemId>,
    pub canceled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequested {
    pub order_id: OrderId,
    pub store_id: StoreId,
    pub buyer_id: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRetried {
    pub original_order_id: OrderId,
    pub new_order_id: OrderId,
    pub checkout_group_id: CheckoutGroupId,
    pub buyer_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPickedUp {
    pub order_id: OrderId,
    pub assignment_id: AssignmentId,
    pub agent_id: UserId,
    pub picked_up_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDelivered {
    pub order_id: OrderId,
    pub assignment_id: AssignmentId,
    pub agent_id: UserId,
    pub buyer_id: UserId,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashCollected {
    pub order_id: OrderId,
    pub payment_intent_id: PaymentIntentId,
    pub agent_id: UserId,
    pub amount_cents: i64,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub order_id: OrderId,
    pub payment_intent_id: PaymentIntentId,
    pub store_id: StoreId,
    pub amount_cents: i64,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExpired {
    pub order_id: OrderId,
    pub store_id: StoreId,
    pub buyer_id: UserId,
    pub expired_at: DateTime<Utc>,
}

/// Typed data of any event. Serializes as the bare inner payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    OrderCreated(OrderCreated),
    OrderDecided(OrderDecided),
    OrderReadyForDispatch(OrderReadyForDispatch),
    OrderCanceled(OrderCanceled),
    NotificationRequested(NotificationRequested),
    OrderRetried(OrderRetried),
    OrderPickedUp(OrderPickedUp),
    OrderDelivered(OrderDelivered),
    CashCollected(CashCollected),
    OrderPaid(OrderPaid),
    OrderExpired(OrderExpired),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::OrderCreated(_) => EventType::OrderCreated,
            EventPayload::OrderDecided(_) => EventType::OrderDecided,
            EventPayload::OrderReadyForDispatch(_) => EventType::OrderReadyForDispatch,
            EventPayload::OrderCanceled(_) => EventType::OrderCanceled,
            EventPayload::NotificationRequested(_) => EventType::NotificationRequested,
            EventPayload::OrderRetried(_) => EventType::OrderRetried,
            EventPayload::OrderPickedUp(_) => EventType::OrderPickedUp,
            EventPayload::OrderDelivered(_) => EventType::OrderDelivered,
            EventPayload::CashCollected(_) => EventType::CashCollected,
            EventPayload::OrderPaid(_) => EventType::OrderPaid,
            EventPayload::OrderExpired(_) => EventType::OrderExpired,
        }
    }

    /// The order the event is about. Retries report the original order.
    pub fn order_id(&self) -> OrderId {
        match self {
            EventPayload::OrderCreated(p) => p.order_id,
            EventPayload::OrderDecided(p) => p.order_id,
            EventPayload::OrderReadyForDispatch(p) => p.order_id,
            EventPayload::OrderCanceled(p) => p.order_id,
            EventPayload::NotificationRequested(p) => p.order_id,
            EventPayload::OrderRetried(p) => p.original_order_id,
            EventPayload::OrderPickedUp(p) => p.order_id,
            EventPayload::OrderDelivered(p) => p.order_id,
            EventPayload::CashCollected(p) => p.order_id,
            EventPayload::OrderPaid(p) => p.order_id,
            EventPayload::OrderExpired(p) => p.order_id,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

macro_rules! payload_from {
    ($($variant:ident),+ $(,)?) => {
        $(
            impl From<$variant> for EventPayload {
                fn from(payload: $variant) -> Self {
                    EventPayload::$variant(payload)
                }
            }
        )+
    };
}

payload_from!(
    OrderCreated,
    OrderDecided,
    OrderReadyForDispatch,
    OrderCanceled,
    NotificationRequested,
    OrderRetried,
    OrderPickedUp,
    OrderDelivered,
    CashCollected,
    OrderPaid,
    OrderExpired,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serializes_without_variant_tag() {
        let order_id = OrderId::new();
        let payload = EventPayload::from(OrderExpired {
            order_id,
            store_id: StoreId::new(),
            buyer_id: UserId::new(),
            expired_at: Utc::now(),
        });
        let value = payload.to_json().unwrap();

        assert_eq!(value["order_id"], order_id.to_string());
        assert!(value.get("OrderExpired").is_none());
        assert_eq!(payload.event_type(), EventType::OrderExpired);
        assert_eq!(payload.order_id(), order_id);
    }

    #[test]
    fn test_retry_reports_original_order() {
        let original = OrderId::new();
        let payload = EventPayload::from(OrderRetried {
            original_order_id: original,
            new_order_id: OrderId::new(),
            checkout_group_id: CheckoutGroupId::new(),
            buyer_id: UserId::new(),
        });
        assert_eq!(payload.order_id(), original);
    }
}
