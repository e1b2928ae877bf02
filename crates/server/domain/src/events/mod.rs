//! Domain events and their wire envelope.
//!
//! A [`DomainEvent`] is what business code emits; the emitter turns it into a
//! [`PayloadEnvelope`] (fresh event id, timestamp, actor, JSON data) which is
//! what the outbox stores and the broker carries.

pub mod payloads;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared_kernel::DomainError;
use marketplace_shared::{EventId, StoreId, UserId};

pub use payloads::*;
pub use registry::EventRegistry;

/// Closed set of event types carried by the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.decided")]
    OrderDecided,
    #[serde(rename = "order.ready_for_dispatch")]
    OrderReadyForDispatch,
    #[serde(rename = "order.canceled")]
    OrderCanceled,
    #[serde(rename = "notification.requested")]
    NotificationRequested,
    #[serde(rename = "order.retried")]
    OrderRetried,
    #[serde(rename = "order.picked_up")]
    OrderPickedUp,
    #[serde(rename = "order.delivered")]
    OrderDelivered,
    #[serde(rename = "cash.collected")]
    CashCollected,
    #[serde(rename = "order.paid")]
    OrderPaid,
    #[serde(rename = "order.expired")]
    OrderExpired,
}

impl EventType {
    pub const ALL: &'static [EventType] = &[
        EventType::OrderCreated,
        EventType::OrderDecided,
        EventType::OrderReadyForDispatch,
        EventType::OrderCanceled,
        EventType::NotificationRequested,
        EventType::OrderRetried,
        EventType::OrderPickedUp,
        EventType::OrderDelivered,
        EventType::CashCollected,
        EventType::OrderPaid,
        EventType::OrderExpired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::OrderDecided => "order.decided",
            EventType::OrderReadyForDispatch => "order.ready_for_dispatch",
            EventType::OrderCanceled => "order.canceled",
            EventType::NotificationRequested => "notification.requested",
            EventType::OrderRetried => "order.retried",
            EventType::OrderPickedUp => "order.picked_up",
            EventType::OrderDelivered => "order.delivered",
            EventType::CashCollected => "cash.collected",
            EventType::OrderPaid => "order.paid",
            EventType::OrderExpired => "order.expired",
        }
    }

    /// Events emitted at most once per aggregate. Nudges and retries may be
    /// emitted repeatedly.
    pub fn is_idempotent_by_key(&self) -> bool {
        !matches!(
            self,
            EventType::NotificationRequested | EventType::OrderRetried
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| DomainError::InvalidArg(format!("unknown event type: {}", s)))
    }
}

/// Closed set of aggregate roots events are attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Order,
    CheckoutGroup,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Order => "order",
            AggregateType::CheckoutGroup => "checkout_group",
        }
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(AggregateType::Order),
            "checkout_group" => Ok(AggregateType::CheckoutGroup),
            other => Err(DomainError::InvalidArg(format!(
                "unknown aggregate type: {}",
                other
            ))),
        }
    }
}

/// Who performed the action that produced an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub store_id: Option<StoreId>,
    pub role: String,
}

impl Actor {
    pub const ROLE_BUYER: &'static str = "buyer";
    pub const ROLE_VENDOR: &'static str = "vendor";
    pub const ROLE_AGENT: &'static str = "agent";
    pub const ROLE_ADMIN: &'static str = "admin";
    pub const ROLE_SYSTEM: &'static str = "system";

    pub fn new(user_id: UserId, store_id: Option<StoreId>, role: impl Into<String>) -> Self {
        Self {
            user_id,
            store_id,
            role: role.into(),
        }
    }

    pub fn buyer(user_id: UserId) -> Self {
        Self::new(user_id, None, Self::ROLE_BUYER)
    }

    pub fn vendor(user_id: UserId, store_id: StoreId) -> Self {
        Self::new(user_id, Some(store_id), Self::ROLE_VENDOR)
    }

    pub fn agent(user_id: UserId) -> Self {
        Self::new(user_id, None, Self::ROLE_AGENT)
    }

    pub fn admin(user_id: UserId) -> Self {
        Self::new(user_id, None, Self::ROLE_ADMIN)
    }

    pub fn system() -> Self {
        Self::new(UserId::from_uuid(Uuid::nil()), None, Self::ROLE_SYSTEM)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// An event produced by business code, before it is enveloped
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub event_type: EventType,
    pub aggregate_type: AggregateType,
    pub aggregate_id: Uuid,
    pub actor: Option<Actor>,
    pub data: EventPayload,
    pub version: u32,
    /// `None` is filled with the emission time
    pub occurred_at: Option<DateTime<Utc>>,
}

impl DomainEvent {
    pub fn new(aggregate_type: AggregateType, aggregate_id: Uuid, data: EventPayload) -> Self {
        Self {
            event_type: data.event_type(),
            aggregate_type,
            aggregate_id,
            actor: None,
            data,
            version: EventRegistry::CURRENT_VERSION,
            occurred_at: None,
        }
    }

    /// Event attached to an order aggregate
    pub fn for_order(order_id: impl Into<Uuid>, data: EventPayload) -> Self {
        Self::new(AggregateType::Order, order_id.into(), data)
    }

    pub fn with_actor(mut self, actor: &Actor) -> Self {
        self.actor = Some(actor.clone());
        self
    }

    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }
}

/// Versioned wire wrapper around an event's data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEnvelope {
    pub version: u32,
    pub event_id: EventId,
    pub occurred_at: DateTime<Utc>,
    pub actor: Option<Actor>,
    pub data: serde_json::Value,
}

impl PayloadEnvelope {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_shared::OrderId;

    #[test]
    fn test_event_type_strings_round_trip() {
        for event_type in EventType::ALL {
            let parsed: EventType = event_type.as_str().parse().unwrap();
            assert_eq!(*event_type, parsed);
            let json = serde_json::to_string(event_type).unwrap();
            assert_eq!(json, format!("\"{}\"", event_type.as_str()));
        }
        assert!("order.unknown".parse::<EventType>().is_err());
    }

    #[test]
    fn test_only_nudge_and_retry_are_repeatable() {
        let repeatable: Vec<_> = EventType::ALL
            .iter()
            .filter(|t| !t.is_idempotent_by_key())
            .collect();
        assert_eq!(
            repeatable,
            vec![&EventType::NotificationRequested, &EventType::OrderRetried]
        );
    }

    #[test]
    fn test_envelope_wire_shape() {
        let actor = Actor::vendor(UserId::new(), StoreId::new());
        let envelope = PayloadEnvelope {
            version: 1,
            event_id: EventId::new(),
            occurred_at: Utc::now(),
            actor: Some(actor.clone()),
            data: serde_json::json!({"order_id": OrderId::new()}),
        };
        let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["event_id"], envelope.event_id.to_string());
        assert_eq!(value["actor"]["role"], "vendor");
        assert_eq!(
            value["actor"]["store_id"],
            actor.store_id.unwrap().to_string()
        );

        let decoded = PayloadEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_envelope_without_actor_is_null() {
        let bytes = br#"{"version":1,"event_id":"6f1f3c1e-8a7b-4b8f-9d7e-2d3c4b5a6978","occurred_at":"2024-05-01T10:00:00Z","actor":null,"data":{}}"#;
        let envelope = PayloadEnvelope::from_bytes(bytes).unwrap();
        assert!(envelope.actor.is_none());
        assert!(PayloadEnvelope::from_bytes(b"{not json").is_err());
    }
}
