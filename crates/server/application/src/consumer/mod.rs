//! Consumer side of the bus
//!
//! [`ConsumerRuntime`] pulls deliveries for one named consumer, decodes and
//! deduplicates them, and hands typed events to an [`EventHandler`].

pub mod analytics;
pub mod notifications;
pub mod runtime;

use async_trait::async_trait;

use marketplace_server_domain::events::{EventPayload, EventType, PayloadEnvelope};
use marketplace_server_domain::DomainError;

pub use analytics::{AnalyticsProjection, ANALYTICS_CONSUMER};
pub use notifications::{NotificationDispatcher, NOTIFICATIONS_CONSUMER};
pub use runtime::{ConsumerRuntime, DeliveryOutcome};

/// A delivery that passed decoding, ready for a handler
#[derive(Debug, Clone)]
pub struct ConsumedEvent {
    pub event_type: EventType,
    pub envelope: PayloadEnvelope,
    pub payload: EventPayload,
}

/// Side effect applied once per event and consumer.
///
/// Errors whose kind is permanent are dropped (the delivery is acked);
/// anything else asks the broker to redeliver.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn handles(&self, event_type: EventType) -> bool;

    async fn handle(&self, event: &ConsumedEvent) -> Result<(), DomainError>;
}
