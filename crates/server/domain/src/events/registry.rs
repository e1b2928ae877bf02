//! Decoder registry keyed by `(event type, schema version)`.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use super::payloads::*;
use super::EventType;
use crate::shared_kernel::DomainError;

type Decoder = fn(&serde_json::Value) -> Result<EventPayload, serde_json::Error>;

fn decode_as<T>(data: &serde_json::Value) -> Result<EventPayload, serde_json::Error>
where
    T: DeserializeOwned + Into<EventPayload>,
{
    T::deserialize(data).map(Into::into)
}

/// Maps every known `(EventType, version)` to the schema that decodes it.
///
/// Adding a schema means adding a payload type and registering it here;
/// anything unregistered is rejected as a permanent error.
#[derive(Clone)]
pub struct EventRegistry {
    decoders: HashMap<(EventType, u32), Decoder>,
}

impl EventRegistry {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    pub fn register(&mut self, event_type: EventType, version: u32, decoder: Decoder) {
        self.decoders.insert((event_type, version), decoder);
    }

    pub fn supports(&self, event_type: EventType, version: u32) -> bool {
        self.decoders.contains_key(&(event_type, version))
    }

    pub fn decode(
        &self,
        event_type: EventType,
        version: u32,
        data: &serde_json::Value,
    ) -> Result<EventPayload, DomainError> {
        let decoder = self.decoders.get(&(event_type, version)).ok_or_else(|| {
            DomainError::InvalidArg(format!(
                "no schema registered for {} v{}",
                event_type, version
            ))
        })?;

        decoder(data).map_err(|e| {
            DomainError::InvalidArg(format!(
                "malformed {} v{} payload: {}",
                event_type, version, e
            ))
        })
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        let v1 = Self::CURRENT_VERSION;
        registry.register(EventType::OrderCreated, v1, decode_as::<OrderCreated>);
        registry.register(EventType::OrderDecided, v1, decode_as::<OrderDecided>);
        registry.register(
            EventType::OrderReadyForDispatch,
            v1,
            decode_as::<OrderReadyForDispatch>,
        );
        registry.register(EventType::OrderCanceled, v1, decode_as::<OrderCanceled>);
        registry.register(
            EventType::NotificationRequested,
            v1,
            decode_as::<NotificationRequested>,
        );
        registry.register(EventType::OrderRetried, v1, decode_as::<OrderRetried>);
        registry.register(EventType::OrderPickedUp, v1, decode_as::<OrderPickedUp>);
        registry.register(EventType::OrderDelivered, v1, decode_as::<OrderDelivered>);
        registry.register(EventType::CashCollected, v1, decode_as::<CashCollected>);
        registry.register(EventType::OrderPaid, v1, decode_as::<OrderPaid>);
        registry.register(EventType::OrderExpired, v1, decode_as::<OrderExpired>);
        registry
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self
            .decoders
            .keys()
            .map(|(t, v)| format!("{}@v{}", t, v))
            .collect();
        keys.sort();
        f.debug_struct("EventRegistry").field("schemas", &keys).finish()
    }
}
