//! Subject and header names shared by the broker publisher and consumers.
//!
//! ## Naming Convention
//! - Format: `marketplace.events.{event_type}`, e.g.
//!   `marketplace.events.order.created`
//!
//! ```rust
//! use marketplace_shared::event_topics::{subject_for, EVENT_PREFIX};
//!
//! assert_eq!(EVENT_PREFIX, "marketplace.events");
//! assert_eq!(subject_for("order.created"), "marketplace.events.order.created");
//! ```

/// Subject prefix for all marketplace events
pub const EVENT_PREFIX: &str = "marketplace.events";

/// Stream name for all events
pub const EVENTS_STREAM_NAME: &str = "MARKETPLACE_EVENTS";

/// Wildcard covering every event subject
pub const ALL_EVENTS: &str = "marketplace.events.>";

/// Broker-level attribute carrying the event type
pub const EVENT_TYPE_HEADER: &str = "event-type";

/// Broker-level attribute carrying the envelope event id
pub const EVENT_ID_HEADER: &str = "event-id";

/// Header JetStream uses for duplicate detection
pub const DEDUP_HEADER: &str = "Nats-Msg-Id";

pub fn subject_for(event_type: &str) -> String {
    format!("{}.{}", EVENT_PREFIX, event_type)
}

/// Inverse of [`subject_for`]
pub fn event_type_from_subject(subject: &str) -> Option<&str> {
    subject
        .strip_prefix(EVENT_PREFIX)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|rest| !rest.is_empty())
}
