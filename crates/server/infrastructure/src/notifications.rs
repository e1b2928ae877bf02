//! Notification delivery.
//!
//! Push/email delivery is owned by another service; this sink logs each
//! request so the consumer pipeline can run end to end.

use async_trait::async_trait;
use tracing::info;

use marketplace_server_domain::sinks::{NotificationRequest, NotificationSink, Recipient, SinkError};

#[derive(Debug, Default, Clone)]
pub struct LoggingNotificationSink;

impl LoggingNotificationSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSink for LoggingNotificationSink {
    async fn send(&self, request: NotificationRequest) -> Result<(), SinkError> {
        let (recipient_kind, recipient_id) = match request.recipient {
            Recipient::Buyer(id) => ("buyer", id.to_string()),
            Recipient::Store(id) => ("store", id.to_string()),
        };
        info!(
            event_id = %request.event_id,
            order_id = %request.order_id,
            recipient_kind,
            recipient_id = %recipient_id,
            template = %request.template,
            "Notification requested"
        );
        Ok(())
    }
}
