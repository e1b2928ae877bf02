//! Idempotent consumer runtime

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use marketplace_server_domain::event_bus::{Delivery, MessageBroker};
use marketplace_server_domain::events::{EventRegistry, EventType, PayloadEnvelope};
use marketplace_server_domain::idempotency::IdempotencyGuard;
use marketplace_server_domain::DomainError;
use marketplace_shared::config::ConsumerConfig;

use super::{ConsumedEvent, EventHandler};

/// What the runtime did with one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Type not handled by this consumer; acked
    Skipped,
    /// Unreadable envelope or payload; acked without side effects
    Dropped,
    /// Already processed by this consumer; acked
    Duplicate,
    Handled,
    /// Handler failed. Permanent failures are acked, transient ones nacked.
    Failed { permanent: bool },
    /// The idempotency store could not be reached; nacked
    GuardUnavailable,
}

pub struct ConsumerRuntime {
    name: String,
    handler: Arc<dyn EventHandler>,
    guard: IdempotencyGuard,
    registry: Arc<EventRegistry>,
    ack_deadline: Duration,
}

impl ConsumerRuntime {
    pub fn new(
        config: &ConsumerConfig,
        handler: Arc<dyn EventHandler>,
        guard: IdempotencyGuard,
        registry: Arc<EventRegistry>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            handler,
            guard,
            registry,
            ack_deadline: config.ack_deadline(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pull deliveries until `cancel` fires or the broker closes the stream.
    /// A delivery already being processed is finished before returning.
    pub async fn run(
        &self,
        broker: Arc<dyn MessageBroker>,
        cancel: CancellationToken,
    ) -> Result<(), DomainError> {
        let mut deliveries = broker.subscribe(&self.name, self.ack_deadline).await?;
        info!(
            consumer = %self.name,
            ack_deadline = ?self.ack_deadline,
            "Consumer subscribed"
        );

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let outcome = self.process(delivery).await;
                    debug!(consumer = %self.name, ?outcome, "Delivery processed");
                }
                Some(Err(e)) => {
                    warn!(consumer = %self.name, error = %e, "Failed to receive delivery");
                }
                None => {
                    warn!(consumer = %self.name, "Delivery stream closed");
                    break;
                }
            }
        }

        info!(consumer = %self.name, "Consumer stopped");
        Ok(())
    }

    /// Handle one delivery and settle it with the broker.
    pub async fn process(&self, delivery: Box<dyn Delivery>) -> DeliveryOutcome {
        let event_type = match delivery
            .event_type()
            .and_then(|t| t.parse::<EventType>().ok())
        {
            Some(event_type) if self.handler.handles(event_type) => event_type,
            _ => {
                self.ack(delivery).await;
                return DeliveryOutcome::Skipped;
            }
        };

        let event = match self.decode(event_type, delivery.payload()) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    consumer = %self.name,
                    event_type = %event_type,
                    error = %e,
                    "Dropping undecodable delivery"
                );
                self.ack(delivery).await;
                return DeliveryOutcome::Dropped;
            }
        };
        let event_id = event.envelope.event_id;

        match self.guard.check_and_mark(&self.name, &event_id).await {
            Ok(false) => {}
            Ok(true) => {
                debug!(consumer = %self.name, event_id = %event_id, "Duplicate delivery");
                self.ack(delivery).await;
                return DeliveryOutcome::Duplicate;
            }
            Err(e) => {
                warn!(
                    consumer = %self.name,
                    event_id = %event_id,
                    error = %e,
                    "Idempotency check failed, requesting redelivery"
                );
                self.nack(delivery).await;
                return DeliveryOutcome::GuardUnavailable;
            }
        }

        let result = match tokio::time::timeout(self.ack_deadline, self.handler.handle(&event)).await
        {
            Ok(result) => result,
            Err(_) => Err(DomainError::Dependency(format!(
                "handler exceeded ack deadline of {:?}",
                self.ack_deadline
            ))),
        };

        match result {
            Ok(()) => {
                self.ack(delivery).await;
                DeliveryOutcome::Handled
            }
            Err(e) => {
                // The side effect did not happen; let the next delivery retry it.
                if let Err(release_err) = self.guard.release(&self.name, &event_id).await {
                    error!(
                        consumer = %self.name,
                        event_id = %event_id,
                        error = %release_err,
                        "Failed to release processed mark"
                    );
                }

                let permanent = e.kind().is_permanent();
                if permanent {
                    warn!(
                        consumer = %self.name,
                        event_id = %event_id,
                        event_type = %event_type,
                        error = %e,
                        "Handler rejected event permanently, dropping"
                    );
                    self.ack(delivery).await;
                } else {
                    warn!(
                        consumer = %self.name,
                        event_id = %event_id,
                        event_type = %event_type,
                        error = %e,
                        "Handler failed, requesting redelivery"
                    );
                    self.nack(delivery).await;
                }
                DeliveryOutcome::Failed { permanent }
            }
        }
    }

    fn decode(&self, event_type: EventType, bytes: &[u8]) -> Result<ConsumedEvent, DomainError> {
        let envelope = PayloadEnvelope::from_bytes(bytes)
            .map_err(|e| DomainError::InvalidArg(format!("malformed envelope: {}", e)))?;
        if envelope.event_id.is_nil() {
            return Err(DomainError::InvalidArg(
                "envelope carries the zero event id".to_string(),
            ));
        }
        let payload = self
            .registry
            .decode(event_type, envelope.version, &envelope.data)?;
        Ok(ConsumedEvent {
            event_type,
            envelope,
            payload,
        })
    }

    async fn ack(&self, delivery: Box<dyn Delivery>) {
        if let Err(e) = delivery.ack().await {
            warn!(consumer = %self.name, error = %e, "Failed to ack delivery");
        }
    }

    async fn nack(&self, delivery: Box<dyn Delivery>) {
        if let Err(e) = delivery.nack().await {
            warn!(consumer = %self.name, error = %e, "Failed to nack delivery");
        }
    }
}

impl std::fmt::Debug for ConsumerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRuntime")
            .field("name", &self.name)
            .field("ack_deadline", &self.ack_deadline)
            .finish_non_exhaustive()
    }
}
