use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

use crate::shared_kernel::DomainError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Failed to publish message: {0}")]
    PublishError(String),
    #[error("Failed to subscribe: {0}")]
    SubscribeError(String),
    #[error("Failed to acknowledge delivery: {0}")]
    AckError(String),
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Broker operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<BrokerError> for DomainError {
    fn from(err: BrokerError) -> Self {
        DomainError::Dependency(format!("broker: {}", err))
    }
}

/// A serialized envelope on its way to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub event_type: String,
    /// Broker-level dedup key (the envelope event id)
    pub dedup_id: String,
    pub payload: Vec<u8>,
}

/// One delivery of a message to a consumer
#[async_trait]
pub trait Delivery: Send {
    /// The `event_type` attribute, if the broker carried one
    fn event_type(&self) -> Option<&str>;

    fn payload(&self) -> &[u8];

    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Ask the broker to redeliver
    async fn nack(self: Box<Self>) -> Result<(), BrokerError>;
}

pub type DeliveryStream = BoxStream<'static, Result<Box<dyn Delivery>, BrokerError>>;

/// Broker port used by the publisher and the consumer runtime
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn send(&self, message: BrokerMessage) -> Result<(), BrokerError>;

    /// Durable subscription for `consumer`. Deliveries not acknowledged within
    /// `ack_deadline` are redelivered.
    async fn subscribe(
        &self,
        consumer: &str,
        ack_deadline: Duration,
    ) -> Result<DeliveryStream, BrokerError>;
}
