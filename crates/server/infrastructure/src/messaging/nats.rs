//! NATS JetStream broker
//!
//! All events go to one stream, `MARKETPLACE_EVENTS`, on subjects
//! `marketplace.events.<event_type>`. Each published message carries the
//! event type and event id as headers, and the event id again as
//! `Nats-Msg-Id` so JetStream drops re-sends inside its duplicate window.
//!
//! Every consumer name maps to a durable pull consumer with explicit acks;
//! unacked deliveries are redelivered after the consumer's ack deadline.

use async_nats::jetstream::consumer::pull::Config as PullConsumerConfig;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, PullConsumer};
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::stream::{RetentionPolicy, StorageType, Stream as StreamHandle};
use async_nats::jetstream::{AckKind, Context as JetStreamContext, Message as JetStreamMessage};
use async_nats::{Client, ConnectOptions, HeaderMap};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use marketplace_server_domain::event_bus::{
    BrokerError, BrokerMessage, Delivery, DeliveryStream, MessageBroker,
};
use marketplace_shared::config::NatsConfig;
use marketplace_shared::event_topics::{
    subject_for, ALL_EVENTS, DEDUP_HEADER, EVENTS_STREAM_NAME, EVENT_ID_HEADER, EVENT_TYPE_HEADER,
};

/// Stream limits
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub max_age: Duration,
    /// Window in which JetStream drops messages with a repeated `Nats-Msg-Id`
    pub duplicate_window: Duration,
    pub max_ack_pending: i64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            duplicate_window: Duration::from_secs(120),
            max_ack_pending: 1000,
        }
    }
}

#[derive(Clone)]
pub struct NatsBroker {
    client: Arc<Client>,
    jetstream: JetStreamContext,
    settings: StreamSettings,
}

impl NatsBroker {
    /// Connect and make sure the events stream exists.
    pub async fn connect(config: &NatsConfig, settings: StreamSettings) -> Result<Self, BrokerError> {
        let options = ConnectOptions::new()
            .connection_timeout(Duration::from_secs(config.timeout_secs))
            .name("marketplace-event-bus");

        let client = async_nats::connect_with_options(config.urls.join(",").as_str(), options)
            .await
            .map_err(|e| BrokerError::ConnectionError(e.to_string()))?;
        info!(urls = ?config.urls, "Connected to NATS");

        let jetstream = async_nats::jetstream::new(client.clone());
        let broker = Self {
            client: Arc::new(client),
            jetstream,
            settings,
        };
        broker.ensure_stream().await?;
        Ok(broker)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn ensure_stream(&self) -> Result<StreamHandle, BrokerError> {
        if let Ok(stream) = self.jetstream.get_stream(EVENTS_STREAM_NAME).await {
            debug!(stream = EVENTS_STREAM_NAME, "Stream already exists");
            return Ok(stream);
        }

        info!(stream = EVENTS_STREAM_NAME, subjects = ALL_EVENTS, "Creating stream");
        let config = StreamConfig {
            name: EVENTS_STREAM_NAME.to_string(),
            subjects: vec![ALL_EVENTS.to_string()],
            retention: RetentionPolicy::Limits,
            max_age: self.settings.max_age,
            duplicate_window: self.settings.duplicate_window,
            storage: StorageType::File,
            num_replicas: 1,
            ..Default::default()
        };
        self.jetstream
            .create_stream(config)
            .await
            .map_err(|e| BrokerError::ConnectionError(e.to_string()))
    }

    async fn consumer(
        &self,
        consumer_name: &str,
        ack_deadline: Duration,
    ) -> Result<PullConsumer, BrokerError> {
        let stream = self.ensure_stream().await?;

        if let Ok(consumer) = stream.get_consumer(consumer_name).await {
            debug!(consumer = consumer_name, "Consumer already exists");
            return Ok(consumer);
        }

        info!(consumer = consumer_name, ?ack_deadline, "Creating durable consumer");
        let config = PullConsumerConfig {
            durable_name: Some(consumer_name.to_string()),
            deliver_policy: DeliverPolicy::All,
            ack_policy: AckPolicy::Explicit,
            ack_wait: ack_deadline,
            filter_subject: ALL_EVENTS.to_string(),
            max_ack_pending: self.settings.max_ack_pending,
            ..Default::default()
        };
        stream
            .create_consumer(config)
            .await
            .map_err(|e| BrokerError::SubscribeError(e.to_string()))
    }
}

fn headers_for(message: &BrokerMessage) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(EVENT_TYPE_HEADER, message.event_type.as_str());
    headers.insert(EVENT_ID_HEADER, message.dedup_id.as_str());
    headers.insert(DEDUP_HEADER, message.dedup_id.as_str());
    headers
}

#[async_trait]
impl MessageBroker for NatsBroker {
    #[instrument(skip(self, message), fields(event_type = %message.event_type, event_id = %message.dedup_id))]
    async fn send(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        let subject = subject_for(&message.event_type);
        let headers = headers_for(&message);

        let ack = self
            .jetstream
            .publish_with_headers(subject.clone(), headers, message.payload.into())
            .await
            .map_err(|e| BrokerError::PublishError(e.to_string()))?;

        // Wait for the stream to persist the message
        let ack = ack
            .await
            .map_err(|e| BrokerError::PublishError(e.to_string()))?;

        debug!(subject = %subject, sequence = ack.sequence, duplicate = ack.duplicate, "Published");
        Ok(())
    }

    async fn subscribe(
        &self,
        consumer: &str,
        ack_deadline: Duration,
    ) -> Result<DeliveryStream, BrokerError> {
        let consumer_handle = self.consumer(consumer, ack_deadline).await?;
        let consumer_name = consumer.to_string();

        let stream = async_stream::stream! {
            let mut messages = match consumer_handle.messages().await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(consumer = %consumer_name, error = %e, "Failed to open message stream");
                    yield Err(BrokerError::ConnectionError(e.to_string()));
                    return;
                }
            };

            while let Some(result) = messages.next().await {
                match result {
                    Ok(message) => {
                        let delivery: Box<dyn Delivery> = Box::new(NatsDelivery::new(message));
                        yield Ok(delivery);
                    }
                    Err(e) => {
                        warn!(consumer = %consumer_name, error = %e, "Error receiving message");
                        yield Err(BrokerError::ConnectionError(e.to_string()));
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

struct NatsDelivery {
    message: JetStreamMessage,
    event_type: Option<String>,
}

impl NatsDelivery {
    fn new(message: JetStreamMessage) -> Self {
        let event_type = message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(EVENT_TYPE_HEADER))
            .map(|value| value.as_str().to_string());
        Self {
            message,
            event_type,
        }
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.message
            .ack()
            .await
            .map_err(|e| BrokerError::AckError(e.to_string()))
    }

    async fn nack(self: Box<Self>) -> Result<(), BrokerError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BrokerError::AckError(e.to_string()))
    }
}
