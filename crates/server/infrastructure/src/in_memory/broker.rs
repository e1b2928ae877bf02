//! In-memory broker with durable per-consumer delivery.
//!
//! Every accepted message is appended to a log. Each named consumer receives
//! every message in the log that it has not acked, including messages sent
//! before it subscribed. A nack, or a delivery dropped without being settled,
//! puts the message back on the consumer's queue. Duplicate sends are
//! delivered as duplicates; the consumer runtime is responsible for
//! deduplication.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use marketplace_server_domain::event_bus::{
    BrokerError, BrokerMessage, Delivery, DeliveryStream, MessageBroker,
};

#[derive(Debug, Clone)]
struct Logged {
    seq: u64,
    event_type: Option<String>,
    dedup_id: String,
    payload: Vec<u8>,
}

#[derive(Debug)]
struct ConsumerState {
    name: String,
    queue: Mutex<mpsc::UnboundedSender<Logged>>,
    acked: Mutex<HashSet<u64>>,
    deliveries: AtomicU64,
}

impl ConsumerState {
    fn requeue(&self, message: Logged) {
        // A closed queue means the subscription ended; re-subscribing
        // replays everything not acked.
        let _ = self.queue.lock().send(message);
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    log: Mutex<Vec<Logged>>,
    consumers: Mutex<HashMap<String, Arc<ConsumerState>>>,
    failures: AtomicU32,
    unavailable: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` sends.
    pub fn fail_next_sends(&self, count: u32) {
        self.state.failures.store(count, Ordering::SeqCst);
    }

    /// Reject every send until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay each send, e.g. to trip the publisher's send timeout.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        *self.state.send_delay.lock() = delay;
    }

    /// Append a message with arbitrary attributes, bypassing the send path.
    pub fn publish_raw(&self, event_type: Option<&str>, dedup_id: &str, payload: Vec<u8>) {
        self.append(event_type.map(str::to_string), dedup_id.to_string(), payload);
    }

    /// Every accepted message, duplicates included
    pub fn sent(&self) -> Vec<BrokerMessage> {
        self.state
            .log
            .lock()
            .iter()
            .map(|m| BrokerMessage {
                event_type: m.event_type.clone().unwrap_or_default(),
                dedup_id: m.dedup_id.clone(),
                payload: m.payload.clone(),
            })
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.state.log.lock().len()
    }

    pub fn acked_count(&self, consumer: &str) -> usize {
        self.state
            .consumers
            .lock()
            .get(consumer)
            .map(|c| c.acked.lock().len())
            .unwrap_or(0)
    }

    /// Deliveries handed to `consumer`, redeliveries included
    pub fn delivery_count(&self, consumer: &str) -> u64 {
        self.state
            .consumers
            .lock()
            .get(consumer)
            .map(|c| c.deliveries.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn append(&self, event_type: Option<String>, dedup_id: String, payload: Vec<u8>) {
        let mut log = self.state.log.lock();
        let message = Logged {
            seq: log.len() as u64 + 1,
            event_type,
            dedup_id,
            payload,
        };
        for consumer in self.state.consumers.lock().values() {
            consumer.requeue(message.clone());
        }
        log.push(message);
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send(&self, message: BrokerMessage) -> Result<(), BrokerError> {
        if self.state.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionError("broker unavailable".to_string()));
        }
        if self
            .state
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BrokerError::PublishError("injected send failure".to_string()));
        }
        let delay = *self.state.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        debug!(event_type = %message.event_type, dedup_id = %message.dedup_id, "Message accepted");
        self.append(Some(message.event_type), message.dedup_id, message.payload);
        Ok(())
    }

    async fn subscribe(
        &self,
        consumer: &str,
        _ack_deadline: Duration,
    ) -> Result<DeliveryStream, BrokerError> {
        if consumer.trim().is_empty() {
            return Err(BrokerError::SubscribeError(
                "consumer name cannot be empty".to_string(),
            ));
        }

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let state = {
            let log = self.state.log.lock();
            let mut consumers = self.state.consumers.lock();
            let state = consumers
                .entry(consumer.to_string())
                .or_insert_with(|| {
                    Arc::new(ConsumerState {
                        name: consumer.to_string(),
                        queue: Mutex::new(sender.clone()),
                        acked: Mutex::new(HashSet::new()),
                        deliveries: AtomicU64::new(0),
                    })
                })
                .clone();
            *state.queue.lock() = sender.clone();

            {
                let acked = state.acked.lock();
                for message in log.iter().filter(|m| !acked.contains(&m.seq)) {
                    let _ = sender.send(message.clone());
                }
            }
            state
        };
        debug!(consumer = %state.name, "Subscribed to in-memory broker");

        let stream = async_stream::stream! {
            while let Some(message) = receiver.recv().await {
                state.deliveries.fetch_add(1, Ordering::SeqCst);
                let delivery: Box<dyn Delivery> = Box::new(MemoryDelivery {
                    message: Some(message),
                    consumer: state.clone(),
                });
                yield Ok::<_, BrokerError>(delivery);
            }
        };
        Ok(Box::pin(stream))
    }
}

struct MemoryDelivery {
    /// `None` once settled
    message: Option<Logged>,
    consumer: Arc<ConsumerState>,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn event_type(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.event_type.as_deref())
    }

    fn payload(&self) -> &[u8] {
        self.message
            .as_ref()
            .map(|m| m.payload.as_slice())
            .unwrap_or_default()
    }

    async fn ack(mut self: Box<Self>) -> Result<(), BrokerError> {
        if let Some(message) = self.message.take() {
            self.consumer.acked.lock().insert(message.seq);
        }
        Ok(())
    }

    async fn nack(mut self: Box<Self>) -> Result<(), BrokerError> {
        if let Some(message) = self.message.take() {
            self.consumer.requeue(message);
        }
        Ok(())
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        // Unsettled deliveries come back, as after an expired ack deadline.
        if let Some(message) = self.message.take() {
            self.consumer.requeue(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn message(event_type: &str, id: &str) -> BrokerMessage {
        BrokerMessage {
            event_type: event_type.to_string(),
            dedup_id: id.to_string(),
            payload: id.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_late_subscriber_receives_backlog() {
        let broker = InMemoryBroker::new();
        broker.send(message("order.created", "a")).await.unwrap();

        let mut stream = broker
            .subscribe("analytics", Duration::from_secs(30))
            .await
            .unwrap();
        broker.send(message("order.paid", "b")).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.event_type(), Some("order.created"));
        first.ack().await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.payload(), b"b");
        second.ack().await.unwrap();

        assert_eq!(broker.acked_count("analytics"), 2);
    }

    #[tokio::test]
    async fn test_nack_and_drop_redeliver() {
        let broker = InMemoryBroker::new();
        let mut stream = broker
            .subscribe("notifications", Duration::from_secs(30))
            .await
            .unwrap();
        broker.send(message("order.canceled", "a")).await.unwrap();

        stream.next().await.unwrap().unwrap().nack().await.unwrap();
        drop(stream.next().await.unwrap().unwrap());
        let third = stream.next().await.unwrap().unwrap();
        assert_eq!(third.payload(), b"a");
        third.ack().await.unwrap();

        assert_eq!(broker.delivery_count("notifications"), 3);
    }

    #[tokio::test]
    async fn test_resubscribe_replays_unacked_only() {
        let broker = InMemoryBroker::new();
        broker.send(message("order.created", "a")).await.unwrap();
        broker.send(message("order.created", "b")).await.unwrap();
        {
            let mut stream = broker
                .subscribe("analytics", Duration::from_secs(30))
                .await
                .unwrap();
            stream.next().await.unwrap().unwrap().ack().await.unwrap();
        }

        let mut stream = broker
            .subscribe("analytics", Duration::from_secs(30))
            .await
            .unwrap();
        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next.payload(), b"b");
    }

    #[tokio::test]
    async fn test_send_failures() {
        let broker = InMemoryBroker::new();
        broker.fail_next_sends(1);
        assert!(matches!(
            broker.send(message("order.created", "a")).await,
            Err(BrokerError::PublishError(_))
        ));
        broker.send(message("order.created", "a")).await.unwrap();

        broker.set_unavailable(true);
        assert!(broker.send(message("order.created", "b")).await.is_err());
        assert_eq!(broker.sent_count(), 1);
    }
}
