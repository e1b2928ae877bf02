//! Shared wiring for the in-memory integration tests

#![allow(dead_code)]

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use marketplace_server_application::consumer::{
    AnalyticsProjection, NotificationDispatcher, ANALYTICS_CONSUMER, NOTIFICATIONS_CONSUMER,
};
use marketplace_server_application::{
    ConsumerRuntime, DeliveryOutcome, EventEmitter, OrderLifecycleService, OutboxPublisher,
    PublisherSettings, TransactionRunner,
};
use marketplace_server_domain::event_bus::{DeliveryStream, MessageBroker};
use marketplace_server_domain::events::{
    DomainEvent, EventRegistry, OrderCreated, PayloadEnvelope,
};
use marketplace_server_domain::idempotency::IdempotencyGuard;
use marketplace_server_domain::outbox::OutboxRow;
use marketplace_server_domain::{CheckoutGroupId, DomainError, OrderId, PaymentMethod, StoreId, UserId};
use marketplace_server_infrastructure::{
    InMemoryBroker, InMemoryDatabase, InMemoryIdempotencyStore, InMemoryWarehouse, MemoryTx,
    RecordingNotificationSink,
};
use marketplace_shared::config::ConsumerConfig;

pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct Harness {
    pub db: InMemoryDatabase,
    pub broker: InMemoryBroker,
    pub kv: Arc<InMemoryIdempotencyStore>,
    pub warehouse: Arc<InMemoryWarehouse>,
    pub notifications: Arc<RecordingNotificationSink>,
    pub runner: TransactionRunner<MemoryTx>,
    pub emitter: EventEmitter<MemoryTx>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_database(InMemoryDatabase::new())
    }

    pub fn with_database(db: InMemoryDatabase) -> Self {
        let shared = Arc::new(db.clone());
        Self {
            runner: TransactionRunner::new(shared.clone()),
            emitter: EventEmitter::new(shared),
            db,
            broker: InMemoryBroker::new(),
            kv: Arc::new(InMemoryIdempotencyStore::new()),
            warehouse: Arc::new(InMemoryWarehouse::new()),
            notifications: Arc::new(RecordingNotificationSink::new()),
        }
    }

    pub fn publisher(&self, settings: PublisherSettings) -> OutboxPublisher<MemoryTx> {
        let db = Arc::new(self.db.clone());
        OutboxPublisher::new(
            self.runner.clone(),
            db.clone(),
            db,
            Arc::new(self.broker.clone()),
            settings,
        )
    }

    pub fn guard(&self) -> IdempotencyGuard {
        IdempotencyGuard::new(self.kv.clone(), IDEMPOTENCY_TTL)
    }

    pub fn analytics(&self) -> ConsumerRuntime {
        ConsumerRuntime::new(
            &ConsumerConfig::new(ANALYTICS_CONSUMER),
            Arc::new(AnalyticsProjection::new(self.warehouse.clone())),
            self.guard(),
            Arc::new(EventRegistry::default()),
        )
    }

    pub fn notifier(&self) -> ConsumerRuntime {
        ConsumerRuntime::new(
            &ConsumerConfig::new(NOTIFICATIONS_CONSUMER),
            Arc::new(NotificationDispatcher::new(self.notifications.clone())),
            self.guard(),
            Arc::new(EventRegistry::default()),
        )
    }

    pub async fn subscribe(&self, consumer: &str) -> DeliveryStream {
        self.broker
            .subscribe(consumer, Duration::from_secs(30))
            .await
            .unwrap()
    }

    pub fn orders(&self) -> OrderLifecycleService<MemoryTx> {
        let db = Arc::new(self.db.clone());
        OrderLifecycleService::new(
            self.runner.clone(),
            self.emitter.clone(),
            db.clone(),
            db.clone(),
            db,
        )
    }

    /// Commit one transaction that only emits `event`.
    pub async fn emit(&self, event: DomainEvent) -> Result<(), DomainError> {
        let emitter = self.emitter.clone();
        self.runner
            .with_tx(move |tx| Box::pin(async move { emitter.emit(tx, event).await.map(|_| ()) }))
            .await
    }

    pub fn rows_of_type(&self, event_type: &str) -> Vec<OutboxRow> {
        self.db
            .outbox_rows()
            .into_iter()
            .filter(|row| row.event_type == event_type)
            .collect()
    }
}

pub fn test_settings() -> PublisherSettings {
    PublisherSettings::default()
        .with_batch_size(10)
        .with_terminal_attempts(3)
        .with_poll_interval(Duration::from_millis(10))
        .with_send_timeout(Duration::from_millis(200))
}

pub fn order_created(order_id: OrderId) -> DomainEvent {
    DomainEvent::for_order(
        order_id,
        OrderCreated {
            order_id,
            checkout_group_id: CheckoutGroupId::new(),
            store_id: StoreId::new(),
            buyer_id: UserId::new(),
            total_cents: 1500,
            payment_method: PaymentMethod::CashOnDelivery,
            line_item_count: 1,
        }
        .into(),
    )
}

pub fn envelope_of(row: &OutboxRow) -> PayloadEnvelope {
    PayloadEnvelope::from_bytes(&row.payload).unwrap()
}

/// Process whatever the broker has queued for the stream's consumer.
pub async fn drain(runtime: &ConsumerRuntime, stream: &mut DeliveryStream) -> Vec<DeliveryOutcome> {
    let mut outcomes = Vec::new();
    while let Ok(Some(Ok(delivery))) =
        tokio::time::timeout(Duration::from_millis(50), stream.next()).await
    {
        outcomes.push(runtime.process(delivery).await);
    }
    outcomes
}
