//! Startup: connect, migrate and spawn the background workers.

pub mod shutdown;
mod workers;

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use marketplace_server_application::consumer::{
    AnalyticsProjection, EventHandler, NotificationDispatcher, ANALYTICS_CONSUMER,
    NOTIFICATIONS_CONSUMER,
};
use marketplace_server_application::outbox::RetentionSettings;
use marketplace_server_application::{
    ConsumerRuntime, OutboxPublisher, OutboxRetentionWorker, PublisherSettings, TransactionRunner,
};
use marketplace_server_domain::event_bus::MessageBroker;
use marketplace_server_domain::events::EventRegistry;
use marketplace_server_domain::idempotency::IdempotencyGuard;
use marketplace_server_infrastructure::persistence::{
    run_migrations, DatabasePool, DatabasePoolConfig, MigrationOptions, PgTx,
    PostgresDlqStore, PostgresIdempotencyStore, PostgresOutboxStore, PostgresTransactionProvider,
    PostgresWarehouseSink,
};
use marketplace_server_infrastructure::{LoggingNotificationSink, NatsBroker, StreamSettings};
use marketplace_shared::config::{BusConfigDto, ConsumerConfig};

/// Background tasks started by [`run`]
pub struct Running {
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    pool: DatabasePool,
}

impl Running {
    /// Cancel every task and wait for in-flight work to settle.
    pub async fn shutdown(self) {
        info!(tasks = self.tasks.len(), "Shutting down background tasks");
        self.cancel.cancel();
        shutdown::join_all(self.tasks, shutdown::DRAIN_TIMEOUT).await;
        self.pool.close().await;
        info!("Shutdown complete");
    }
}

pub async fn run(config: BusConfigDto) -> anyhow::Result<Running> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        publishers = config.publisher.worker_count,
        consumers = config.consumers.len(),
        "Starting marketplace event bus"
    );

    let pool = DatabasePool::new(
        &config.database.url,
        DatabasePoolConfig::from(&config.database),
    )
    .await
    .context("Failed to connect to database")?;
    info!("✓ Database connected");

    run_migrations(
        pool.pool(),
        MigrationOptions {
            event_key_index: config.outbox.event_key_index,
        },
    )
    .await
    .context("Failed to run migrations")?;
    info!("✓ Migrations applied");

    let broker: Arc<dyn MessageBroker> = Arc::new(
        NatsBroker::connect(&config.nats, StreamSettings::default())
            .await
            .context("Failed to connect to NATS")?,
    );
    info!("✓ NATS JetStream ready");

    let pg = pool.pg_pool();
    let runner: TransactionRunner<PgTx> =
        TransactionRunner::new(Arc::new(PostgresTransactionProvider::new(pg.clone())));
    let outbox = Arc::new(PostgresOutboxStore::new(pg.clone()));
    let dlq = Arc::new(PostgresDlqStore::new(pg.clone()));
    let idempotency = Arc::new(PostgresIdempotencyStore::new(pg.clone()));

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    let settings = PublisherSettings::from(&config.publisher);
    let first = OutboxPublisher::new(runner, outbox.clone(), dlq, broker.clone(), settings);
    let metrics = first.metrics();
    for index in 0..config.publisher.worker_count.max(1) {
        let publisher = first.clone().with_metrics(metrics.clone());
        tasks.push((
            format!("publisher-{}", index),
            workers::spawn_publisher(publisher, cancel.clone()),
        ));
    }
    info!("✓ Outbox publishers started");

    let registry = Arc::new(EventRegistry::default());
    for consumer in &config.consumers {
        let handler = handler_for(consumer, &pg)?;
        let guard = IdempotencyGuard::new(idempotency.clone(), config.idempotency.ttl());
        let runtime = ConsumerRuntime::new(consumer, handler, guard, registry.clone());
        tasks.push((
            format!("consumer-{}", consumer.name),
            workers::spawn_consumer(runtime, broker.clone(), cancel.clone()),
        ));
    }
    info!("✓ Consumers started");

    let retention = OutboxRetentionWorker::new(outbox, RetentionSettings::from(&config.outbox));
    tasks.push((
        "outbox-retention".to_string(),
        tokio::spawn(retention.run(cancel.clone())),
    ));
    tasks.push((
        "idempotency-purge".to_string(),
        workers::spawn_idempotency_purge(
            idempotency,
            config.outbox.cleanup_interval(),
            cancel.clone(),
        ),
    ));
    tasks.push((
        "publisher-metrics".to_string(),
        workers::spawn_metrics_reporter(metrics, config.outbox.cleanup_interval(), cancel.clone()),
    ));

    Ok(Running {
        cancel,
        tasks,
        pool,
    })
}

fn handler_for(
    consumer: &ConsumerConfig,
    pool: &PgPool,
) -> anyhow::Result<Arc<dyn EventHandler>> {
    match consumer.name.as_str() {
        ANALYTICS_CONSUMER => Ok(Arc::new(AnalyticsProjection::new(Arc::new(
            PostgresWarehouseSink::new(pool.clone()),
        )))),
        NOTIFICATIONS_CONSUMER => Ok(Arc::new(NotificationDispatcher::new(Arc::new(
            LoggingNotificationSink::new(),
        )))),
        other => anyhow::bail!("Unknown consumer '{}'", other),
    }
}
