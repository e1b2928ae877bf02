//! Background task spawners

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use marketplace_server_application::{ConsumerRuntime, OutboxPublisher, PublisherMetrics};
use marketplace_server_domain::event_bus::MessageBroker;
use marketplace_server_infrastructure::persistence::{PgTx, PostgresIdempotencyStore};

pub fn spawn_publisher(publisher: OutboxPublisher<PgTx>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move { publisher.run(cancel).await })
}

pub fn spawn_consumer(
    runtime: ConsumerRuntime,
    broker: Arc<dyn MessageBroker>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = runtime.run(broker, cancel).await {
            error!(consumer = %runtime.name(), error = %e, "Consumer exited with error");
        }
    })
}

/// Expired processed marks are dead weight once their TTL has passed.
pub fn spawn_idempotency_purge(
    store: Arc<PostgresIdempotencyStore>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => match store.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "Expired idempotency marks purged"),
                    Err(e) => warn!(error = %e, "Idempotency purge failed"),
                },
            }
        }
    })
}

pub fn spawn_metrics_reporter(
    metrics: Arc<PublisherMetrics>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval(every);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let snapshot = metrics.snapshot();
                    info!(
                        published = snapshot.published,
                        failed = snapshot.failed,
                        dead_lettered = snapshot.dead_lettered,
                        cycles = snapshot.cycles,
                        empty_polls = snapshot.empty_polls,
                        last_batch_duration_ms = snapshot.last_batch_duration_ms,
                        "Outbox publisher metrics"
                    );
                }
            }
        }
    })
}
