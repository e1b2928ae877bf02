//! Outbox publisher
//!
//! Each cycle runs in one transaction: lease a batch, forward every row to
//! the broker, and record the outcome on the row. Rows leased by another
//! worker are skipped, so any number of publishers can drain the same
//! outbox. Delivery is at least once: a crash between a broker ack and the
//! commit re-publishes the row, and consumers deduplicate by event id.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use marketplace_server_domain::event_bus::{BrokerError, BrokerMessage, MessageBroker};
use marketplace_server_domain::events::PayloadEnvelope;
use marketplace_server_domain::outbox::{DlqEntry, DlqStore, OutboxRow, OutboxStore};
use marketplace_server_domain::transaction::TxHandle;
use marketplace_server_domain::{DomainError, EventId};
use marketplace_shared::config::PublisherConfig;

use super::metrics::PublisherMetrics;
use crate::transaction::TransactionRunner;

/// Runtime settings of a publisher worker
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub batch_size: u32,
    /// Attempts after which a row is dead-lettered
    pub terminal_attempts: i32,
    pub poll_interval: Duration,
    pub send_timeout: Duration,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self::from(&PublisherConfig::default())
    }
}

impl From<&PublisherConfig> for PublisherSettings {
    fn from(config: &PublisherConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            terminal_attempts: i32::try_from(config.terminal_attempts).unwrap_or(i32::MAX),
            poll_interval: config.poll_interval(),
            send_timeout: config.send_timeout(),
        }
    }
}

impl PublisherSettings {
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_terminal_attempts(mut self, attempts: i32) -> Self {
        self.terminal_attempts = attempts;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

/// Outcome of one publish cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub leased: usize,
    pub published: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl CycleReport {
    pub fn is_empty(&self) -> bool {
        self.leased == 0
    }
}

pub struct OutboxPublisher<Tx: TxHandle> {
    runner: TransactionRunner<Tx>,
    outbox: Arc<dyn OutboxStore<Tx = Tx>>,
    dlq: Arc<dyn DlqStore<Tx = Tx>>,
    broker: Arc<dyn MessageBroker>,
    settings: PublisherSettings,
    metrics: Arc<PublisherMetrics>,
}

impl<Tx: TxHandle> Clone for OutboxPublisher<Tx> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            outbox: self.outbox.clone(),
            dlq: self.dlq.clone(),
            broker: self.broker.clone(),
            settings: self.settings.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<Tx: TxHandle> OutboxPublisher<Tx> {
    pub fn new(
        runner: TransactionRunner<Tx>,
        outbox: Arc<dyn OutboxStore<Tx = Tx>>,
        dlq: Arc<dyn DlqStore<Tx = Tx>>,
        broker: Arc<dyn MessageBroker>,
        settings: PublisherSettings,
    ) -> Self {
        Self {
            runner,
            outbox,
            dlq,
            broker,
            settings,
            metrics: Arc::new(PublisherMetrics::new()),
        }
    }

    /// Share one metrics instance between several workers.
    pub fn with_metrics(mut self, metrics: Arc<PublisherMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<PublisherMetrics> {
        self.metrics.clone()
    }

    pub fn settings(&self) -> &PublisherSettings {
        &self.settings
    }

    /// Poll until `cancel` fires. Sleeps `poll_interval` after an empty batch
    /// or a failed cycle; a full batch is followed immediately by the next.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            batch_size = self.settings.batch_size,
            terminal_attempts = self.settings.terminal_attempts,
            poll_interval = ?self.settings.poll_interval,
            "Starting outbox publisher"
        );

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.run_cycle() => outcome,
            };

            let idle = match outcome {
                Ok(report) if report.is_empty() => true,
                Ok(report) => {
                    debug!(
                        leased = report.leased,
                        published = report.published,
                        failed = report.failed,
                        dead_lettered = report.dead_lettered,
                        "Outbox batch processed"
                    );
                    false
                }
                Err(e) => {
                    warn!(error = %e, "Outbox publish cycle failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }

        info!("Outbox publisher stopped");
    }

    /// Lease one batch and publish it inside a single transaction.
    pub async fn run_cycle(&self) -> Result<CycleReport, DomainError> {
        let start = Instant::now();
        let this = self.clone();
        let report = self
            .runner
            .with_tx(move |tx| Box::pin(async move { this.process_batch(tx).await }))
            .await?;

        self.metrics.increment_cycles();
        if report.is_empty() {
            self.metrics.increment_empty_polls();
        } else {
            self.metrics.increment_published(report.published);
            self.metrics.increment_failed(report.failed);
            self.metrics.increment_dead_lettered(report.dead_lettered);
            self.metrics
                .set_last_batch_duration(start.elapsed().as_millis() as u64);
        }
        Ok(report)
    }

    async fn process_batch(&self, tx: &mut Tx) -> Result<CycleReport, DomainError> {
        let rows = self
            .outbox
            .fetch_batch(tx, self.settings.batch_size, self.settings.terminal_attempts)
            .await?;

        let mut report = CycleReport {
            leased: rows.len(),
            ..Default::default()
        };
        for row in rows {
            self.publish_row(tx, row, &mut report).await?;
        }
        Ok(report)
    }

    async fn publish_row(
        &self,
        tx: &mut Tx,
        row: OutboxRow,
        report: &mut CycleReport,
    ) -> Result<(), DomainError> {
        // A row whose envelope cannot be read will never publish; archive it
        // under its row id so it stops blocking the queue.
        let envelope = match PayloadEnvelope::from_bytes(&row.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                let message = format!("undecodable envelope: {}", e);
                error!(
                    outbox_id = %row.id,
                    event_type = %row.event_type,
                    error = %message,
                    "Poison outbox row moved to dead letter queue"
                );
                self.dead_letter(tx, &row, EventId::from_uuid(row.id), &message)
                    .await?;
                report.dead_lettered += 1;
                return Ok(());
            }
        };

        let message = BrokerMessage {
            event_type: row.event_type.clone(),
            dedup_id: envelope.event_id.to_string(),
            payload: row.payload.clone(),
        };
        let sent = match tokio::time::timeout(self.settings.send_timeout, self.broker.send(message))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(self.settings.send_timeout)),
        };

        match sent {
            Ok(()) => {
                // A failed statement aborts the transaction, so the whole batch
                // rolls back and is leased again. The broker already has the
                // message; the resend is deduplicated by event id.
                if let Err(e) = self.outbox.mark_published(tx, row.id).await {
                    warn!(
                        outbox_id = %row.id,
                        event_id = %envelope.event_id,
                        error = %e,
                        "Published but failed to mark row, batch will be retried"
                    );
                    return Err(e.into());
                }
                report.published += 1;
            }
            Err(e) => {
                let message = e.to_string();
                if row.attempt_count + 1 < self.settings.terminal_attempts {
                    warn!(
                        outbox_id = %row.id,
                        event_id = %envelope.event_id,
                        attempt = row.attempt_count + 1,
                        error = %message,
                        "Failed to publish outbox row"
                    );
                    self.outbox.mark_failed(tx, row.id, &message).await?;
                    report.failed += 1;
                } else {
                    error!(
                        outbox_id = %row.id,
                        event_id = %envelope.event_id,
                        event_type = %row.event_type,
                        attempts = row.attempt_count + 1,
                        error = %message,
                        "Outbox row exhausted its attempts, moved to dead letter queue"
                    );
                    self.dead_letter(tx, &row, envelope.event_id, &message)
                        .await?;
                    report.dead_lettered += 1;
                }
            }
        }
        Ok(())
    }

    async fn dead_letter(
        &self,
        tx: &mut Tx,
        row: &OutboxRow,
        event_id: EventId,
        message: &str,
    ) -> Result<(), DomainError> {
        self.outbox
            .mark_terminal(tx, row.id, message, self.settings.terminal_attempts)
            .await?;
        self.dlq
            .insert(tx, DlqEntry::from_outbox_row(row, event_id, message))
            .await?;
        Ok(())
    }
}
