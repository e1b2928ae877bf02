//! Outbox retention sweep
//!
//! Deletes published rows older than the retention window. Unpublished rows
//! are never touched, whatever their age.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use marketplace_server_domain::outbox::OutboxStore;
use marketplace_server_domain::transaction::TxHandle;
use marketplace_server_domain::DomainError;
use marketplace_shared::config::OutboxConfig;

#[derive(Debug, Clone)]
pub struct RetentionSettings {
    pub retention: Duration,
    /// Only rows with at least this many attempts are deleted
    pub min_attempts: i32,
    pub interval: Duration,
    pub enabled: bool,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self::from(&OutboxConfig::default())
    }
}

impl From<&OutboxConfig> for RetentionSettings {
    fn from(config: &OutboxConfig) -> Self {
        Self {
            retention: config.retention(),
            min_attempts: config.retention_min_attempts,
            interval: config.cleanup_interval(),
            enabled: true,
        }
    }
}

impl RetentionSettings {
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_min_attempts(mut self, min_attempts: i32) -> Self {
        self.min_attempts = min_attempts;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Default)]
pub struct RetentionMetrics {
    pub rows_deleted: AtomicU64,
    pub sweeps: AtomicU64,
    pub errors: AtomicU64,
}

impl RetentionMetrics {
    pub fn rows_deleted_count(&self) -> u64 {
        self.rows_deleted.load(Ordering::SeqCst)
    }
}

pub struct OutboxRetentionWorker<Tx: TxHandle> {
    outbox: Arc<dyn OutboxStore<Tx = Tx>>,
    settings: RetentionSettings,
    metrics: Arc<RetentionMetrics>,
}

impl<Tx: TxHandle> OutboxRetentionWorker<Tx> {
    pub fn new(outbox: Arc<dyn OutboxStore<Tx = Tx>>, settings: RetentionSettings) -> Self {
        Self {
            outbox,
            settings,
            metrics: Arc::new(RetentionMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<RetentionMetrics> {
        self.metrics.clone()
    }

    /// Delete published rows older than the retention window.
    pub async fn sweep(&self) -> Result<u64, DomainError> {
        let retention = chrono::Duration::from_std(self.settings.retention)
            .map_err(|e| DomainError::InvalidArg(format!("retention window: {}", e)))?;
        let cutoff = Utc::now() - retention;

        let deleted = self
            .outbox
            .delete_published_before(cutoff, self.settings.min_attempts)
            .await?;

        self.metrics.sweeps.fetch_add(1, Ordering::SeqCst);
        self.metrics.rows_deleted.fetch_add(deleted, Ordering::SeqCst);
        if deleted > 0 {
            info!(deleted, cutoff = %cutoff, "Outbox retention sweep completed");
        }
        Ok(deleted)
    }

    pub async fn run(self, cancel: CancellationToken) {
        if !self.settings.enabled {
            info!("Outbox retention worker is disabled");
            return;
        }

        info!(
            interval = ?self.settings.interval,
            retention = ?self.settings.retention,
            "Starting outbox retention worker"
        );

        let mut interval = time::interval(self.settings.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Outbox retention worker shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "Retention sweep failed");
                        self.metrics.errors.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = OutboxConfig {
            retention_secs: 60,
            retention_min_attempts: 1,
            cleanup_interval_secs: 5,
            event_key_index: false,
        };
        let settings = RetentionSettings::from(&config);
        assert_eq!(settings.retention, Duration::from_secs(60));
        assert_eq!(settings.min_attempts, 1);
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert!(settings.enabled);
        assert!(!settings.disabled().enabled);
    }
}
