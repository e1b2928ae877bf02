//! Publisher counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every publisher worker of a process.
#[derive(Debug, Default)]
pub struct PublisherMetrics {
    /// Rows forwarded to the broker and marked published
    pub total_published: AtomicU64,
    /// Failed attempts that left the row retryable
    pub total_failed: AtomicU64,
    /// Rows moved to the dead letter queue
    pub total_dead_lettered: AtomicU64,
    pub total_cycles: AtomicU64,
    pub empty_polls: AtomicU64,
    pub last_batch_duration_ms: AtomicU64,
}

impl PublisherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_published(&self, count: usize) {
        self.total_published
            .fetch_add(count as u64, Ordering::SeqCst);
    }

    pub fn increment_failed(&self, count: usize) {
        self.total_failed.fetch_add(count as u64, Ordering::SeqCst);
    }

    pub fn increment_dead_lettered(&self, count: usize) {
        self.total_dead_lettered
            .fetch_add(count as u64, Ordering::SeqCst);
    }

    pub fn increment_cycles(&self) {
        self.total_cycles.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_empty_polls(&self) {
        self.empty_polls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_last_batch_duration(&self, ms: u64) {
        self.last_batch_duration_ms.store(ms, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> PublisherMetricsSnapshot {
        PublisherMetricsSnapshot {
            published: self.total_published.load(Ordering::SeqCst),
            failed: self.total_failed.load(Ordering::SeqCst),
            dead_lettered: self.total_dead_lettered.load(Ordering::SeqCst),
            cycles: self.total_cycles.load(Ordering::SeqCst),
            empty_polls: self.empty_polls.load(Ordering::SeqCst),
            last_batch_duration_ms: self.last_batch_duration_ms.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of [`PublisherMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherMetricsSnapshot {
    pub published: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub cycles: u64,
    pub empty_polls: u64,
    pub last_batch_duration_ms: u64,
}
