//! In-memory downstream sinks for tests and local runs.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use marketplace_server_domain::sinks::{
    NotificationRequest, NotificationSink, SinkError, WarehouseRow, WarehouseSink,
};
use marketplace_server_domain::EventId;

/// Warehouse table keyed by event id
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    rows: DashMap<EventId, WarehouseRow>,
    failures: AtomicU32,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` inserts with `Unavailable`.
    pub fn fail_next_inserts(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn row(&self, event_id: &EventId) -> Option<WarehouseRow> {
        self.rows.get(event_id).map(|row| row.clone())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl WarehouseSink for InMemoryWarehouse {
    async fn insert(&self, row: WarehouseRow) -> Result<bool, SinkError> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SinkError::Unavailable("warehouse unavailable".to_string()));
        }
        match self.rows.entry(row.event_id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(row);
                Ok(true)
            }
        }
    }
}

/// Records every notification request it receives
#[derive(Debug, Default)]
pub struct RecordingNotificationSink {
    sent: Mutex<Vec<NotificationRequest>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NotificationRequest> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn send(&self, request: NotificationRequest) -> Result<(), SinkError> {
        self.sent.lock().push(request);
        Ok(())
    }
}
