//! In-memory transactional database
//!
//! Implements the transaction port and every store that writes through a
//! business transaction. Each [`MemoryTx`] buffers its writes and sees them on
//! top of the last committed state (read committed plus own writes); commit
//! replays the buffer atomically under the table lock, rollback or drop
//! discards it.
//!
//! Outbox leases live in a lock set shared by all transactions, so two
//! concurrent `fetch_batch` calls never return the same row and never wait
//! on each other. Leases are released when the owning transaction ends.
//!
//! Orders use optimistic versioning: saving an order that another transaction
//! committed after this one loaded it fails the commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use marketplace_server_domain::orders::{
    InventoryRepository, LedgerEntry, LedgerRepository, OrderAggregate, OrderRepository,
};
use marketplace_server_domain::outbox::{
    truncate_error, DlqEntry, DlqError, DlqStore, EventKey, OutboxError, OutboxRow, OutboxStats,
    OutboxStore,
};
use marketplace_server_domain::transaction::{
    TransactionError, TransactionProvider, TransactionResult, TxHandle,
};
use marketplace_server_domain::{DomainError, EventId, OrderId, ProductId};

#[derive(Debug, Clone, Default)]
struct Tables {
    /// Insertion order
    outbox: Vec<OutboxRow>,
    dlq: HashMap<EventId, DlqEntry>,
    orders: HashMap<OrderId, VersionedOrder>,
    stock: HashMap<ProductId, i64>,
    ledger: Vec<LedgerEntry>,
}

#[derive(Debug, Clone)]
struct VersionedOrder {
    version: u64,
    aggregate: OrderAggregate,
}

impl Tables {
    fn outbox_row_mut(&mut self, id: Uuid) -> Option<&mut OutboxRow> {
        self.outbox.iter_mut().find(|row| row.id == id)
    }

    fn has_event_key(&self, row: &OutboxRow) -> bool {
        row.has_unique_event_key()
            && self.outbox.iter().any(|existing| {
                existing.event_type == row.event_type
                    && existing.aggregate_type == row.aggregate_type
                    && existing.aggregate_id == row.aggregate_id
            })
    }

    fn has_ledger_entry(&self, entry: &LedgerEntry) -> bool {
        self.ledger
            .iter()
            .any(|e| e.order_id == entry.order_id && e.entry_type == entry.entry_type)
    }
}

/// A buffered write
#[derive(Debug, Clone)]
enum Op {
    OutboxInsert(OutboxRow),
    OutboxPublished { id: Uuid, at: DateTime<Utc> },
    OutboxFailed { id: Uuid, error: String },
    OutboxTerminal { id: Uuid, error: String, terminal: i32 },
    DlqInsert(DlqEntry),
    OrderSave {
        aggregate: Box<OrderAggregate>,
        expected_version: Option<u64>,
    },
    Stock { product_id: ProductId, delta: i64 },
    LedgerAppend(LedgerEntry),
}

impl Op {
    /// Apply onto `tables`. With `strict` set, constraint violations abort;
    /// otherwise (building a transaction's own view) they are skipped.
    fn apply(&self, tables: &mut Tables, strict: bool, event_key_index: bool) -> Result<(), String> {
        match self {
            Op::OutboxInsert(row) => {
                if strict && event_key_index && tables.has_event_key(row) {
                    return Err(format!(
                        "duplicate event key ({}, {}, {})",
                        row.event_type, row.aggregate_type, row.aggregate_id
                    ));
                }
                tables.outbox.push(row.clone());
            }
            Op::OutboxPublished { id, at } => {
                if let Some(row) = tables.outbox_row_mut(*id) {
                    row.published_at.get_or_insert(*at);
                }
            }
            Op::OutboxFailed { id, error } => {
                if let Some(row) = tables.outbox_row_mut(*id) {
                    row.attempt_count += 1;
                    row.last_error = Some(error.clone());
                }
            }
            Op::OutboxTerminal { id, error, terminal } => {
                if let Some(row) = tables.outbox_row_mut(*id) {
                    row.attempt_count = row.attempt_count.max(*terminal);
                    row.last_error = Some(error.clone());
                }
            }
            Op::DlqInsert(entry) => {
                tables.dlq.entry(entry.event_id).or_insert_with(|| entry.clone());
            }
            Op::OrderSave {
                aggregate,
                expected_version,
            } => {
                let id = aggregate.id();
                let current = tables.orders.get(&id).map(|o| o.version);
                if strict && expected_version.is_some() && current != *expected_version {
                    return Err(format!("order {} was modified concurrently", id));
                }
                tables.orders.insert(
                    id,
                    VersionedOrder {
                        version: current.map_or(1, |v| v + 1),
                        aggregate: aggregate.as_ref().clone(),
                    },
                );
            }
            Op::Stock { product_id, delta } => {
                let stock = tables.stock.entry(*product_id).or_insert(0);
                if strict && *stock + delta < 0 {
                    return Err(format!("insufficient stock for product {}", product_id));
                }
                *stock += delta;
            }
            Op::LedgerAppend(entry) => {
                if !tables.has_ledger_entry(entry) {
                    tables.ledger.push(entry.clone());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    leases: Mutex<HashSet<Uuid>>,
    event_key_index: bool,
    next_tx_id: AtomicU64,
    fail_commits: AtomicU32,
    fail_mark_published: AtomicU32,
}

impl Shared {
    fn release_leases(&self, ids: &HashSet<Uuid>) {
        if ids.is_empty() {
            return;
        }
        let mut leases = self.leases.lock();
        for id in ids {
            leases.remove(id);
        }
    }
}

/// Consume one unit of an injected fault counter
fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Transaction handle of [`InMemoryDatabase`]
#[derive(Debug)]
pub struct MemoryTx {
    id: u64,
    shared: Arc<Shared>,
    active: bool,
    /// Set by a failed statement; later statements fail until rollback
    aborted: bool,
    ops: Vec<Op>,
    leased: HashSet<Uuid>,
    order_versions: HashMap<OrderId, u64>,
}

impl MemoryTx {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Outbox ids currently leased by this transaction
    pub fn leased_ids(&self) -> Vec<Uuid> {
        self.leased.iter().copied().collect()
    }

    /// Committed state with this transaction's writes replayed on top
    fn view(&self) -> Tables {
        let mut tables = self.shared.tables.lock().clone();
        for op in &self.ops {
            let _ = op.apply(&mut tables, false, false);
        }
        tables
    }

    fn finish(&mut self) {
        self.active = false;
        self.ops.clear();
        let leased = std::mem::take(&mut self.leased);
        self.shared.release_leases(&leased);
    }
}

impl TxHandle for MemoryTx {
    fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.active {
            debug!(tx = self.id, "Dropping open in-memory transaction");
        }
        self.finish();
    }
}

/// Process-local database used by tests and local runs
#[derive(Debug, Clone)]
pub struct InMemoryDatabase {
    shared: Arc<Shared>,
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDatabase {
    /// A database with the unique event-key index enabled
    pub fn new() -> Self {
        Self::with_event_key_index(true)
    }

    pub fn with_event_key_index(enabled: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                event_key_index: enabled,
                ..Default::default()
            }),
        }
    }

    /// Make the next `count` commits fail and discard their writes.
    pub fn fail_next_commits(&self, count: u32) {
        self.shared.fail_commits.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_commit(&self) {
        self.fail_next_commits(1);
    }

    /// Make the next `mark_published` call fail, as if the process died
    /// between the broker ack and the status update.
    pub fn fail_next_mark_published(&self) {
        self.shared.fail_mark_published.store(1, Ordering::SeqCst);
    }

    /// Committed outbox rows in insertion order
    pub fn outbox_rows(&self) -> Vec<OutboxRow> {
        self.shared.tables.lock().outbox.clone()
    }

    pub fn dlq_entries(&self) -> Vec<DlqEntry> {
        self.shared.tables.lock().dlq.values().cloned().collect()
    }

    pub fn committed_order(&self, id: &OrderId) -> Option<OrderAggregate> {
        self.shared
            .tables
            .lock()
            .orders
            .get(id)
            .map(|o| o.aggregate.clone())
    }

    pub fn order_count(&self) -> usize {
        self.shared.tables.lock().orders.len()
    }

    pub fn set_stock(&self, product_id: ProductId, quantity: i64) {
        self.shared.tables.lock().stock.insert(product_id, quantity);
    }

    pub fn stock(&self, product_id: &ProductId) -> i64 {
        self.shared
            .tables
            .lock()
            .stock
            .get(product_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn ledger(&self) -> Vec<LedgerEntry> {
        self.shared.tables.lock().ledger.clone()
    }

    /// Outbox rows leased by any open transaction
    pub fn lease_count(&self) -> usize {
        self.shared.leases.lock().len()
    }

    /// Rewrite a committed outbox row, e.g. to age it for retention tests.
    pub fn update_outbox_row<F>(&self, id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut OutboxRow),
    {
        match self.shared.tables.lock().outbox_row_mut(id) {
            Some(row) => {
                f(row);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TransactionProvider for InMemoryDatabase {
    type Tx = MemoryTx;

    async fn begin(&self) -> TransactionResult<MemoryTx> {
        Ok(MemoryTx {
            id: self.shared.next_tx_id.fetch_add(1, Ordering::Relaxed) + 1,
            shared: self.shared.clone(),
            active: true,
            aborted: false,
            ops: Vec::new(),
            leased: HashSet::new(),
            order_versions: HashMap::new(),
        })
    }

    async fn commit(&self, mut tx: MemoryTx) -> TransactionResult<()> {
        tx.ensure_active()?;

        if take_fault(&self.shared.fail_commits) {
            tx.finish();
            return Err(TransactionError::Database(
                "injected commit failure".to_string(),
            ));
        }

        let result = {
            let mut tables = self.shared.tables.lock();
            let mut staged = tables.clone();
            let outcome = tx
                .ops
                .iter()
                .try_for_each(|op| op.apply(&mut staged, true, self.shared.event_key_index));
            if outcome.is_ok() {
                *tables = staged;
            }
            outcome
        };
        let ops = tx.ops.len();
        tx.finish();

        match result {
            Ok(()) => {
                debug!(tx = tx.id, ops, "In-memory transaction committed");
                Ok(())
            }
            Err(message) => Err(TransactionError::Database(message)),
        }
    }

    async fn rollback(&self, mut tx: MemoryTx) -> TransactionResult<()> {
        tx.ensure_active()?;
        tx.finish();
        Ok(())
    }
}

fn ensure_outbox_tx(tx: &MemoryTx) -> Result<(), OutboxError> {
    tx.ensure_active().map_err(OutboxError::from)?;
    if tx.aborted {
        return Err(OutboxError::Database(
            "current transaction is aborted".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl OutboxStore for InMemoryDatabase {
    type Tx = MemoryTx;

    async fn insert(&self, tx: &mut MemoryTx, row: OutboxRow) -> Result<(), OutboxError> {
        ensure_outbox_tx(tx)?;
        if self.shared.event_key_index && tx.view().has_event_key(&row) {
            return Err(OutboxError::DuplicateEventKey {
                event_type: row.event_type,
                aggregate_type: row.aggregate_type,
                aggregate_id: row.aggregate_id,
            });
        }
        tx.ops.push(Op::OutboxInsert(row));
        Ok(())
    }

    async fn fetch_batch(
        &self,
        tx: &mut MemoryTx,
        limit: u32,
        max_attempts: i32,
    ) -> Result<Vec<OutboxRow>, OutboxError> {
        ensure_outbox_tx(tx)?;
        if limit == 0 {
            return Err(OutboxError::InvalidArgument(
                "batch limit must be positive".to_string(),
            ));
        }

        // Lease set first: a row released after this point was committed
        // before the view below is taken.
        let mut leases = self.shared.leases.lock();
        let view = tx.view();
        let mut rows: Vec<OutboxRow> = view
            .outbox
            .into_iter()
            .filter(|row| row.is_leasable(max_attempts))
            .filter(|row| tx.leased.contains(&row.id) || !leases.contains(&row.id))
            .collect();
        rows.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        rows.truncate(limit as usize);

        for row in &rows {
            if leases.insert(row.id) {
                tx.leased.insert(row.id);
            }
        }
        Ok(rows)
    }

    async fn mark_published(&self, tx: &mut MemoryTx, id: Uuid) -> Result<(), OutboxError> {
        ensure_outbox_tx(tx)?;
        if take_fault(&self.shared.fail_mark_published) {
            tx.aborted = true;
            return Err(OutboxError::Database(
                "injected mark_published failure".to_string(),
            ));
        }
        if !tx.view().outbox.iter().any(|row| row.id == id) {
            return Err(OutboxError::NotFound(id));
        }
        tx.ops.push(Op::OutboxPublished { id, at: Utc::now() });
        Ok(())
    }

    async fn mark_failed(&self, tx: &mut MemoryTx, id: Uuid, error: &str) -> Result<(), OutboxError> {
        ensure_outbox_tx(tx)?;
        if !tx.view().outbox.iter().any(|row| row.id == id) {
            return Err(OutboxError::NotFound(id));
        }
        tx.ops.push(Op::OutboxFailed {
            id,
            error: truncate_error(error),
        });
        Ok(())
    }

    async fn mark_terminal(
        &self,
        tx: &mut MemoryTx,
        id: Uuid,
        error: &str,
        terminal: i32,
    ) -> Result<(), OutboxError> {
        ensure_outbox_tx(tx)?;
        if !tx.view().outbox.iter().any(|row| row.id == id) {
            return Err(OutboxError::NotFound(id));
        }
        tx.ops.push(Op::OutboxTerminal {
            id,
            error: truncate_error(error),
            terminal,
        });
        Ok(())
    }

    async fn exists(&self, tx: &mut MemoryTx, key: &EventKey) -> Result<bool, OutboxError> {
        ensure_outbox_tx(tx)?;
        Ok(tx.view().outbox.iter().any(|row| key.matches(row)))
    }

    async fn delete_published_before(
        &self,
        cutoff: DateTime<Utc>,
        min_attempts: i32,
    ) -> Result<u64, OutboxError> {
        let mut tables = self.shared.tables.lock();
        let before = tables.outbox.len();
        tables.outbox.retain(|row| {
            !matches!(row.published_at, Some(at) if at < cutoff && row.attempt_count >= min_attempts)
        });
        Ok((before - tables.outbox.len()) as u64)
    }

    async fn stats(&self, terminal_attempts: i32) -> Result<OutboxStats, OutboxError> {
        let tables = self.shared.tables.lock();
        let mut stats = OutboxStats::default();
        for row in &tables.outbox {
            if row.is_published() {
                stats.published += 1;
            } else if row.is_leasable(terminal_attempts) {
                stats.pending += 1;
            } else {
                stats.terminal += 1;
            }
        }
        Ok(stats)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxRow>, OutboxError> {
        Ok(self
            .shared
            .tables
            .lock()
            .outbox
            .iter()
            .find(|row| row.id == id)
            .cloned())
    }
}

#[async_trait]
impl DlqStore for InMemoryDatabase {
    type Tx = MemoryTx;

    async fn insert(&self, tx: &mut MemoryTx, mut entry: DlqEntry) -> Result<(), DlqError> {
        tx.ensure_active().map_err(DlqError::from)?;
        entry.error_message = truncate_error(&entry.error_message);
        tx.ops.push(Op::DlqInsert(entry));
        Ok(())
    }

    async fn find_by_event_id(&self, event_id: &EventId) -> Result<Option<DlqEntry>, DlqError> {
        Ok(self.shared.tables.lock().dlq.get(event_id).cloned())
    }

    async fn list(&self, limit: u32) -> Result<Vec<DlqEntry>, DlqError> {
        let mut entries = self.dlq_entries();
        entries.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        entries.truncate(limit as usize);
        Ok(entries)
    }
}

#[async_trait]
impl OrderRepository for InMemoryDatabase {
    type Tx = MemoryTx;

    async fn load(&self, tx: &mut MemoryTx, id: &OrderId) -> Result<Option<OrderAggregate>, DomainError> {
        tx.ensure_active()?;
        let view = tx.view();
        let Some(stored) = view.orders.get(id) else {
            return Ok(None);
        };
        // Pin the version seen first; later saves in this tx build on it.
        let committed = self.shared.tables.lock().orders.get(id).map(|o| o.version);
        if let Some(version) = committed {
            tx.order_versions.entry(*id).or_insert(version);
        }
        Ok(Some(stored.aggregate.clone()))
    }

    async fn save(&self, tx: &mut MemoryTx, aggregate: &OrderAggregate) -> Result<(), DomainError> {
        tx.ensure_active()?;
        let expected_version = tx.order_versions.get(&aggregate.id()).copied();
        tx.ops.push(Op::OrderSave {
            aggregate: Box::new(aggregate.clone()),
            expected_version,
        });
        Ok(())
    }
}

#[async_trait]
impl InventoryRepository for InMemoryDatabase {
    type Tx = MemoryTx;

    async fn reserve(
        &self,
        tx: &mut MemoryTx,
        product_id: &ProductId,
        quantity: i32,
    ) -> Result<bool, DomainError> {
        tx.ensure_active()?;
        if quantity <= 0 {
            return Err(DomainError::InvalidArg(
                "reservation quantity must be positive".to_string(),
            ));
        }
        let available = tx.view().stock.get(product_id).copied().unwrap_or(0);
        if available < i64::from(quantity) {
            return Ok(false);
        }
        tx.ops.push(Op::Stock {
            product_id: *product_id,
            delta: -i64::from(quantity),
        });
        Ok(true)
    }

    async fn release(
        &self,
        tx: &mut MemoryTx,
        product_id: &ProductId,
        quantity: i32,
    ) -> Result<(), DomainError> {
        tx.ensure_active()?;
        tx.ops.push(Op::Stock {
            product_id: *product_id,
            delta: i64::from(quantity.max(0)),
        });
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for InMemoryDatabase {
    type Tx = MemoryTx;

    async fn append(&self, tx: &mut MemoryTx, entry: &LedgerEntry) -> Result<bool, DomainError> {
        tx.ensure_active()?;
        if tx.view().has_ledger_entry(entry) {
            return Ok(false);
        }
        tx.ops.push(Op::LedgerAppend(entry.clone()));
        Ok(true)
    }

    async fn entries_for_order(
        &self,
        tx: &mut MemoryTx,
        order_id: &OrderId,
    ) -> Result<Vec<LedgerEntry>, DomainError> {
        tx.ensure_active()?;
        Ok(tx
            .view()
            .ledger
            .into_iter()
            .filter(|entry| entry.order_id == *order_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketplace_server_domain::events::{AggregateType, EventType};
    use marketplace_server_domain::orders::LedgerEntryType;

    fn pending_row(event_type: EventType, aggregate_id: Uuid) -> OutboxRow {
        OutboxRow::pending(event_type, AggregateType::Order, aggregate_id, b"{}".to_vec())
    }

    async fn insert_committed(db: &InMemoryDatabase, rows: Vec<OutboxRow>) {
        let mut tx = db.begin().await.unwrap();
        for row in rows {
            OutboxStore::insert(db, &mut tx, row).await.unwrap();
        }
        db.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_are_invisible_until_commit() {
        let db = InMemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        let row = pending_row(EventType::OrderCreated, Uuid::new_v4());
        let id = row.id;
        OutboxStore::insert(&db, &mut tx, row).await.unwrap();

        assert!(db.find_by_id(id).await.unwrap().is_none());
        let mut other = db.begin().await.unwrap();
        assert!(db.fetch_batch(&mut other, 10, 5).await.unwrap().is_empty());
        db.rollback(other).await.unwrap();

        db.commit(tx).await.unwrap();
        assert!(db.find_by_id(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_writes() {
        let db = InMemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        OutboxStore::insert(&db, &mut tx, pending_row(EventType::OrderCreated, Uuid::new_v4()))
            .await
            .unwrap();
        db.rollback(tx).await.unwrap();

        {
            let mut tx = db.begin().await.unwrap();
            OutboxStore::insert(&db, &mut tx, pending_row(EventType::OrderCreated, Uuid::new_v4()))
                .await
                .unwrap();
        }

        assert!(db.outbox_rows().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_leases_are_disjoint() {
        let db = InMemoryDatabase::new();
        insert_committed(
            &db,
            (0..10)
                .map(|_| pending_row(EventType::OrderCreated, Uuid::new_v4()))
                .collect(),
        )
        .await;

        let mut first = db.begin().await.unwrap();
        let mut second = db.begin().await.unwrap();
        let a = db.fetch_batch(&mut first, 6, 5).await.unwrap();
        let b = db.fetch_batch(&mut second, 6, 5).await.unwrap();

        assert_eq!(a.len(), 6);
        assert_eq!(b.len(), 4);
        assert!(a.iter().all(|row| b.iter().all(|other| other.id != row.id)));
        assert_eq!(db.lease_count(), 10);

        db.rollback(first).await.unwrap();
        drop(second);
        assert_eq!(db.lease_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_orders_oldest_first_and_honours_attempt_guard() {
        let db = InMemoryDatabase::new();
        let mut old = pending_row(EventType::OrderCreated, Uuid::new_v4());
        old.created_at = Utc::now() - chrono::Duration::minutes(5);
        let mut exhausted = pending_row(EventType::OrderCreated, Uuid::new_v4());
        exhausted.attempt_count = 5;
        let fresh = pending_row(EventType::OrderCreated, Uuid::new_v4());
        insert_committed(&db, vec![fresh.clone(), exhausted.clone(), old.clone()]).await;

        let mut tx = db.begin().await.unwrap();
        let batch = db.fetch_batch(&mut tx, 10, 5).await.unwrap();
        assert_eq!(
            batch.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![old.id, fresh.id]
        );
        db.rollback(tx).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        assert_eq!(db.fetch_batch(&mut tx, 10, 0).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_statement_aborts_transaction() {
        let db = InMemoryDatabase::new();
        let row = pending_row(EventType::OrderPaid, Uuid::new_v4());
        let id = row.id;
        insert_committed(&db, vec![row]).await;

        let mut tx = db.begin().await.unwrap();
        db.fail_next_mark_published();
        assert!(db.mark_published(&mut tx, id).await.is_err());
        assert!(matches!(
            db.mark_failed(&mut tx, id, "boom").await,
            Err(OutboxError::Database(_))
        ));
        db.rollback(tx).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        db.mark_published(&mut tx, id).await.unwrap();
        db.commit(tx).await.unwrap();
        assert!(db.find_by_id(id).await.unwrap().unwrap().published_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_operations_are_monotonic() {
        let db = InMemoryDatabase::new();
        let row = pending_row(EventType::OrderPaid, Uuid::new_v4());
        let id = row.id;
        insert_committed(&db, vec![row]).await;

        let mut tx = db.begin().await.unwrap();
        db.mark_failed(&mut tx, id, "boom").await.unwrap();
        db.mark_terminal(&mut tx, id, "gave up", 5).await.unwrap();
        db.mark_terminal(&mut tx, id, "again", 3).await.unwrap();
        db.commit(tx).await.unwrap();
        let stored = db.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 5);
        assert_eq!(stored.last_error.as_deref(), Some("again"));

        let mut tx = db.begin().await.unwrap();
        db.mark_published(&mut tx, id).await.unwrap();
        db.commit(tx).await.unwrap();
        let first = db.find_by_id(id).await.unwrap().unwrap().published_at;

        let mut tx = db.begin().await.unwrap();
        db.mark_published(&mut tx, id).await.unwrap();
        db.commit(tx).await.unwrap();
        assert_eq!(db.find_by_id(id).await.unwrap().unwrap().published_at, first);

        let mut tx = db.begin().await.unwrap();
        assert!(matches!(
            db.mark_failed(&mut tx, Uuid::new_v4(), "x").await,
            Err(OutboxError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_event_key_index_rejects_duplicates() {
        let db = InMemoryDatabase::new();
        let aggregate_id = Uuid::new_v4();
        insert_committed(&db, vec![pending_row(EventType::OrderDecided, aggregate_id)]).await;

        let mut tx = db.begin().await.unwrap();
        let result =
            OutboxStore::insert(&db, &mut tx, pending_row(EventType::OrderDecided, aggregate_id)).await;
        assert!(matches!(result, Err(OutboxError::DuplicateEventKey { .. })));

        // nudges repeat on the same order
        let nudge = pending_row(EventType::NotificationRequested, aggregate_id);
        OutboxStore::insert(&db, &mut tx, nudge).await.unwrap();
        let again = pending_row(EventType::NotificationRequested, aggregate_id);
        OutboxStore::insert(&db, &mut tx, again).await.unwrap();

        let unindexed = InMemoryDatabase::with_event_key_index(false);
        insert_committed(&unindexed, vec![pending_row(EventType::OrderDecided, aggregate_id)]).await;
        insert_committed(&unindexed, vec![pending_row(EventType::OrderDecided, aggregate_id)]).await;
        assert_eq!(unindexed.outbox_rows().len(), 2);
    }

    #[tokio::test]
    async fn test_retention_deletes_only_old_published_rows() {
        let db = InMemoryDatabase::new();
        let rows: Vec<OutboxRow> = (0..3)
            .map(|_| pending_row(EventType::OrderCreated, Uuid::new_v4()))
            .collect();
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        insert_committed(&db, rows).await;

        let old = Utc::now() - chrono::Duration::days(10);
        db.update_outbox_row(ids[0], |row| row.published_at = Some(old));
        db.update_outbox_row(ids[1], |row| {
            row.published_at = Some(old);
            row.attempt_count = 2;
        });

        let cutoff = Utc::now() - chrono::Duration::days(7);
        assert_eq!(db.delete_published_before(cutoff, 1).await.unwrap(), 1);
        assert!(db.find_by_id(ids[0]).await.unwrap().is_some());
        assert!(db.find_by_id(ids[1]).await.unwrap().is_none());
        assert_eq!(db.delete_published_before(cutoff, 0).await.unwrap(), 1);
        // unpublished rows are never swept
        assert!(db.find_by_id(ids[2]).await.unwrap().is_some());

        let stats = db.stats(5).await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.published, 0);
    }

    #[tokio::test]
    async fn test_injected_commit_failure_discards_writes() {
        let db = InMemoryDatabase::new();
        db.fail_next_commit();
        let mut tx = db.begin().await.unwrap();
        OutboxStore::insert(&db, &mut tx, pending_row(EventType::OrderCreated, Uuid::new_v4()))
            .await
            .unwrap();
        assert!(matches!(db.commit(tx).await, Err(TransactionError::Database(_))));
        assert!(db.outbox_rows().is_empty());
    }

    #[tokio::test]
    async fn test_stock_and_ledger() {
        let db = InMemoryDatabase::new();
        let product = ProductId::new();
        db.set_stock(product, 3);

        let mut tx = db.begin().await.unwrap();
        assert!(db.reserve(&mut tx, &product, 2).await.unwrap());
        assert!(!db.reserve(&mut tx, &product, 2).await.unwrap());
        let entry = LedgerEntry::new(OrderId::new(), LedgerEntryType::CashCollected, 900);
        assert!(db.append(&mut tx, &entry).await.unwrap());
        let mut again = entry.clone();
        again.id = marketplace_server_domain::LedgerEventId::new();
        assert!(!db.append(&mut tx, &again).await.unwrap());
        db.commit(tx).await.unwrap();

        assert_eq!(db.stock(&product), 1);
        assert_eq!(db.ledger().len(), 1);
    }
}
