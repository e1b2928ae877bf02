//! PostgreSQL transaction provider

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Transaction};
use tracing::debug;

use marketplace_server_domain::transaction::{
    TransactionError, TransactionProvider, TransactionResult, TxHandle,
};

/// An open PostgreSQL transaction.
///
/// Dropping an open `PgTx` rolls it back and releases every row lock it
/// holds, including outbox leases.
pub struct PgTx {
    inner: Option<Transaction<'static, Postgres>>,
}

impl PgTx {
    /// Connection to run statements on
    pub fn conn(&mut self) -> TransactionResult<&mut PgConnection> {
        self.inner
            .as_deref_mut()
            .ok_or(TransactionError::AlreadyCompleted)
    }

    fn take(&mut self) -> TransactionResult<Transaction<'static, Postgres>> {
        self.inner.take().ok_or(TransactionError::AlreadyCompleted)
    }
}

impl TxHandle for PgTx {
    fn is_active(&self) -> bool {
        self.inner.is_some()
    }
}

impl std::fmt::Debug for PgTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTx")
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PostgresTransactionProvider {
    pool: PgPool,
}

impl PostgresTransactionProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionProvider for PostgresTransactionProvider {
    type Tx = PgTx;

    async fn begin(&self) -> TransactionResult<PgTx> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TransactionError::Database(e.to_string()))?;
        Ok(PgTx { inner: Some(tx) })
    }

    async fn commit(&self, mut tx: PgTx) -> TransactionResult<()> {
        tx.take()?
            .commit()
            .await
            .map_err(|e| TransactionError::Database(e.to_string()))?;
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(&self, mut tx: PgTx) -> TransactionResult<()> {
        tx.take()?
            .rollback()
            .await
            .map_err(|e| TransactionError::Database(e.to_string()))
    }
}
