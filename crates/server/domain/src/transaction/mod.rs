//! Transaction port
//!
//! Business mutations and outbox inserts must commit together. Adapters
//! expose their transaction type through [`TransactionProvider`]; every store
//! port that participates in a business transaction takes `&mut Tx` of the
//! same associated type, so the compiler keeps stores and providers paired.

use async_trait::async_trait;
use thiserror::Error;

use crate::shared_kernel::DomainError;

/// Error type for transaction operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction already completed")]
    AlreadyCompleted,

    #[error("Transaction panicked: {message}")]
    Panic { message: String },
}

impl From<TransactionError> for DomainError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Database(message) => {
                DomainError::Dependency(format!("transaction: {}", message))
            }
            TransactionError::AlreadyCompleted => {
                DomainError::InvalidArg("transaction already completed".to_string())
            }
            TransactionError::Panic { message } => {
                DomainError::Internal(format!("transaction closure panicked: {}", message))
            }
        }
    }
}

/// Result type for transaction operations
pub type TransactionResult<T> = Result<T, TransactionError>;

/// A transaction handle passed to stores.
///
/// A handle that was never begun, or was already committed or rolled back,
/// is inactive; stores refuse to write through it.
pub trait TxHandle: Send + 'static {
    fn is_active(&self) -> bool;

    fn ensure_active(&self) -> TransactionResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TransactionError::AlreadyCompleted)
        }
    }
}

/// Begins, commits and rolls back transactions of one storage adapter.
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    type Tx: TxHandle;

    async fn begin(&self) -> TransactionResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> TransactionResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> TransactionResult<()>;
}

#[cfg(test)]
mod tests;
