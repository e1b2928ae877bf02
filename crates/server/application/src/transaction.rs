//! Transactional runner
//!
//! [`TransactionRunner::with_tx`] is the only boundary inside which outbox
//! rows are written: it begins a transaction, hands it to the closure,
//! commits on `Ok` and rolls back on `Err` or panic.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, warn};

use marketplace_server_domain::transaction::{TransactionError, TransactionProvider, TxHandle};
use marketplace_server_domain::DomainError;

pub struct TransactionRunner<Tx: TxHandle> {
    provider: Arc<dyn TransactionProvider<Tx = Tx>>,
}

impl<Tx: TxHandle> Clone for TransactionRunner<Tx> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
        }
    }
}

impl<Tx: TxHandle> TransactionRunner<Tx> {
    pub fn new(provider: Arc<dyn TransactionProvider<Tx = Tx>>) -> Self {
        Self { provider }
    }

    /// Run `f` inside one transaction.
    ///
    /// The closure must capture owned values (clone the `Arc`s it needs), so
    /// the returned future only borrows the transaction.
    pub async fn with_tx<T, F>(&self, f: F) -> Result<T, DomainError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut Tx) -> BoxFuture<'t, Result<T, DomainError>> + Send,
    {
        let mut tx = self.provider.begin().await?;

        let outcome = AssertUnwindSafe(f(&mut tx)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => {
                self.provider.commit(tx).await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(rollback_err) = self.provider.rollback(tx).await {
                    warn!(error = %rollback_err, "Rollback after failed transaction closure failed");
                }
                Err(err)
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Transaction closure panicked, rolling back");
                if let Err(rollback_err) = self.provider.rollback(tx).await {
                    warn!(error = %rollback_err, "Rollback after panic failed");
                }
                Err(TransactionError::Panic { message }.into())
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
