use super::*;
use crate::shared_kernel::ErrorKind;

struct FlagTx(bool);

impl TxHandle for FlagTx {
    fn is_active(&self) -> bool {
        self.0
    }
}

#[test]
fn test_transaction_error_display() {
    let err = TransactionError::Database("connection reset".to_string());
    assert_eq!(err.to_string(), "Database error: connection reset");
}

#[test]
fn test_inactive_handle_is_already_completed() {
    assert!(FlagTx(true).ensure_active().is_ok());
    assert_eq!(
        FlagTx(false).ensure_active(),
        Err(TransactionError::AlreadyCompleted)
    );
}

#[test]
fn test_transaction_error_kinds() {
    let db: DomainError = TransactionError::Database("down".into()).into();
    assert_eq!(db.kind(), ErrorKind::Dependency);

    let completed: DomainError = TransactionError::AlreadyCompleted.into();
    assert_eq!(completed.kind(), ErrorKind::InvalidArg);

    let panic: DomainError = TransactionError::Panic {
        message: "boom".into(),
    }
    .into();
    assert_eq!(panic.kind(), ErrorKind::Internal);
}
