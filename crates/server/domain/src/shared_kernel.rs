//! Error taxonomy shared by every component of the bus.
//!
//! Port-level errors (outbox, DLQ, transactions, idempotency, broker) convert
//! into [`DomainError`] so callers only ever inspect one set of kinds.

use std::fmt;

/// Upper bound for error text persisted on outbox and DLQ rows.
pub const MAX_ERROR_BYTES: usize = 1024;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cannot {operation} while {status}")]
    StateConflict {
        operation: &'static str,
        status: String,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dependency failure: {0}")]
    Dependency(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArg,
    NotFound,
    Forbidden,
    StateConflict,
    Conflict,
    Dependency,
    Internal,
}

impl ErrorKind {
    /// Permanent errors will fail again on redelivery; consumers drop them
    /// instead of asking the broker to retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidArg
                | ErrorKind::NotFound
                | ErrorKind::Forbidden
                | ErrorKind::StateConflict
                | ErrorKind::Conflict
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArg => "invalid_arg",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Dependency => "dependency",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidArg(_) => ErrorKind::InvalidArg,
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::Forbidden(_) => ErrorKind::Forbidden,
            DomainError::StateConflict { .. } => ErrorKind::StateConflict,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::Dependency(_) => ErrorKind::Dependency,
            DomainError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn state_conflict(operation: &'static str, status: impl fmt::Display) -> Self {
        DomainError::StateConflict {
            operation,
            status: status.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        DomainError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Cut `message` to at most `max_bytes` without splitting a UTF-8 character.
pub fn truncate_message(message: &str, max_bytes: usize) -> String {
    if message.len() <= max_bytes {
        return message.to_string();
    }
    let mut end = max_bytes;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
