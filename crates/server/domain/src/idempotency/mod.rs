//! Per-consumer processed marks.
//!
//! A mark under `pf:idempotency:evt:processed:<consumer>:<event_id>` proves
//! the consumer already applied the event's side effect. Marks are set with
//! an atomic set-if-absent and expire after a TTL that must outlive the
//! publisher's retry window.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::shared_kernel::DomainError;
use marketplace_shared::EventId;

pub const IDEMPOTENCY_KEY_PREFIX: &str = "pf:idempotency:evt:processed";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdempotencyError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Idempotency store error: {0}")]
    Store(String),
}

impl From<IdempotencyError> for DomainError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::InvalidArgument(message) => DomainError::InvalidArg(message),
            IdempotencyError::Store(message) => {
                DomainError::Dependency(format!("idempotency store: {}", message))
            }
        }
    }
}

/// Single-writer key/value store with compare-and-set semantics
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Store `key` unless a live entry exists. Returns `true` when this call
    /// created the entry.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, IdempotencyError>;

    async fn delete(&self, key: &str) -> Result<(), IdempotencyError>;
}

pub fn processed_key(consumer: &str, event_id: &EventId) -> String {
    format!("{}:{}:{}", IDEMPOTENCY_KEY_PREFIX, consumer, event_id)
}

/// Guards consumer handlers against processing an event twice
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `true` when the event was already processed by `consumer`,
    /// `false` when this call marked it.
    pub async fn check_and_mark(
        &self,
        consumer: &str,
        event_id: &EventId,
    ) -> Result<bool, IdempotencyError> {
        let key = Self::key(consumer, event_id)?;
        let created = self.store.set_if_absent(&key, self.ttl).await?;
        Ok(!created)
    }

    /// Remove the mark so the next delivery re-enters the handler.
    pub async fn release(&self, consumer: &str, event_id: &EventId) -> Result<(), IdempotencyError> {
        let key = Self::key(consumer, event_id)?;
        self.store.delete(&key).await
    }

    fn key(consumer: &str, event_id: &EventId) -> Result<String, IdempotencyError> {
        if consumer.trim().is_empty() {
            return Err(IdempotencyError::InvalidArgument(
                "consumer name cannot be empty".to_string(),
            ));
        }
        if event_id.is_nil() {
            return Err(IdempotencyError::InvalidArgument(
                "event id cannot be the zero id".to_string(),
            ));
        }
        Ok(processed_key(consumer, event_id))
    }
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use uuid::Uuid;

    #[derive(Default)]
    struct SetStore {
        keys: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl IdempotencyStore for SetStore {
        async fn set_if_absent(&self, key: &str, _ttl: Duration) -> Result<bool, IdempotencyError> {
            Ok(self.keys.lock().insert(key.to_string()))
        }

        async fn delete(&self, key: &str) -> Result<(), IdempotencyError> {
            self.keys.lock().remove(key);
            Ok(())
        }
    }

    fn guard() -> (IdempotencyGuard, Arc<SetStore>) {
        let store = Arc::new(SetStore::default());
        (
            IdempotencyGuard::new(store.clone(), Duration::from_secs(60)),
            store,
        )
    }

    #[test]
    fn test_key_format() {
        let id = EventId::from_uuid(Uuid::parse_str("0e3f9a4c-3b1d-4f5e-8a6b-7c8d9e0f1a2b").unwrap());
        assert_eq!(
            processed_key("analytics", &id),
            "pf:idempotency:evt:processed:analytics:0e3f9a4c-3b1d-4f5e-8a6b-7c8d9e0f1a2b"
        );
    }

    #[tokio::test]
    async fn test_first_check_marks_second_reports_processed() {
        let (guard, store) = guard();
        let id = EventId::new();

        assert!(!guard.check_and_mark("analytics", &id).await.unwrap());
        assert!(guard.check_and_mark("analytics", &id).await.unwrap());
        // other consumers have their own namespace
        assert!(!guard.check_and_mark("notifications", &id).await.unwrap());
        assert_eq!(store.keys.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_release_allows_reprocessing() {
        let (guard, _) = guard();
        let id = EventId::new();

        assert!(!guard.check_and_mark("analytics", &id).await.unwrap());
        guard.release("analytics", &id).await.unwrap();
        assert!(!guard.check_and_mark("analytics", &id).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_empty_consumer_and_nil_id() {
        let (guard, _) = guard();
        assert!(matches!(
            guard.check_and_mark("", &EventId::new()).await,
            Err(IdempotencyError::InvalidArgument(_))
        ));
        assert!(matches!(
            guard
                .check_and_mark("analytics", &EventId::from_uuid(Uuid::nil()))
                .await,
            Err(IdempotencyError::InvalidArgument(_))
        ));
        assert!(guard.release(" ", &EventId::new()).await.is_err());
    }
}
