//! In-memory processed-mark store with per-key expiry.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use marketplace_server_domain::idempotency::{IdempotencyError, IdempotencyStore};

#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    marks: DashMap<String, Instant>,
    unavailable: AtomicBool,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Whether a live mark exists for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.marks
            .get(key)
            .map(|expires_at| *expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// Live marks
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.marks.iter().filter(|mark| *mark.value() > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired marks, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.marks.len();
        self.marks.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.marks.len())
    }

    fn check_available(&self) -> Result<(), IdempotencyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(IdempotencyError::Store("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, IdempotencyError> {
        self.check_available()?;
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).ok_or_else(|| {
            IdempotencyError::InvalidArgument(format!("ttl {:?} is out of range", ttl))
        })?;
        self.purge_expired();

        match self.marks.entry(key.to_string()) {
            Entry::Occupied(mut mark) => {
                if *mark.get() > now {
                    Ok(false)
                } else {
                    mark.insert(expires_at);
                    Ok(true)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), IdempotencyError> {
        self.check_available()?;
        self.marks.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let store = InMemoryIdempotencyStore::new();
        let ttl = Duration::from_secs(60);

        assert!(store.set_if_absent("k", ttl).await.unwrap());
        assert!(!store.set_if_absent("k", ttl).await.unwrap());
        store.delete("k").await.unwrap();
        assert!(store.set_if_absent("k", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_mark_can_be_reset() {
        let store = InMemoryIdempotencyStore::new();
        assert!(store.set_if_absent("k", Duration::ZERO).await.unwrap());
        assert!(!store.contains("k"));
        assert!(store
            .set_if_absent("k", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(store.contains("k"));
    }

    #[tokio::test]
    async fn test_expired_marks_are_evicted() {
        let store = InMemoryIdempotencyStore::new();
        for key in ["a", "b", "c"] {
            assert!(store.set_if_absent(key, Duration::ZERO).await.unwrap());
        }
        assert!(store.set_if_absent("d", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.marks.len(), 1);
        assert_eq!(store.purge_expired(), 0);
        assert!(store.contains("d"));
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected() {
        let store = InMemoryIdempotencyStore::new();
        assert!(matches!(
            store.set_if_absent("k", Duration::MAX).await,
            Err(IdempotencyError::InvalidArgument(_))
        ));
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn test_outage() {
        let store = InMemoryIdempotencyStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.set_if_absent("k", Duration::from_secs(1)).await,
            Err(IdempotencyError::Store(_))
        ));
        store.set_unavailable(false);
        assert!(store.delete("k").await.is_ok());
    }
}
