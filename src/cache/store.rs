//! Cache store collaborator and the in-process implementation.

use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Remote key-value store reachable over a GET/SET/INCR/EXPIRE protocol.
///
/// Keys are UTF-8 strings and values are opaque strings (JSON payloads here).
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// `SET key value [EX seconds]`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    /// `SET key value NX [EX seconds]`; false when the key already exists.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
    /// `INCR key`; a missing key starts at 0.
    async fn incr(&self, key: &str) -> Result<i64>;
    /// `EXPIRE key seconds`; false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<bool>;
    fn name(&self) -> &'static str;
}

#[derive(Clone)]
struct StoreEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|at| Instant::now() >= at)
            .unwrap_or(false)
    }
}

/// In-memory LRU store with per-key expiration.
///
/// Used when no remote store is configured, and as the store in tests.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, StoreEntry>>,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, StoreEntry>>> {
        self.entries.lock().map_err(|_| {
            Error::runtime_with_context(
                "MemoryStore poisoned",
                ErrorContext::new().with_source("memory_store"),
            )
        })
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.lock()
            .map(|e| e.iter().filter(|(_, v)| !v.is_expired()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time-to-live of a key, if it exists and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.lock().ok()?;
        let entry = entries.peek(key)?;
        let at = entry.expires_at?;
        at.checked_duration_since(Instant::now())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.pop(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.lock()?;
        entries.put(
            key.to_string(),
            StoreEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.lock()?;
        if entries.peek(key).is_some_and(|e| !e.is_expired()) {
            return Ok(false);
        }
        entries.put(
            key.to_string(),
            StoreEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(true)
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.lock()?;
        let (current, expires_at) = match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                let n = entry.value.parse::<i64>().map_err(|_| {
                    Error::runtime_with_context(
                        "value is not an integer",
                        ErrorContext::new()
                            .with_field_path(key)
                            .with_source("memory_store"),
                    )
                })?;
                (n, entry.expires_at)
            }
            _ => (0, None),
        };
        let next = current + 1;
        entries.put(
            key.to_string(),
            StoreEntry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.lock()?;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.lock()?;
        Ok(entries
            .pop(key)
            .map(|e| !e.is_expired())
            .unwrap_or(false))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new(10);
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryStore::new(10);
        store
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_nx_only_writes_absent_keys() {
        let store = MemoryStore::new(10);
        assert!(store.set_nx("k", "first", None).await.unwrap());
        assert!(!store.set_nx("k", "second", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));

        store
            .set("short", "old", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store
            .set_nx("short", "new", Some(Duration::from_secs(60)))
            .await
            .unwrap());
        assert_eq!(store.get("short").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_incr_and_expire() {
        let store = MemoryStore::new(10);
        assert_eq!(store.incr("c").await.unwrap(), 1);
        assert_eq!(store.incr("c").await.unwrap(), 2);
        assert!(store.expire("c", Duration::from_secs(60)).await.unwrap());
        assert!(store.ttl("c").is_some());
        // INCR keeps the existing expiry.
        assert_eq!(store.incr("c").await.unwrap(), 3);
        assert!(store.ttl("c").is_some());
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_rejects_non_integer() {
        let store = MemoryStore::new(10);
        store.set("k", "{\"a\":1}", None).await.unwrap();
        assert!(store.incr("k").await.is_err());
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let store = MemoryStore::new(2);
        store.set("a", "1", None).await.unwrap();
        store.set("b", "2", None).await.unwrap();
        store.get("a").await.unwrap();
        store.set("c", "3", None).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(store.len(), 2);
    }
}
