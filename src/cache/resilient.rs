//! Retry and circuit breaking around any [`CacheStore`].

use super::store::CacheStore;
use crate::resilience::{retry, CircuitBreaker, RetryConfig};
use crate::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Wraps a store so transient unavailability is retried with backoff and a
/// run of failures opens a breaker that fails fast until its cooldown ends.
pub struct ResilientStore {
    inner: Arc<dyn CacheStore>,
    retry: RetryConfig,
    breaker: CircuitBreaker,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn CacheStore>, retry: RetryConfig, breaker: CircuitBreaker) -> Self {
        Self {
            inner,
            retry,
            breaker,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn guarded<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.breaker.allow()?;
        let out = retry(&self.retry, what, Error::is_cache_unavailable, op).await;
        match &out {
            Err(e) if e.is_cache_unavailable() => self.breaker.on_failure(),
            // A data error (e.g. INCR on a non-integer) still means the store answered.
            _ => self.breaker.on_success(),
        }
        out
    }
}

#[async_trait]
impl CacheStore for ResilientStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.guarded("cache_get", || self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.guarded("cache_set", || self.inner.set(key, value, ttl))
            .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        self.guarded("cache_set_nx", || self.inner.set_nx(key, value, ttl))
            .await
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.guarded("cache_incr", || self.inner.incr(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.guarded("cache_expire", || self.inner.expire(key, ttl))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.guarded("cache_delete", || self.inner.delete(key)).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorContext;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store that fails the first `failures` calls.
    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn check(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(Error::cache_unavailable("connection refused", ErrorContext::new()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        async fn get(&self, _: &str) -> Result<Option<String>> {
            self.check().map(|_| Some("v".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<()> {
            self.check()
        }
        async fn set_nx(&self, _: &str, _: &str, _: Option<Duration>) -> Result<bool> {
            self.check().map(|_| true)
        }
        async fn incr(&self, _: &str) -> Result<i64> {
            self.check().map(|_| 1)
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<bool> {
            self.check().map(|_| true)
        }
        async fn delete(&self, _: &str) -> Result<bool> {
            self.check().map(|_| true)
        }
        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            min_delay_ms: 1,
            max_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let inner = Arc::new(FlakyStore {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let store = ResilientStore::new(
            inner.clone(),
            fast_retry(2),
            CircuitBreaker::with_cooldown(5, Duration::from_secs(1)),
        );
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(!store.breaker().is_open());
    }

    #[tokio::test]
    async fn test_breaker_opens_and_fails_fast() {
        let inner = Arc::new(FlakyStore {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let store = ResilientStore::new(
            inner.clone(),
            fast_retry(0),
            CircuitBreaker::with_cooldown(2, Duration::from_secs(60)),
        );
        assert!(store.get("k").await.is_err());
        assert!(store.get("k").await.is_err());
        assert!(store.breaker().is_open());

        let before = inner.calls.load(Ordering::SeqCst);
        let err = store.get("k").await.unwrap_err();
        assert!(err.is_cache_unavailable());
        assert_eq!(inner.calls.load(Ordering::SeqCst), before);
    }
}
