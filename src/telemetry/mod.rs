//! 用量遥测模块：尽力而为的每日请求计数与按身份的命中/未命中计数。
//!
//! # Usage Telemetry Module
//!
//! Coarse usage counters updated after every dispatch: daily request counts
//! and per-identity hit/miss counts. Delivery is best-effort; a failing or
//! saturated sink never affects the dispatch result.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`UsageEvent`] | One dispatch's contribution to the counters |
//! | [`UsageSink`] | Trait for usage destinations |
//! | [`InMemoryUsageSink`] | Keeps events in memory for testing |
//! | [`ChannelUsageSink`] | Bounded queue drained by a background writer into the cache store |
//!
//! ## Store Keys
//!
//! | Key | Update |
//! |-----|--------|
//! | `usage:requests:<YYYY-MM-DD>` | INCR, EXPIRE 8 days |
//! | `usage:<identity>:hits` | INCR per cache hit |
//! | `usage:<identity>:misses` | INCR per cache miss |

use crate::cache::CacheStore;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Daily counters outlive the day they count by one day.
pub const DAILY_COUNTER_TTL: Duration = Duration::from_secs(8 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// Identity handle of the caller.
    pub identity: String,
    pub trace_id: String,
    /// UTC day, `YYYY-MM-DD`.
    pub day: String,
    pub hits: usize,
    pub misses: usize,
}

impl UsageEvent {
    pub fn new(identity: impl Into<String>, trace_id: impl Into<String>, hits: usize, misses: usize) -> Self {
        Self {
            identity: identity.into(),
            trace_id: trace_id.into(),
            day: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            hits,
            misses,
        }
    }

    pub fn requests_key(&self) -> String {
        format!("usage:requests:{}", self.day)
    }

    pub fn hits_key(&self) -> String {
        format!("usage:{}:hits", self.identity)
    }

    pub fn misses_key(&self) -> String {
        format!("usage:{}:misses", self.identity)
    }
}

#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Hand off an event. Must not block on the store.
    async fn report(&self, event: UsageEvent) -> Result<()>;
}

/// In-memory sink for testing.
pub struct InMemoryUsageSink {
    events: RwLock<Vec<UsageEvent>>,
}

impl InMemoryUsageSink {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.events
            .read()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryUsageSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageSink for InMemoryUsageSink {
    async fn report(&self, event: UsageEvent) -> Result<()> {
        let mut events = self.events.write().map_err(|_| {
            Error::runtime_with_context(
                "InMemoryUsageSink poisoned",
                ErrorContext::new().with_source("telemetry"),
            )
        })?;
        events.push(event);
        Ok(())
    }
}

/// Bounded queue in front of a background task that applies events to the store.
///
/// A full queue drops the event and reports an error instead of waiting.
pub struct ChannelUsageSink {
    tx: mpsc::Sender<UsageEvent>,
}

impl ChannelUsageSink {
    /// Start the writer task. It exits once every sender is dropped.
    pub fn spawn(store: Arc<dyn CacheStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<UsageEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = apply(store.as_ref(), &event).await {
                    warn!(
                        trace_id = %event.trace_id,
                        identity = %event.identity,
                        error = %e,
                        "failed to update usage counters"
                    );
                }
            }
            debug!("usage writer stopped");
        });
        (Self { tx }, handle)
    }
}

#[async_trait]
impl UsageSink for ChannelUsageSink {
    async fn report(&self, event: UsageEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "usage queue full, event dropped",
                mpsc::error::TrySendError::Closed(_) => "usage writer stopped, event dropped",
            };
            Error::runtime_with_context(reason, ErrorContext::new().with_source("telemetry"))
        })
    }
}

/// Apply one event to the store's counters.
pub async fn apply(store: &dyn CacheStore, event: &UsageEvent) -> Result<()> {
    let day_key = event.requests_key();
    if store.incr(&day_key).await? == 1 {
        store.expire(&day_key, DAILY_COUNTER_TTL).await?;
    }
    let hits_key = event.hits_key();
    for _ in 0..event.hits {
        store.incr(&hits_key).await?;
    }
    let misses_key = event.misses_key();
    for _ in 0..event.misses {
        store.incr(&misses_key).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    #[tokio::test]
    async fn test_apply_updates_all_counters() {
        let store = MemoryStore::default();
        let ev = UsageEvent::new("ac_demo_x", "t1", 2, 1);
        apply(&store, &ev).await.unwrap();
        apply(&store, &ev).await.unwrap();

        assert_eq!(store.get(&ev.requests_key()).await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("usage:ac_demo_x:hits").await.unwrap().as_deref(), Some("4"));
        assert_eq!(store.get("usage:ac_demo_x:misses").await.unwrap().as_deref(), Some("2"));
        assert!(store.ttl(&ev.requests_key()).is_some());
    }

    #[tokio::test]
    async fn test_channel_sink_drains_into_store() {
        let store = Arc::new(MemoryStore::default());
        let (sink, handle) = ChannelUsageSink::spawn(store.clone(), 8);
        sink.report(UsageEvent::new("u", "t1", 1, 0)).await.unwrap();
        drop(sink);
        handle.await.unwrap();
        assert_eq!(store.get("usage:u:hits").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_full_channel_drops_instead_of_blocking() {
        // Writer never runs: the runtime is current-thread and we never yield.
        let store = Arc::new(MemoryStore::default());
        let (sink, _handle) = ChannelUsageSink::spawn(store, 1);
        assert!(sink.report(UsageEvent::new("u", "t1", 0, 0)).await.is_ok());
        let err = sink
            .report(UsageEvent::new("u", "t2", 0, 0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dropped"));
    }

    #[tokio::test]
    async fn test_in_memory_sink_keeps_events() {
        let sink = InMemoryUsageSink::new();
        sink.report(UsageEvent::new("u", "t1", 0, 3)).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].misses, 3);
    }
}
