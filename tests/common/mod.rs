//! Shared fixtures: scripted backends and a dispatcher over an in-memory store.

#![allow(dead_code)]

use ai_dispatch::backend::{BackendClient, BackendRegistry, Completion};
use ai_dispatch::cache::{CacheKeyGenerator, CacheStore, MemoryStore};
use ai_dispatch::dispatch::{
    BackendInvoker, CachedResponse, Dispatcher, StrategyExecutor, TraceRecorder,
};
use ai_dispatch::telemetry::InMemoryUsageSink;
use ai_dispatch::{Error, Message, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Backend whose replies are fixed up front and whose calls are counted.
pub struct ScriptedBackend {
    provider: String,
    reply: std::result::Result<String, String>,
    delay: Duration,
    calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn ok(provider: &str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.into(),
            reply: Ok(reply.into()),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(provider: &str, message: &str) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.into(),
            reply: Err(message.into()),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        })
    }

    pub fn slow(provider: &str, reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            provider: provider.into(),
            reply: Ok(reply.into()),
            delay,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendClient for ScriptedBackend {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn complete(
        &self,
        _messages: &[Message],
        model: &str,
        _temperature: f64,
    ) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            Ok(text) => Ok(Completion::new(text.clone(), 12, 34)),
            Err(msg) => Err(Error::Backend {
                provider: self.provider.clone(),
                model: model.to_string(),
                status: Some(500),
                message: msg.clone(),
            }),
        }
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub usage: Arc<InMemoryUsageSink>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new(backends: &[Arc<ScriptedBackend>]) -> Self {
        Self::with_store(Arc::new(MemoryStore::default()), backends)
    }

    pub fn with_store(store: Arc<MemoryStore>, backends: &[Arc<ScriptedBackend>]) -> Self {
        let shared: Arc<dyn CacheStore> = store.clone();
        Self::over(shared, store, backends)
    }

    /// Dispatcher talking to `dispatch_store`; `store` is kept for inspection.
    pub fn over(
        dispatch_store: Arc<dyn CacheStore>,
        store: Arc<MemoryStore>,
        backends: &[Arc<ScriptedBackend>],
    ) -> Self {
        let mut registry = BackendRegistry::new();
        for b in backends {
            registry.register(b.clone());
        }
        let usage = Arc::new(InMemoryUsageSink::new());
        let invoker = BackendInvoker::new(dispatch_store.clone(), Arc::new(registry))
            .with_backend_timeout(Duration::from_secs(2));
        let executor = StrategyExecutor::new(Arc::new(invoker));
        let recorder = TraceRecorder::new(dispatch_store, usage.clone());
        Self {
            store,
            usage,
            dispatcher: Dispatcher::new(executor, recorder),
        }
    }

    /// Store a cached response for `(provider, model, messages)` at the default temperature.
    pub async fn seed(&self, provider: &str, model: &str, messages: &[Message], content: &str) {
        let key = CacheKeyGenerator::new().generate(provider, model, messages, None, None);
        let payload = CachedResponse::new(content, provider, model)
            .to_json()
            .unwrap();
        self.store.set(key.as_str(), &payload, None).await.unwrap();
    }

    pub async fn is_cached(&self, provider: &str, model: &str, messages: &[Message]) -> bool {
        let key = CacheKeyGenerator::new().generate(provider, model, messages, None, None);
        self.store.get(key.as_str()).await.unwrap().is_some()
    }
}
