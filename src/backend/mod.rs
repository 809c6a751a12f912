//! 模型后端模块：上游模型服务客户端抽象与按 provider 的注册表。
//!
//! # Model Backend Module
//!
//! The collaborator that turns `(messages, model, temperature)` into generated
//! text plus token usage, and the registry that resolves a request's
//! `provider` to a concrete client.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BackendClient`] | Async trait every upstream client implements |
//! | [`BackendRegistry`] | provider id → client |
//! | [`HttpBackend`] | OpenAI-compatible / Anthropic Messages HTTP client |

mod http;

pub use http::{ApiStyle, BackendSettings, HttpBackend};

use crate::types::Message;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Token usage reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Generated text and its usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

impl Completion {
    pub fn new(content: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            content: content.into(),
            usage: Usage {
                input_tokens,
                output_tokens,
            },
        }
    }
}

#[async_trait]
pub trait BackendClient: Send + Sync {
    fn provider(&self) -> &str;

    /// Per-client deadline; `None` defers to the dispatcher's default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        temperature: f64,
    ) -> Result<Completion>;
}

/// Resolves provider ids to clients. Built once at startup, read-only afterwards.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    clients: HashMap<String, Arc<dyn BackendClient>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP clients for every configured provider.
    pub fn from_settings(settings: &[BackendSettings]) -> Result<Self> {
        let mut registry = Self::new();
        for s in settings {
            registry.register(Arc::new(HttpBackend::new(s)?));
        }
        Ok(registry)
    }

    /// Register a client under its own provider id, replacing any previous one.
    pub fn register(&mut self, client: Arc<dyn BackendClient>) {
        self.clients.insert(client.provider().to_string(), client);
    }

    pub fn with_client(mut self, client: Arc<dyn BackendClient>) -> Self {
        self.register(client);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn BackendClient>> {
        self.clients.get(provider).cloned()
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
