//! Cache key generation.
//!
//! Canonical form: serde_json of `CanonicalRequest`, whose field order is
//! fixed by the struct declaration (`namespace`, `provider`, `model`,
//! `temperature`, `messages[{role, content}]`). Temperature is rendered with
//! four decimals so `0.7` and `0.70` hash identically. The digest is SHA-256
//! in lowercase hex.

use crate::types::Message;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Namespace used when the caller does not scope its cache entries.
pub const DEFAULT_NAMESPACE: &str = "global";

/// Temperature assumed when a backend config does not set one.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Full store key: `<ns>:<provider>:<model>:<digest>`.
    pub key: String,
    pub digest: String,
    pub namespace: String,
    pub provider: String,
    pub model: String,
}

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

#[derive(Serialize)]
struct CanonicalMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct CanonicalRequest<'a> {
    namespace: &'a str,
    provider: &'a str,
    model: &'a str,
    temperature: String,
    messages: Vec<CanonicalMessage<'a>>,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Derives deterministic cache keys for `(provider, model, messages, temperature, namespace)`.
#[derive(Debug, Clone)]
pub struct CacheKeyGenerator {
    default_namespace: String,
    default_temperature: f64,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            default_temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_default_namespace(mut self, ns: impl Into<String>) -> Self {
        self.default_namespace = ns.into();
        self
    }

    pub fn with_default_temperature(mut self, t: f64) -> Self {
        self.default_temperature = t;
        self
    }

    pub fn default_temperature(&self) -> f64 {
        self.default_temperature
    }

    pub fn generate(
        &self,
        provider: &str,
        model: &str,
        messages: &[Message],
        temperature: Option<f64>,
        namespace: Option<&str>,
    ) -> CacheKey {
        let namespace = namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&self.default_namespace);
        let temperature = temperature.unwrap_or(self.default_temperature);

        let canonical = CanonicalRequest {
            namespace,
            provider,
            model,
            temperature: format!("{:.4}", temperature),
            messages: messages
                .iter()
                .map(|m| CanonicalMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        };
        // Serializing a struct of strings cannot fail.
        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();

        let digest = sha256_hex(&encoded);

        CacheKey {
            key: format!("{}:{}:{}:{}", namespace, provider, model, digest),
            digest,
            namespace: namespace.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
        }
    }
}

impl Default for CacheKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
