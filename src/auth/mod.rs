//! 认证模块：将 API 密钥映射为调用方身份（demo / live）。
//!
//! # Authentication Module
//!
//! Maps a bearer credential to an [`Identity`]. Demo keys (`ac_demo_*`) are
//! accepted as-is; live keys (`ac_live_*`) must be registered in the cache
//! store under `apikey:<sha256(key)>`, whose value is the identity handle.

use crate::cache::{sha256_hex, CacheStore};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const DEMO_KEY_PREFIX: &str = "ac_demo_";
pub const LIVE_KEY_PREFIX: &str = "ac_live_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Demo,
    Live,
}

impl IdentityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::Demo => "demo",
            IdentityKind::Live => "live",
        }
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub kind: IdentityKind,
    /// Stable handle used for usage accounting.
    pub handle: String,
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `None` means no credential was presented.
    async fn authenticate(&self, credential: Option<&str>) -> Result<Identity>;
}

/// Store key under which a live API key is registered.
pub fn api_key_entry(key: &str) -> String {
    format!("apikey:{}", sha256_hex(key.as_bytes()))
}

pub struct ApiKeyAuthenticator {
    store: Arc<dyn CacheStore>,
}

impl ApiKeyAuthenticator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Register a live key so it authenticates as `handle`.
    pub async fn register_live_key(&self, key: &str, handle: &str) -> Result<()> {
        if !key.starts_with(LIVE_KEY_PREFIX) {
            return Err(Error::validation(
                "key",
                format!("live keys must start with {}", LIVE_KEY_PREFIX),
            ));
        }
        self.store.set(&api_key_entry(key), handle, None).await
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, credential: Option<&str>) -> Result<Identity> {
        let key = credential
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::auth("missing API key"))?;

        if let Some(rest) = key.strip_prefix(DEMO_KEY_PREFIX) {
            if rest.is_empty() {
                return Err(Error::auth("invalid API key"));
            }
            return Ok(Identity {
                kind: IdentityKind::Demo,
                handle: key.to_string(),
            });
        }

        if key.starts_with(LIVE_KEY_PREFIX) {
            // Store outages surface as 503, not as a rejected key.
            let handle = self.store.get(&api_key_entry(key)).await?;
            return match handle {
                Some(handle) => {
                    debug!(handle = %handle, "live key authenticated");
                    Ok(Identity {
                        kind: IdentityKind::Live,
                        handle,
                    })
                }
                None => Err(Error::auth("unknown API key")),
            };
        }

        Err(Error::auth("invalid API key format"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn auth() -> ApiKeyAuthenticator {
        ApiKeyAuthenticator::new(Arc::new(MemoryStore::default()))
    }

    #[tokio::test]
    async fn test_demo_key_is_its_own_handle() {
        let id = auth().authenticate(Some("ac_demo_abc")).await.unwrap();
        assert_eq!(id.kind, IdentityKind::Demo);
        assert_eq!(id.handle, "ac_demo_abc");
    }

    #[tokio::test]
    async fn test_live_key_requires_registration() {
        let a = auth();
        let err = a.authenticate(Some("ac_live_123")).await.unwrap_err();
        assert_eq!(err.status_code(), 401);

        a.register_live_key("ac_live_123", "user-42").await.unwrap();
        let id = a.authenticate(Some("ac_live_123")).await.unwrap();
        assert_eq!(id.kind, IdentityKind::Live);
        assert_eq!(id.handle, "user-42");
    }

    #[tokio::test]
    async fn test_rejects_missing_and_foreign_keys() {
        let a = auth();
        for cred in [None, Some(""), Some("sk-123"), Some("ac_demo_")] {
            assert_eq!(a.authenticate(cred).await.unwrap_err().status_code(), 401);
        }
    }

    #[test]
    fn test_entry_key_hides_the_secret() {
        let entry = api_key_entry("ac_live_secret");
        assert!(entry.starts_with("apikey:"));
        assert!(!entry.contains("secret"));
        assert_eq!(entry.len(), "apikey:".len() + 64);
    }
}
