//! 响应缓存模块：缓存键推导与可插拔的键值存储后端。
//!
//! # Response Caching Module
//!
//! Derives deterministic cache keys for backend requests and talks to the
//! shared key-value store that holds cached payloads, traces and usage counters.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheKeyGenerator`] | Canonical SHA-256 key derivation |
//! | [`CacheStore`] | GET / SET EX / INCR / EXPIRE / DEL collaborator trait |
//! | [`MemoryStore`] | In-process LRU store with expiration |
//! | [`RedisStore`] | Redis-backed store |
//! | [`ResilientStore`] | Retry + circuit breaker wrapper |
//!
//! ## Example
//!
//! ```rust
//! use ai_dispatch::cache::CacheKeyGenerator;
//! use ai_dispatch::types::Message;
//!
//! let key = CacheKeyGenerator::new().generate(
//!     "openai",
//!     "gpt-4o-mini",
//!     &[Message::user("hi")],
//!     None,
//!     None,
//! );
//! assert!(key.as_str().starts_with("global:openai:gpt-4o-mini:"));
//! ```

mod key;
mod redis_store;
mod resilient;
mod store;

pub use key::{sha256_hex, CacheKey, CacheKeyGenerator, DEFAULT_NAMESPACE, DEFAULT_TEMPERATURE};
pub use redis_store::RedisStore;
pub use resilient::ResilientStore;
pub use store::{CacheStore, MemoryStore};

/// Whether `key` has the `<ns>:<provider>:<model>:<sha256-hex>` response layout.
pub fn is_response_key(key: &str) -> bool {
    let parts: Vec<&str> = key.rsplitn(2, ':').collect();
    match parts.as_slice() {
        [digest, rest] => {
            digest.len() == 64
                && digest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
                && rest.split(':').count() >= 3
                && !rest.starts_with("trace:")
                && !rest.starts_with("usage:")
                && !rest.starts_with("apikey:")
        }
        _ => false,
    }
}

/// Store key under which a trace is persisted.
pub fn trace_key(trace_id: &str) -> String {
    format!("trace:{}", trace_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    #[test]
    fn test_response_key_shape() {
        let key = CacheKeyGenerator::new().generate("p", "m", &[Message::user("hi")], None, None);
        assert!(is_response_key(key.as_str()));
        assert!(!is_response_key("trace:abc"));
        assert!(!is_response_key("usage:requests:2024-01-01"));
        assert!(!is_response_key(&format!("apikey:x:y:{}", key.digest)));
        assert!(!is_response_key("global:p:m:not-a-digest"));
    }
}
