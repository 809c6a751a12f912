//! Redis-backed cache store.

use super::store::CacheStore;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

/// [`CacheStore`] over a Redis connection manager.
///
/// The connection manager reconnects on its own; every command clones the
/// handle, so the store is cheap to share across tasks.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %redact(url), "connecting to redis cache store");
        let client = Client::open(url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid redis url: {}", e),
                ErrorContext::new()
                    .with_field_path("redis_url")
                    .with_source("redis_store"),
            )
        })?;
        let conn = ConnectionManager::new(client).await?;
        info!("redis cache store connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        debug!(key, hit = value.is_some(), "redis GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                    .await?
            }
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        debug!(key, ttl_secs = ttl.map(|t| t.as_secs()), "redis SET");
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        // Nil reply when the key already exists.
        let reply: Option<String> = cmd.query_async(&mut conn).await?;
        debug!(key, written = reply.is_some(), "redis SET NX");
        Ok(reply.is_some())
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let n: i64 = conn.incr(key, 1).await?;
        Ok(n)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let ok: bool = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(ok)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Hide the password component of a redis URL for logging.
fn redact(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<invalid>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_hides_password() {
        assert_eq!(
            redact("redis://:secret@cache.internal:6379/0"),
            "redis://:***@cache.internal:6379/0"
        );
        assert_eq!(redact("redis://127.0.0.1:6379"), "redis://127.0.0.1:6379");
        assert_eq!(redact("not a url"), "<invalid>");
    }

    #[tokio::test]
    #[ignore = "requires a redis server; set REDIS_URL and run with --ignored"]
    async fn test_roundtrip_against_live_redis() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            eprintln!("REDIS_URL not set, skipping");
            return;
        };
        let store = RedisStore::connect(&url).await.unwrap();
        store
            .set("ai-dispatch:test:k", "v", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(
            store.get("ai-dispatch:test:k").await.unwrap().as_deref(),
            Some("v")
        );
        assert!(store.delete("ai-dispatch:test:k").await.unwrap());
    }
}
