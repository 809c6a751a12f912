//! HTTP 接入模块：调度端点、链路查询、缓存失效与健康检查。
//!
//! # Dispatch Endpoint Module
//!
//! Axum router exposing the dispatcher over HTTP.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | POST | `/api/dispatch` | [`handlers::dispatch`] |
//! | GET | `/api/traces/{trace_id}` | [`handlers::get_trace`] |
//! | DELETE | `/api/cache/{key}` | [`handlers::invalidate_cache`] |
//! | GET | `/health` | [`handlers::health`] |
//!
//! Errors render as `{"success": false, "error", "kind", "traceId"?}` with the
//! status from [`crate::Error::status_code`].

pub mod error;
pub mod handlers;

pub use error::{ApiError, ErrorBody};
pub use handlers::{DispatchResponse, Observability};

use crate::auth::{ApiKeyAuthenticator, Authenticator};
use crate::backend::BackendRegistry;
use crate::cache::{CacheKeyGenerator, CacheStore, MemoryStore, RedisStore, ResilientStore};
use crate::config::DispatchConfig;
use crate::dispatch::{BackendInvoker, Dispatcher, StrategyExecutor, TraceRecorder};
use crate::resilience::CircuitBreaker;
use crate::telemetry::{ChannelUsageSink, UsageSink};
use crate::Result;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub auth: Arc<dyn Authenticator>,
    pub config: Arc<DispatchConfig>,
    pub store_name: &'static str,
}

impl AppState {
    /// Wire every component from `config` around an already-built store.
    ///
    /// Returns the state and the usage writer task.
    pub fn assemble(
        config: DispatchConfig,
        store: Arc<dyn CacheStore>,
        registry: BackendRegistry,
    ) -> (Self, JoinHandle<()>) {
        let store_name = store.name();
        let keys = CacheKeyGenerator::new()
            .with_default_namespace(config.default_namespace.clone())
            .with_default_temperature(config.default_temperature);

        let invoker = BackendInvoker::new(store.clone(), Arc::new(registry))
            .with_key_generator(keys)
            .with_pricing(config.pricing_table())
            .with_response_ttl(config.response_ttl())
            .with_backend_timeout(config.backend_timeout())
            .with_single_flight(config.single_flight);
        let executor = StrategyExecutor::new(Arc::new(invoker))
            .with_max_concurrency(config.max_concurrency)
            .with_cancel_race_losers(config.cancel_race_losers);

        let (usage, writer) = ChannelUsageSink::spawn(store.clone(), config.telemetry_buffer);
        let usage: Arc<dyn UsageSink> = Arc::new(usage);
        let recorder = TraceRecorder::new(store.clone(), usage).with_trace_ttl(config.trace_ttl());

        let state = Self {
            dispatcher: Arc::new(Dispatcher::new(executor, recorder)),
            auth: Arc::new(ApiKeyAuthenticator::new(store)),
            config: Arc::new(config),
            store_name,
        };
        (state, writer)
    }

    /// Connect the configured store and backends, then [`AppState::assemble`].
    pub async fn from_config(config: DispatchConfig) -> Result<(Self, JoinHandle<()>)> {
        let raw: Arc<dyn CacheStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::connect(url).await?),
            None => {
                info!(capacity = config.memory_store_capacity, "using in-process cache store");
                Arc::new(MemoryStore::new(config.memory_store_capacity))
            }
        };
        let store: Arc<dyn CacheStore> = Arc::new(ResilientStore::new(
            raw,
            config.cache_retry.clone(),
            CircuitBreaker::new(config.cache_breaker.clone()),
        ));
        let registry = BackendRegistry::from_settings(&config.backends)?;
        info!(providers = ?registry.providers(), "backend registry ready");
        Ok(Self::assemble(config, store, registry))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/dispatch", post(handlers::dispatch))
        .route("/api/traces/{trace_id}", get(handlers::get_trace))
        .route("/api/cache/{key}", delete(handlers::invalidate_cache))
        .route("/health", get(handlers::health))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: DispatchConfig) -> Result<()> {
    let addr = config.socket_addr()?;
    let (state, _writer) = AppState::from_config(config).await?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "dispatch server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
