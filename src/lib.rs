//! # ai-dispatch
//!
//! 缓存感知的多厂商模型调度器：按策略并发调用多个模型后端，并为每次调用记录可追溯的执行链路。
//!
//! Cache-aware multi-provider dispatch orchestrator. A single request fans out
//! to several model backends under a selectable strategy; every backend
//! attempt is served from a shared cache store when possible and recorded as a
//! span in a persisted, retrievable trace.
//!
//! ## Overview
//!
//! ```text
//! POST /api/dispatch
//!   → authenticate → validate
//!   → StrategyExecutor (parallel | consensus | fastest | cheapest | best-quality)
//!       → per backend: cache key → store lookup
//!           hit  → span(cached, savings)
//!           miss → backend client → store write → span(cost)
//!   → TraceRecorder (persist trace, usage counters)
//!   → response with observability summary
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_dispatch::config::DispatchConfig;
//!
//! #[tokio::main]
//! async fn main() -> ai_dispatch::Result<()> {
//!     let config = DispatchConfig::from_env()?;
//!     ai_dispatch::server::serve(config).await
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Requests, messages, spans, traces |
//! | [`cache`] | Cache key derivation and key-value stores |
//! | [`tokens`] | Cost model and token estimation |
//! | [`backend`] | Upstream model clients |
//! | [`dispatch`] | Invoker, strategies, single-flight, trace recorder |
//! | [`telemetry`] | Best-effort usage counters |
//! | [`auth`] | API-key authentication |
//! | [`resilience`] | Circuit breaker and retry for the cache store |
//! | [`config`] | YAML + environment configuration |
//! | [`server`] | Axum HTTP surface |

pub mod auth;
pub mod backend;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod resilience;
pub mod server;
pub mod telemetry;
pub mod tokens;
pub mod types;

// Re-export main types for convenience
pub use dispatch::{DispatchContext, DispatchFailure, Dispatcher};
pub use types::{
    BackendConfig, BackendResult, DispatchRequest, Message, MessageRole, Span, Strategy, Trace,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
