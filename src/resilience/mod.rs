//! 弹性模式模块：为缓存存储提供熔断器和有界重试。
//!
//! # Resilience Primitives Module
//!
//! Opt-in resilience patterns used around the remote cache store, so a flapping
//! store degrades into fast, well-typed failures instead of stalled dispatches.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Circuit breaker for failure isolation |
//! | [`retry`] | Bounded retry with exponential backoff |
//!
//! ```rust
//! use ai_dispatch::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(5)
//!         .with_cooldown(Duration::from_secs(30)),
//! );
//! assert!(breaker.allow().is_ok());
//! ```

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
};
pub use retry::{retry, RetryConfig};
