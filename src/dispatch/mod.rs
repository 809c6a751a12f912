//! 调度模块：缓存感知的多后端调度、策略执行与链路追踪记录。
//!
//! # Dispatch Module
//!
//! Runs one dispatch request end to end: every configured backend is tried
//! according to the selected strategy, each attempt becomes a span, and the
//! spans are folded into a persisted trace.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`BackendInvoker`] | One backend attempt: cache lookup, upstream call, cache write |
//! | [`StrategyExecutor`] | parallel / consensus / fastest / cheapest / best-quality |
//! | [`SingleFlight`] | At most one upstream call per cache key per process |
//! | [`TraceRecorder`] | Trace assembly, persistence and usage reporting |
//! | [`Dispatcher`] | validate → execute → record → outcome |
//!
//! ## Outcomes
//!
//! | Situation | Result |
//! |-----------|--------|
//! | at least one usable result | `Ok(trace)` |
//! | `parallel`/`consensus` with no success | `Backend` (502), trace persisted |
//! | race with no hit | `AllMissed` (404), trace persisted |
//! | every span failed on the store | `CacheUnavailable` (503) |
//! | caller `traceId` already stored | `Conflict` (409), nothing executed |
//! | `best-quality` | `NotImplemented` (501), nothing persisted |

mod invoker;
mod recorder;
mod singleflight;
mod strategy;

pub use invoker::{
    Attempt, BackendInvoker, CachedResponse, DEFAULT_BACKEND_TIMEOUT, DEFAULT_RESPONSE_TTL,
};
pub use recorder::{TraceRecorder, DEFAULT_TRACE_TTL};
pub use singleflight::SingleFlight;
pub use strategy::{Execution, StrategyExecutor, Termination, DEFAULT_MAX_CONCURRENCY};

use crate::cache::is_response_key;
use crate::types::{DispatchRequest, Trace};
use crate::{Error, ErrorContext};
use tracing::{info, warn};
use uuid::Uuid;

/// Who is dispatching and which cache namespace they write to.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    /// Identity handle used for usage counters.
    pub identity: String,
    pub namespace: Option<String>,
}

impl DispatchContext {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// A failed dispatch, carrying the trace id when a trace was persisted.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct DispatchFailure {
    pub error: Error,
    pub trace_id: Option<String>,
}

impl DispatchFailure {
    fn with_trace(error: Error, trace_id: &str) -> Self {
        Self {
            error,
            trace_id: Some(trace_id.to_string()),
        }
    }
}

impl From<Error> for DispatchFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            trace_id: None,
        }
    }
}

pub struct Dispatcher {
    executor: StrategyExecutor,
    recorder: TraceRecorder,
}

impl Dispatcher {
    pub fn new(executor: StrategyExecutor, recorder: TraceRecorder) -> Self {
        Self { executor, recorder }
    }

    pub fn executor(&self) -> &StrategyExecutor {
        &self.executor
    }

    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        ctx: &DispatchContext,
    ) -> std::result::Result<Trace, DispatchFailure> {
        request.validate()?;

        let trace_id = request
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if request.trace_id.is_some() && self.recorder.exists(&trace_id).await? {
            return Err(Error::Conflict {
                what: format!("trace {} already exists", trace_id),
            }
            .into());
        }
        let trace = Trace::begin(&trace_id, request.strategy, request.models.len());

        let execution = self
            .executor
            .execute(
                request.strategy,
                &trace_id,
                &request.models,
                &request.messages,
                ctx.namespace.as_deref(),
            )
            .await?;

        if execution.store_unavailable() {
            warn!(trace_id = %trace_id, "every backend attempt failed on the cache store");
            return Err(Error::cache_unavailable(
                "cache store unavailable for every backend",
                ErrorContext::new()
                    .with_details(format!("trace {}", trace_id))
                    .with_source("dispatcher"),
            )
            .into());
        }

        let termination = execution.termination;
        let trace = self
            .recorder
            .record(trace, execution, &ctx.identity)
            .await?;

        info!(
            trace_id = %trace.trace_id,
            strategy = %trace.strategy,
            spans = trace.spans.len(),
            cache_hits = trace.cache_hits,
            cache_misses = trace.cache_misses,
            errors = trace.errors,
            latency_ms = trace.total_latency,
            estimated_savings = trace.total_savings(),
            "dispatch completed"
        );

        match termination {
            Termination::Exhausted => Err(DispatchFailure::with_trace(
                Error::AllMissed {
                    attempted: trace.spans.len(),
                },
                &trace.trace_id,
            )),
            Termination::Settled if trace.successful_results() == 0 => {
                let message = trace
                    .results
                    .iter()
                    .map(|r| {
                        format!(
                            "{}/{}: {}",
                            r.provider,
                            r.model,
                            r.error.as_deref().unwrap_or("no response")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(DispatchFailure::with_trace(
                    Error::Backend {
                        provider: "*".into(),
                        model: "*".into(),
                        status: None,
                        message: format!("no backend succeeded: {}", message),
                    },
                    &trace.trace_id,
                ))
            }
            _ => Ok(trace),
        }
    }

    pub async fn trace(&self, trace_id: &str) -> crate::Result<Trace> {
        self.recorder.fetch(trace_id).await
    }

    /// Remove one cached response. Returns whether it existed.
    ///
    /// Only response keys are accepted; trace, usage and credential entries
    /// share the store and stay out of reach.
    pub async fn invalidate(&self, key: &str) -> crate::Result<bool> {
        if !is_response_key(key) {
            return Err(Error::validation("key", "not a response cache key"));
        }
        self.executor.invoker().store().delete(key).await
    }
}
