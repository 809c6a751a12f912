//! Trace assembly, persistence and usage reporting.

use super::strategy::Execution;
use crate::cache::{trace_key, CacheStore};
use crate::telemetry::{UsageEvent, UsageSink};
use crate::types::Trace;
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_TRACE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct TraceRecorder {
    store: Arc<dyn CacheStore>,
    usage: Arc<dyn UsageSink>,
    trace_ttl: Duration,
}

impl TraceRecorder {
    pub fn new(store: Arc<dyn CacheStore>, usage: Arc<dyn UsageSink>) -> Self {
        Self {
            store,
            usage,
            trace_ttl: DEFAULT_TRACE_TTL,
        }
    }

    pub fn with_trace_ttl(mut self, ttl: Duration) -> Self {
        self.trace_ttl = ttl;
        self
    }

    /// Fold an execution into `trace`, persist it once and report usage.
    ///
    /// Persistence failures are fatal; usage reporting failures are only logged.
    /// A trace id that is already stored is never overwritten.
    pub async fn record(&self, mut trace: Trace, execution: Execution, identity: &str) -> Result<Trace> {
        trace.spans = execution.spans;
        trace.results = execution.results;
        trace.recompute();

        let json = serde_json::to_string(&trace)?;
        let key = trace_key(&trace.trace_id);
        let written = self
            .store
            .set_nx(&key, &json, Some(self.trace_ttl))
            .await
            .map_err(|e| {
                Error::cache_unavailable(
                    format!("failed to persist trace: {}", e),
                    ErrorContext::new()
                        .with_details(key.clone())
                        .with_source("trace_recorder"),
                )
            })?;
        if !written {
            return Err(Error::Conflict {
                what: format!("trace {} already exists", trace.trace_id),
            });
        }
        debug!(trace_id = %trace.trace_id, spans = trace.spans.len(), "trace persisted");

        let event = UsageEvent::new(identity, &trace.trace_id, trace.cache_hits, trace.cache_misses);
        if let Err(e) = self.usage.report(event).await {
            warn!(trace_id = %trace.trace_id, error = %e, "usage event not recorded");
        }
        Ok(trace)
    }

    pub async fn exists(&self, trace_id: &str) -> Result<bool> {
        Ok(self.store.get(&trace_key(trace_id)).await?.is_some())
    }

    /// Load a persisted trace.
    pub async fn fetch(&self, trace_id: &str) -> Result<Trace> {
        let raw = self
            .store
            .get(&trace_key(trace_id))
            .await?
            .ok_or_else(|| Error::NotFound {
                what: format!("trace {}", trace_id),
            })?;
        Ok(serde_json::from_str(&raw)?)
    }
}
