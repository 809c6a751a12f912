//! 执行轨迹：单个后端尝试的 Span 与整个调度的 Trace。
//!
//! Execution trace model.
//!
//! A [`Span`] records one attempt against one backend; a [`Trace`] aggregates
//! every span of a single dispatch call together with the caller-facing
//! [`BackendResult`]s. Aggregate counters are always derived from the spans.

use crate::types::request::Strategy;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Success,
    Error,
}

/// One execution attempt against one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub span_id: String,
    pub trace_id: String,
    pub provider: String,
    pub model: String,
    /// Wall-clock start, milliseconds since the Unix epoch.
    pub start_time: i64,
    /// Wall-clock end, milliseconds since the Unix epoch.
    pub end_time: i64,
    /// `end_time - start_time`, in milliseconds.
    pub latency: u64,
    pub cached: bool,
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub estimated_savings: f64,
}

impl Span {
    pub fn is_success(&self) -> bool {
        self.status == SpanStatus::Success
    }
}

/// Captures the start of an attempt; `hit`, `miss`, `lookup_miss` or `error` closes it into a [`Span`].
#[derive(Debug, Clone)]
pub struct SpanTimer {
    trace_id: String,
    provider: String,
    model: String,
    started_wall: i64,
    started: Instant,
}

impl SpanTimer {
    pub fn start(
        trace_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            provider: provider.into(),
            model: model.into(),
            started_wall: chrono::Utc::now().timestamp_millis(),
            started: Instant::now(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn close(self, cached: bool, status: SpanStatus, error: Option<String>) -> Span {
        let latency = self.started.elapsed().as_millis() as u64;
        Span {
            span_id: Uuid::new_v4().to_string(),
            trace_id: self.trace_id,
            provider: self.provider,
            model: self.model,
            start_time: self.started_wall,
            end_time: self.started_wall + latency as i64,
            latency,
            cached,
            status,
            error,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            estimated_savings: 0.0,
        }
    }

    /// Span for a payload served from the cache store.
    pub fn hit(self, input_tokens: u64, output_tokens: u64, estimated_savings: f64) -> Span {
        let mut span = self.close(true, SpanStatus::Success, None);
        span.input_tokens = input_tokens;
        span.output_tokens = output_tokens;
        span.estimated_savings = estimated_savings;
        span
    }

    /// Span for a successful upstream call.
    pub fn miss(self, input_tokens: u64, output_tokens: u64, cost: f64) -> Span {
        let mut span = self.close(false, SpanStatus::Success, None);
        span.input_tokens = input_tokens;
        span.output_tokens = output_tokens;
        span.cost = cost;
        span
    }

    /// Span for a cache-only lookup that found nothing.
    pub fn lookup_miss(self) -> Span {
        self.close(false, SpanStatus::Success, None)
    }

    pub fn error(self, message: impl Into<String>) -> Span {
        self.close(false, SpanStatus::Error, Some(message.into()))
    }
}

/// Caller-facing projection of a span plus the generated content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResult {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cached: bool,
    pub latency: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_savings: Option<f64>,
}

impl BackendResult {
    pub fn from_span(span: &Span, response: Option<String>) -> Self {
        let estimated_savings = if span.cached {
            Some(span.estimated_savings)
        } else {
            None
        };
        let cost = if span.is_success() {
            Some(span.cost)
        } else {
            None
        };
        Self {
            provider: span.provider.clone(),
            model: span.model.clone(),
            response,
            error: span.error.clone(),
            cached: span.cached,
            latency: span.latency,
            cost,
            estimated_savings,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.response.is_some()
    }
}

/// Aggregate record of one dispatch call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub trace_id: String,
    pub strategy: Strategy,
    /// RFC 3339 creation time.
    pub timestamp: String,
    pub models_requested: usize,
    pub spans: Vec<Span>,
    pub results: Vec<BackendResult>,
    pub total_latency: u64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub errors: usize,
}

impl Trace {
    /// Start an empty trace for a dispatch.
    pub fn begin(trace_id: impl Into<String>, strategy: Strategy, models_requested: usize) -> Self {
        Self {
            trace_id: trace_id.into(),
            strategy,
            timestamp: chrono::Utc::now().to_rfc3339(),
            models_requested,
            spans: Vec::new(),
            results: Vec::new(),
            total_latency: 0,
            cache_hits: 0,
            cache_misses: 0,
            errors: 0,
        }
    }

    /// Recompute every derived field from `spans`.
    ///
    /// Hits are cached spans, misses are successful uncached spans and errors
    /// are failed spans; the three partition `spans`.
    pub fn recompute(&mut self) {
        self.total_latency = self.spans.iter().map(|s| s.latency).max().unwrap_or(0);
        self.cache_hits = self.spans.iter().filter(|s| s.cached).count();
        self.errors = self.spans.iter().filter(|s| !s.is_success()).count();
        self.cache_misses = self
            .spans
            .iter()
            .filter(|s| !s.cached && s.is_success())
            .count();
    }

    pub fn cache_hit_rate(&self) -> f64 {
        if self.spans.is_empty() {
            return 0.0;
        }
        let rate = self.cache_hits as f64 / self.spans.len() as f64;
        (rate * 10_000.0).round() / 10_000.0
    }

    pub fn successful_results(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn total_cost(&self) -> f64 {
        self.spans.iter().map(|s| s.cost).sum()
    }

    pub fn total_savings(&self) -> f64 {
        self.spans.iter().map(|s| s.estimated_savings).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(p: &str) -> SpanTimer {
        SpanTimer::start("t1", p, "m")
    }

    #[test]
    fn test_counters_partition_spans() {
        let mut trace = Trace::begin("t1", Strategy::Parallel, 4);
        trace.spans.push(timer("a").hit(10, 20, 0.5));
        trace.spans.push(timer("b").miss(10, 20, 0.5));
        trace.spans.push(timer("c").error("boom"));
        trace.spans.push(timer("d").lookup_miss());
        trace.recompute();

        assert_eq!(trace.cache_hits, 1);
        assert_eq!(trace.cache_misses, 2);
        assert_eq!(trace.errors, 1);
        assert_eq!(
            trace.cache_hits + trace.cache_misses + trace.errors,
            trace.spans.len()
        );
        assert_eq!(trace.cache_hit_rate(), 0.25);
    }

    #[test]
    fn test_total_latency_is_max_not_sum() {
        let mut trace = Trace::begin("t1", Strategy::Parallel, 3);
        for latency in [120, 40, 300] {
            let mut span = timer("p").miss(1, 1, 0.0);
            span.latency = latency;
            trace.spans.push(span);
        }
        trace.recompute();
        assert_eq!(trace.total_latency, 300);
    }

    #[test]
    fn test_hit_span_has_zero_cost() {
        let span = timer("p").hit(5, 7, 0.01);
        assert!(span.cached);
        assert_eq!(span.cost, 0.0);
        assert_eq!(span.end_time - span.start_time, span.latency as i64);

        let result = BackendResult::from_span(&span, Some("hello".into()));
        assert_eq!(result.cost, Some(0.0));
        assert_eq!(result.estimated_savings, Some(0.01));
    }

    #[test]
    fn test_error_result_has_no_cost() {
        let span = timer("p").error("upstream 500");
        let result = BackendResult::from_span(&span, None);
        assert!(!result.is_success());
        assert_eq!(result.cost, None);
        assert_eq!(result.error.as_deref(), Some("upstream 500"));
    }

    #[test]
    fn test_trace_serializes_camel_case() {
        let trace = Trace::begin("t1", Strategy::BestQuality, 1);
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["traceId"], "t1");
        assert_eq!(json["strategy"], "best-quality");
        assert_eq!(json["modelsRequested"], 1);
        assert_eq!(json["cacheHits"], 0);
    }
}
