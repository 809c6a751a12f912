//! Strategy execution over the configured backends.
//!
//! | Strategy | Calls upstream | Terminates |
//! |----------|----------------|------------|
//! | `parallel` / `consensus` | yes | when every backend settles |
//! | `fastest` | no | on the first cache hit, or when all lookups miss |
//! | `cheapest` | no | on the first hit in ascending unit-cost order |
//! | `best-quality` | no | immediately, as not implemented |

use super::invoker::{Attempt, BackendInvoker};
use crate::types::{BackendConfig, BackendResult, Message, Span, Strategy};
use crate::{Error, Result};
use futures::stream::{self, FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// How a strategy finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every backend was attempted and settled.
    Settled,
    /// A race produced a cache hit.
    Won,
    /// A race exhausted its candidates without a hit.
    Exhausted,
}

/// Spans and results produced by one strategy run.
#[derive(Debug, Clone)]
pub struct Execution {
    pub spans: Vec<Span>,
    pub results: Vec<BackendResult>,
    pub termination: Termination,
    /// Spans that failed because the cache store was unreachable.
    pub store_failures: usize,
}

impl Execution {
    fn new(termination: Termination) -> Self {
        Self {
            spans: Vec::new(),
            results: Vec::new(),
            termination,
            store_failures: 0,
        }
    }

    fn push_span(&mut self, attempt: &Attempt) {
        if attempt.store_failure {
            self.store_failures += 1;
        }
        self.spans.push(attempt.span.clone());
    }

    fn push(&mut self, attempt: Attempt) {
        self.push_span(&attempt);
        self.results.push(attempt.result());
    }

    pub fn successful_results(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Every span failed on the cache store.
    pub fn store_unavailable(&self) -> bool {
        !self.spans.is_empty() && self.store_failures == self.spans.len()
    }
}

pub struct StrategyExecutor {
    invoker: Arc<BackendInvoker>,
    max_concurrency: usize,
    cancel_race_losers: bool,
}

impl StrategyExecutor {
    pub fn new(invoker: Arc<BackendInvoker>) -> Self {
        Self {
            invoker,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cancel_race_losers: true,
        }
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    /// When false, lookups that lose a `fastest` race still run to completion
    /// and their spans are recorded.
    pub fn with_cancel_race_losers(mut self, cancel: bool) -> Self {
        self.cancel_race_losers = cancel;
        self
    }

    pub fn invoker(&self) -> &BackendInvoker {
        &self.invoker
    }

    pub async fn execute(
        &self,
        strategy: Strategy,
        trace_id: &str,
        backends: &[BackendConfig],
        messages: &[Message],
        namespace: Option<&str>,
    ) -> Result<Execution> {
        debug!(trace_id, strategy = %strategy, backends = backends.len(), "executing strategy");
        match strategy {
            // No vote is taken: consensus fans out exactly like parallel.
            Strategy::Parallel | Strategy::Consensus => {
                Ok(self.parallel(trace_id, backends, messages, namespace).await)
            }
            Strategy::Fastest => Ok(self.fastest(trace_id, backends, messages, namespace).await),
            Strategy::Cheapest => Ok(self.cheapest(trace_id, backends, messages, namespace).await),
            Strategy::BestQuality => Err(Error::NotImplemented {
                feature: "best-quality strategy".into(),
            }),
        }
    }

    /// All backends, at most `max_concurrency` in flight, results in request order.
    async fn parallel(
        &self,
        trace_id: &str,
        backends: &[BackendConfig],
        messages: &[Message],
        namespace: Option<&str>,
    ) -> Execution {
        // Collected up front so the stream holds no closure over borrowed args.
        let calls: Vec<_> = backends
            .iter()
            .map(|b| self.invoker.invoke(trace_id, b, messages, namespace))
            .collect();
        let attempts: Vec<Attempt> = stream::iter(calls)
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut exec = Execution::new(Termination::Settled);
        for attempt in attempts {
            exec.push(attempt);
        }
        exec
    }

    /// Concurrent cache-only lookups; the first hit wins.
    async fn fastest(
        &self,
        trace_id: &str,
        backends: &[BackendConfig],
        messages: &[Message],
        namespace: Option<&str>,
    ) -> Execution {
        let mut lookups: FuturesUnordered<_> = backends
            .iter()
            .map(|b| self.invoker.lookup(trace_id, b, messages, namespace))
            .collect();

        let mut exec = Execution::new(Termination::Exhausted);
        while let Some(attempt) = lookups.next().await {
            if exec.termination == Termination::Won {
                exec.push_span(&attempt);
                continue;
            }
            if attempt.is_hit() {
                debug!(
                    trace_id,
                    provider = %attempt.span.provider,
                    model = %attempt.span.model,
                    "fastest race won"
                );
                exec.termination = Termination::Won;
                exec.push(attempt);
                if self.cancel_race_losers {
                    break;
                }
            } else {
                exec.push_span(&attempt);
            }
        }
        // Dropping the set cancels any lookup still pending.
        drop(lookups);
        exec
    }

    /// Sequential cache-only lookups, cheapest model first.
    async fn cheapest(
        &self,
        trace_id: &str,
        backends: &[BackendConfig],
        messages: &[Message],
        namespace: Option<&str>,
    ) -> Execution {
        let mut exec = Execution::new(Termination::Exhausted);
        for backend in self.by_unit_cost(backends) {
            let attempt = self
                .invoker
                .lookup(trace_id, backend, messages, namespace)
                .await;
            if attempt.is_hit() {
                exec.termination = Termination::Won;
                exec.push(attempt);
                break;
            }
            exec.push_span(&attempt);
        }
        exec
    }

    /// Ascending unit cost; ties keep request order.
    fn by_unit_cost<'a>(&self, backends: &'a [BackendConfig]) -> Vec<&'a BackendConfig> {
        let pricing = self.invoker.pricing();
        let mut ordered: Vec<&BackendConfig> = backends.iter().collect();
        ordered.sort_by(|a, b| {
            pricing
                .unit_cost(&a.model)
                .total_cmp(&pricing.unit_cost(&b.model))
        });
        ordered
    }
}
