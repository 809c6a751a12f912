//! One backend attempt: derive key, consult the store, call upstream on a miss.

use super::singleflight::SingleFlight;
use crate::backend::{BackendClient, BackendRegistry, Completion};
use crate::cache::{CacheKey, CacheKeyGenerator, CacheStore};
use crate::tokens::{CharacterEstimator, PricingTable, TokenCounter};
use crate::types::{BackendConfig, BackendResult, Message, Span, SpanTimer};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_RESPONSE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Value stored under a response cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub cached_at: String,
}

impl CachedResponse {
    pub fn new(content: impl Into<String>, provider: &str, model: &str) -> Self {
        Self {
            content: content.into(),
            provider: provider.to_string(),
            model: model.to_string(),
            cached_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored value; anything that is not our envelope is taken as raw content.
    pub fn from_stored(raw: &str, provider: &str, model: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self {
            content: raw.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            cached_at: String::new(),
        })
    }
}

/// Outcome of one backend attempt: its span plus the payload when there is one.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub span: Span,
    pub response: Option<String>,
    /// The attempt failed because the cache store could not be reached.
    pub store_failure: bool,
}

impl Attempt {
    fn ok(span: Span, response: String) -> Self {
        Self {
            span,
            response: Some(response),
            store_failure: false,
        }
    }

    fn failed(span: Span, store_failure: bool) -> Self {
        Self {
            span,
            response: None,
            store_failure,
        }
    }

    fn empty(span: Span) -> Self {
        Self {
            span,
            response: None,
            store_failure: false,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.span.cached
    }

    pub fn result(&self) -> BackendResult {
        BackendResult::from_span(&self.span, self.response.clone())
    }
}

type FlightOutcome = std::result::Result<Completion, Arc<Error>>;

pub struct BackendInvoker {
    store: Arc<dyn CacheStore>,
    registry: Arc<BackendRegistry>,
    keys: CacheKeyGenerator,
    pricing: Arc<PricingTable>,
    estimator: CharacterEstimator,
    response_ttl: Duration,
    backend_timeout: Duration,
    flights: Option<Arc<SingleFlight<FlightOutcome>>>,
}

impl BackendInvoker {
    pub fn new(store: Arc<dyn CacheStore>, registry: Arc<BackendRegistry>) -> Self {
        Self {
            store,
            registry,
            keys: CacheKeyGenerator::new(),
            pricing: Arc::new(PricingTable::builtin()),
            estimator: CharacterEstimator::new(),
            response_ttl: DEFAULT_RESPONSE_TTL,
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            flights: Some(Arc::new(SingleFlight::new())),
        }
    }

    pub fn with_key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = Arc::new(pricing);
        self
    }

    pub fn with_response_ttl(mut self, ttl: Duration) -> Self {
        self.response_ttl = ttl;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.flights = if enabled {
            Some(Arc::new(SingleFlight::new()))
        } else {
            None
        };
        self
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.pricing
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn key_for(
        &self,
        backend: &BackendConfig,
        messages: &[Message],
        namespace: Option<&str>,
    ) -> CacheKey {
        self.keys.generate(
            &backend.provider,
            &backend.model,
            messages,
            backend.temperature,
            namespace,
        )
    }

    /// Full attempt: serve from cache, otherwise call the upstream and cache
    /// the result. Never returns an error; failures become error spans.
    pub async fn invoke(
        &self,
        trace_id: &str,
        backend: &BackendConfig,
        messages: &[Message],
        namespace: Option<&str>,
    ) -> Attempt {
        let timer = SpanTimer::start(trace_id, &backend.provider, &backend.model);
        let key = self.key_for(backend, messages, namespace);

        match self.store.get(key.as_str()).await {
            Ok(Some(raw)) => return self.hit(timer, messages, &raw),
            Ok(None) => debug!(trace_id, key = %key, "cache miss"),
            Err(e) => return self.store_error(timer, trace_id, e),
        }

        let client = match self.registry.get(&backend.provider) {
            Some(c) => c,
            None => {
                let msg = format!(
                    "no backend client registered for provider '{}'",
                    backend.provider
                );
                warn!(trace_id, provider = %backend.provider, "{}", msg);
                return Attempt::failed(timer.error(msg), false);
            }
        };

        let temperature = backend.temperature.unwrap_or(self.keys.default_temperature());
        let outcome = self
            .call_and_store(client, key, messages.to_vec(), backend.model.clone(), temperature)
            .await;

        match outcome {
            Ok(completion) => {
                let usage = completion.usage;
                let cost = self
                    .pricing
                    .cost(&backend.model, usage.input_tokens, usage.output_tokens);
                let span = timer.miss(usage.input_tokens, usage.output_tokens, cost);
                debug!(
                    trace_id,
                    provider = %span.provider,
                    model = %span.model,
                    latency_ms = span.latency,
                    cost,
                    "backend call succeeded"
                );
                Attempt::ok(span, completion.content)
            }
            Err(e) => {
                warn!(
                    trace_id,
                    provider = %backend.provider,
                    model = %backend.model,
                    error = %e,
                    "backend call failed"
                );
                Attempt::failed(timer.error(e.to_string()), false)
            }
        }
    }

    /// Cache-only attempt used by the race strategies. A miss yields a
    /// successful, uncached span with no payload.
    pub async fn lookup(
        &self,
        trace_id: &str,
        backend: &BackendConfig,
        messages: &[Message],
        namespace: Option<&str>,
    ) -> Attempt {
        let timer = SpanTimer::start(trace_id, &backend.provider, &backend.model);
        let key = self.key_for(backend, messages, namespace);
        match self.store.get(key.as_str()).await {
            Ok(Some(raw)) => self.hit(timer, messages, &raw),
            Ok(None) => {
                debug!(trace_id, key = %key, "cache-only lookup missed");
                Attempt::empty(timer.lookup_miss())
            }
            Err(e) => self.store_error(timer, trace_id, e),
        }
    }

    fn hit(&self, timer: SpanTimer, messages: &[Message], raw: &str) -> Attempt {
        let cached = CachedResponse::from_stored(raw, timer.provider(), timer.model());
        let est_in = self.estimator.count_messages(messages) as u64;
        let est_out = self.estimator.count(&cached.content) as u64;
        let savings = self.pricing.cost(timer.model(), est_in, est_out);
        let span = timer.hit(est_in, est_out, savings);
        debug!(
            trace_id = %span.trace_id,
            provider = %span.provider,
            model = %span.model,
            cached = true,
            estimated_savings = savings,
            "cache hit"
        );
        Attempt::ok(span, cached.content)
    }

    fn store_error(&self, timer: SpanTimer, trace_id: &str, e: Error) -> Attempt {
        warn!(
            trace_id,
            provider = %timer.provider(),
            model = %timer.model(),
            error = %e,
            "cache store lookup failed"
        );
        let store_failure = e.is_cache_unavailable();
        Attempt::failed(timer.error(e.to_string()), store_failure)
    }

    async fn call_and_store(
        &self,
        client: Arc<dyn BackendClient>,
        key: CacheKey,
        messages: Vec<Message>,
        model: String,
        temperature: f64,
    ) -> Result<Completion> {
        let timeout = client.timeout().unwrap_or(self.backend_timeout);
        let store = self.store.clone();
        let ttl = self.response_ttl;
        let cache_key = key.key.clone();

        let call = async move {
            let provider = client.provider().to_string();
            let completion = match tokio::time::timeout(
                timeout,
                client.complete(&messages, &model, temperature),
            )
            .await
            {
                Ok(Ok(c)) => c,
                Ok(Err(e)) => return Err(Arc::new(e)),
                Err(_) => {
                    return Err(Arc::new(Error::Timeout {
                        provider,
                        model,
                        timeout_ms: timeout.as_millis() as u64,
                    }))
                }
            };

            let payload = CachedResponse::new(completion.content.clone(), &provider, &model);
            let written = match payload.to_json() {
                Ok(json) => store.set(&cache_key, &json, Some(ttl)).await,
                Err(e) => Err(e),
            };
            // The payload is still returned when the write fails.
            if let Err(e) = written {
                warn!(key = %cache_key, error = %e, "failed to cache backend response");
            }
            Ok(completion)
        };

        let outcome: FlightOutcome = match &self.flights {
            Some(flights) => {
                let (out, leader) = flights.run(&key.key, || call).await;
                if !leader {
                    debug!(key = %key, "joined in-flight backend call");
                }
                out
            }
            None => call.await,
        };

        outcome.map_err(|e| match Arc::try_unwrap(e) {
            Ok(e) => e,
            Err(shared) => Error::Backend {
                provider: key.provider.clone(),
                model: key.model.clone(),
                status: None,
                message: shared.to_string(),
            },
        })
    }
}
