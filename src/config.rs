//! Server configuration: YAML file, environment overrides, validation.

use crate::backend::BackendSettings;
use crate::cache::{DEFAULT_NAMESPACE, DEFAULT_TEMPERATURE};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::tokens::{ModelPricing, PricingTable};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub listen_addr: String,
    /// Prefix for `observability.traceUrl`.
    pub public_base_url: String,
    /// `None` keeps everything in an in-process store.
    pub redis_url: Option<String>,
    pub response_ttl_secs: u64,
    pub trace_ttl_secs: u64,
    pub backend_timeout_secs: u64,
    pub max_concurrency: usize,
    pub default_temperature: f64,
    pub default_namespace: String,
    pub single_flight: bool,
    pub cancel_race_losers: bool,
    pub cache_retry: RetryConfig,
    pub cache_breaker: CircuitBreakerConfig,
    pub telemetry_buffer: usize,
    /// Capacity of the in-process store when no redis url is set.
    pub memory_store_capacity: usize,
    pub backends: Vec<BackendSettings>,
    /// Extra or overriding model prices.
    pub pricing: Vec<ModelPricing>,
    pub log_format: LogFormat,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".into(),
            public_base_url: "http://127.0.0.1:8080".into(),
            redis_url: None,
            response_ttl_secs: 7 * 24 * 60 * 60,
            trace_ttl_secs: 7 * 24 * 60 * 60,
            backend_timeout_secs: 30,
            max_concurrency: 8,
            default_temperature: DEFAULT_TEMPERATURE,
            default_namespace: DEFAULT_NAMESPACE.into(),
            single_flight: true,
            cancel_race_losers: true,
            cache_retry: RetryConfig::default(),
            cache_breaker: CircuitBreakerConfig::default(),
            telemetry_buffer: 1024,
            memory_store_capacity: 10_000,
            backends: Vec::new(),
            pricing: Vec::new(),
            log_format: LogFormat::Text,
        }
    }
}

fn config_error(field: &str, msg: impl Into<String>) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("dispatch_config"),
    )
}

impl DispatchConfig {
    /// Load a YAML file, then apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)?.apply_env()
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        Self::default().apply_env()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid configuration: {}", e),
                ErrorContext::new().with_source("dispatch_config"),
            )
        })
    }

    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_from(|k| std::env::var(k).ok())
    }

    /// Apply `DISPATCH_*` overrides read through `lookup`, then validate.
    pub fn apply_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse::<T>()
                .map_err(|_| config_error(key, format!("cannot parse {}={:?}", key, raw)))
        }

        if let Some(v) = lookup("DISPATCH_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("DISPATCH_PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }
        if let Some(v) = lookup("DISPATCH_REDIS_URL") {
            self.redis_url = Some(v).filter(|s| !s.is_empty());
        }
        if let Some(v) = lookup("DISPATCH_RESPONSE_TTL_SECS") {
            self.response_ttl_secs = parse("DISPATCH_RESPONSE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("DISPATCH_TRACE_TTL_SECS") {
            self.trace_ttl_secs = parse("DISPATCH_TRACE_TTL_SECS", v)?;
        }
        if let Some(v) = lookup("DISPATCH_BACKEND_TIMEOUT_SECS") {
            self.backend_timeout_secs = parse("DISPATCH_BACKEND_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("DISPATCH_MAX_CONCURRENCY") {
            self.max_concurrency = parse("DISPATCH_MAX_CONCURRENCY", v)?;
        }
        if let Some(v) = lookup("DISPATCH_SINGLE_FLIGHT") {
            self.single_flight = parse("DISPATCH_SINGLE_FLIGHT", v)?;
        }
        if let Some(v) = lookup("DISPATCH_LOG_FORMAT") {
            self.log_format = match v.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" => LogFormat::Text,
                _ => return Err(config_error("log_format", format!("unknown log format {:?}", v))),
            };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        if self.max_concurrency == 0 {
            return Err(config_error("max_concurrency", "must be at least 1"));
        }
        if self.response_ttl_secs == 0 {
            return Err(config_error("response_ttl_secs", "must be positive"));
        }
        if self.trace_ttl_secs == 0 {
            return Err(config_error("trace_ttl_secs", "must be positive"));
        }
        if self.backend_timeout_secs == 0 {
            return Err(config_error("backend_timeout_secs", "must be positive"));
        }
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(config_error("default_temperature", "must be within 0.0..=2.0"));
        }
        if self.default_namespace.is_empty() {
            return Err(config_error("default_namespace", "must not be empty"));
        }
        url::Url::parse(&self.public_base_url)
            .map_err(|e| config_error("public_base_url", e.to_string()))?;
        for (i, b) in self.backends.iter().enumerate() {
            if b.provider.is_empty() {
                return Err(config_error(&format!("backends[{}].provider", i), "is required"));
            }
            url::Url::parse(&b.base_url)
                .map_err(|e| config_error(&format!("backends[{}].base_url", i), e.to_string()))?;
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr
            .parse()
            .map_err(|_| config_error("listen_addr", format!("invalid address {:?}", self.listen_addr)))
    }

    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }

    pub fn trace_ttl(&self) -> Duration {
        Duration::from_secs(self.trace_ttl_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    pub fn pricing_table(&self) -> PricingTable {
        self.pricing
            .iter()
            .cloned()
            .fold(PricingTable::builtin(), PricingTable::with_price)
    }

    /// `<public_base_url>/api/traces/<trace_id>`
    pub fn trace_url(&self, trace_id: &str) -> String {
        format!(
            "{}/api/traces/{}",
            self.public_base_url.trim_end_matches('/'),
            trace_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ApiStyle;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = DispatchConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.response_ttl(), Duration::from_secs(604_800));
        assert_eq!(cfg.trace_url("abc"), "http://127.0.0.1:8080/api/traces/abc");
    }

    #[test]
    fn test_yaml_with_backends_and_pricing() {
        let cfg = DispatchConfig::from_yaml_str(
            r#"
listen_addr: "0.0.0.0:9000"
public_base_url: "https://dispatch.example.com/"
max_concurrency: 4
cache_breaker:
  failure_threshold: 3
backends:
  - provider: openai
    base_url: https://api.openai.com/v1
  - provider: anthropic
    base_url: https://api.anthropic.com/v1
    api_style: anthropic
    timeout_secs: 60
pricing:
  - model: in-house-7b
    input_per_million: 0.01
    output_per_million: 0.02
"#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.max_concurrency, 4);
        assert_eq!(cfg.cache_breaker.failure_threshold, 3);
        assert_eq!(cfg.cache_breaker.cooldown_secs, 30);
        assert_eq!(cfg.backends[0].api_style, ApiStyle::OpenAi);
        assert_eq!(cfg.backends[1].api_style, ApiStyle::Anthropic);
        assert_eq!(cfg.backends[1].timeout_secs, Some(60));
        assert!((cfg.pricing_table().unit_cost("in-house-7b") - 0.03).abs() < 1e-12);
        assert_eq!(
            cfg.trace_url("t"),
            "https://dispatch.example.com/api/traces/t"
        );
    }

    #[test]
    fn test_env_overrides() {
        let cfg = DispatchConfig::default()
            .apply_env_from(env(&[
                ("DISPATCH_MAX_CONCURRENCY", "2"),
                ("DISPATCH_REDIS_URL", "redis://localhost:6379"),
                ("DISPATCH_SINGLE_FLIGHT", "false"),
                ("DISPATCH_LOG_FORMAT", "JSON"),
            ]))
            .unwrap();
        assert_eq!(cfg.max_concurrency, 2);
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert!(!cfg.single_flight);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for pairs in [
            vec![("DISPATCH_MAX_CONCURRENCY", "0")],
            vec![("DISPATCH_TRACE_TTL_SECS", "0")],
            vec![("DISPATCH_LISTEN_ADDR", "not an address")],
            vec![("DISPATCH_BACKEND_TIMEOUT_SECS", "soon")],
            vec![("DISPATCH_LOG_FORMAT", "xml")],
        ] {
            let err = DispatchConfig::default()
                .apply_env_from(env(&pairs))
                .unwrap_err();
            assert_eq!(err.kind(), "configuration_error", "{:?}", pairs);
        }
    }
}
