//! HTTP backend client for OpenAI-compatible and Anthropic Messages APIs.

use super::{BackendClient, Completion, Usage};
use crate::types::{Message, MessageRole};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const KEYRING_SERVICE: &str = "ai-dispatch";

/// Wire format spoken by an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    /// `POST {base}/chat/completions`, bearer auth, `choices[0].message.content`.
    #[default]
    OpenAi,
    /// `POST {base}/messages`, `x-api-key`, top-level `system`, `content[0].text`.
    Anthropic,
}

/// One configured upstream provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    pub provider: String,
    pub base_url: String,
    #[serde(default)]
    pub api_style: ApiStyle,
    /// Environment variable holding the key; defaults to `<PROVIDER>_API_KEY`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Per-provider override of the global backend timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl BackendSettings {
    pub fn new(provider: impl Into<String>, base_url: impl Into<String>, api_style: ApiStyle) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into(),
            api_style,
            api_key_env: None,
            timeout_secs: None,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }
}

pub struct HttpBackend {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    api_style: ApiStyle,
    api_key: Option<String>,
    timeout: Option<Duration>,
}

impl HttpBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let api_key = Self::get_api_key(&settings.provider, settings.api_key_env.as_deref());
        Self::with_api_key(settings, api_key)
    }

    /// Build with an explicit key instead of the keyring/environment lookup.
    pub fn with_api_key(settings: &BackendSettings, api_key: Option<String>) -> Result<Self> {
        let timeout = settings.timeout_secs.map(Duration::from_secs);

        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(
                env::var("DISPATCH_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }

        let client = builder.build().map_err(|e| {
            Error::configuration_with_context(
                format!("failed to build HTTP client: {}", e),
                ErrorContext::new()
                    .with_field_path(format!("backends.{}", settings.provider))
                    .with_source("http_backend"),
            )
        })?;

        Ok(Self {
            client,
            provider: settings.provider.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_style: settings.api_style,
            api_key,
            timeout,
        })
    }

    fn get_api_key(provider: &str, env_var: Option<&str>) -> Option<String> {
        // 1. Try Keyring
        if let Ok(entry) = Entry::new(KEYRING_SERVICE, provider) {
            if let Ok(key) = entry.get_password() {
                return Some(key);
            }
        }

        // 2. Try Environment Variable (configured name, else PROVIDER_API_KEY)
        let var = env_var.map(str::to_string).unwrap_or_else(|| {
            format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"))
        });
        env::var(var).ok().filter(|k| !k.is_empty())
    }

    fn endpoint(&self) -> String {
        match self.api_style {
            ApiStyle::OpenAi => format!("{}/chat/completions", self.base_url),
            ApiStyle::Anthropic => format!("{}/messages", self.base_url),
        }
    }

    fn build_body(&self, messages: &[Message], model: &str, temperature: f64) -> Value {
        match self.api_style {
            ApiStyle::OpenAi => {
                let msgs: Vec<Value> = messages
                    .iter()
                    .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                    .collect();
                json!({
                    "model": model,
                    "messages": msgs,
                    "temperature": temperature,
                })
            }
            ApiStyle::Anthropic => {
                let (system, msgs) = split_system_messages(messages);
                let mut body = json!({
                    "model": model,
                    "messages": msgs,
                    "max_tokens": DEFAULT_MAX_TOKENS,
                    "temperature": temperature,
                });
                if let Some(sys) = system {
                    body["system"] = Value::String(sys);
                }
                body
            }
        }
    }

    fn parse_body(&self, model: &str, body: &Value) -> Result<Completion> {
        let (content, usage) = match self.api_style {
            ApiStyle::OpenAi => (
                body.pointer("/choices/0/message/content")
                    .and_then(|v| v.as_str()),
                Usage {
                    input_tokens: body
                        .pointer("/usage/prompt_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                    output_tokens: body
                        .pointer("/usage/completion_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                },
            ),
            ApiStyle::Anthropic => (
                body.pointer("/content/0/text").and_then(|v| v.as_str()),
                Usage {
                    input_tokens: body
                        .pointer("/usage/input_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                    output_tokens: body
                        .pointer("/usage/output_tokens")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                },
            ),
        };
        let content = content.ok_or_else(|| Error::Backend {
            provider: self.provider.clone(),
            model: model.to_string(),
            status: None,
            message: "response did not contain generated text".into(),
        })?;
        Ok(Completion {
            content: content.to_string(),
            usage,
        })
    }

    fn transport_error(&self, model: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            return Error::Timeout {
                provider: self.provider.clone(),
                model: model.to_string(),
                timeout_ms: self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            };
        }
        Error::Backend {
            provider: self.provider.clone(),
            model: model.to_string(),
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Anthropic takes system prompts as a top-level parameter, not as messages.
fn split_system_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut rest: Vec<Value> = Vec::new();
    for m in messages {
        match m.role {
            MessageRole::System => system_parts.push(&m.content),
            MessageRole::Assistant => rest.push(json!({
                "role": "assistant",
                "content": [{ "type": "text", "text": m.content }],
            })),
            MessageRole::User | MessageRole::Tool => rest.push(json!({
                "role": "user",
                "content": [{ "type": "text", "text": m.content }],
            })),
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, rest)
}

/// Pull the provider's own message out of an error body when there is one.
fn upstream_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| body.chars().take(512).collect())
}

#[async_trait]
impl BackendClient for HttpBackend {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        temperature: f64,
    ) -> Result<Completion> {
        let url = self.endpoint();
        let body = self.build_body(messages, model, temperature);

        let mut req = self.client.post(&url).json(&body);
        match (self.api_style, &self.api_key) {
            (ApiStyle::OpenAi, Some(key)) => req = req.bearer_auth(key),
            (ApiStyle::Anthropic, Some(key)) => req = req.header("x-api-key", key),
            (_, None) => {}
        }
        if self.api_style == ApiStyle::Anthropic {
            req = req.header("anthropic-version", ANTHROPIC_VERSION);
        }

        debug!(provider = %self.provider, model, url = %url, "calling upstream backend");
        let resp = req
            .send()
            .await
            .map_err(|e| self.transport_error(model, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Backend {
                provider: self.provider.clone(),
                model: model.to_string(),
                status: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status.as_u16(), upstream_message(&text)),
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| self.transport_error(model, e))?;
        self.parse_body(model, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(style: ApiStyle) -> HttpBackend {
        HttpBackend::with_api_key(&BackendSettings::new("p", "http://localhost/v1/", style), None)
            .unwrap()
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        assert_eq!(
            backend(ApiStyle::OpenAi).endpoint(),
            "http://localhost/v1/chat/completions"
        );
        assert_eq!(
            backend(ApiStyle::Anthropic).endpoint(),
            "http://localhost/v1/messages"
        );
    }

    #[test]
    fn test_anthropic_body_lifts_system_prompt() {
        let b = backend(ApiStyle::Anthropic);
        let body = b.build_body(
            &[Message::system("be brief"), Message::user("hi")],
            "claude-3-haiku",
            0.2,
        );
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
    }

    #[test]
    fn test_parse_openai_usage() {
        let b = backend(ApiStyle::OpenAi);
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 5 }
        });
        let c = b.parse_body("gpt-4o", &body).unwrap();
        assert_eq!(c.content, "hello");
        assert_eq!(c.usage.input_tokens, 3);
        assert_eq!(c.usage.output_tokens, 5);
    }

    #[test]
    fn test_missing_content_is_backend_error() {
        let b = backend(ApiStyle::Anthropic);
        let err = b.parse_body("m", &json!({ "content": [] })).unwrap_err();
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn test_upstream_message_extraction() {
        assert_eq!(
            upstream_message(r#"{"error":{"message":"rate limited"}}"#),
            "rate limited"
        );
        assert_eq!(upstream_message(r#"{"error":"bad key"}"#), "bad key");
        assert_eq!(upstream_message("plain text"), "plain text");
    }
}
