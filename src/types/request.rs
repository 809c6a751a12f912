//! 调度请求：后端配置、策略枚举与请求校验。
//!
//! Dispatch request shape and validation.
//!
//! The endpoint parses the body into a [`serde_json::Value`] first and validates
//! it field by field, so every rejection carries the offending field path.

use crate::types::message::{Message, MessageRole};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

const MAX_TRACE_ID_LEN: usize = 128;

/// One candidate backend, supplied by the caller per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl BackendConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Execution strategy selected per dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
    #[serde(rename = "parallel")]
    Parallel,
    /// Same execution as [`Strategy::Parallel`]; no vote tallying is performed.
    #[serde(rename = "consensus")]
    Consensus,
    #[serde(rename = "fastest")]
    Fastest,
    #[serde(rename = "cheapest")]
    Cheapest,
    #[serde(rename = "best-quality")]
    BestQuality,
}

impl Strategy {
    pub const ALL: [Strategy; 5] = [
        Strategy::Parallel,
        Strategy::Consensus,
        Strategy::Fastest,
        Strategy::Cheapest,
        Strategy::BestQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Parallel => "parallel",
            Strategy::Consensus => "consensus",
            Strategy::Fastest => "fastest",
            Strategy::Cheapest => "cheapest",
            Strategy::BestQuality => "best-quality",
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Strategy::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| {
                Error::validation(
                    "strategy",
                    format!(
                        "unknown strategy '{}'; expected one of parallel, consensus, fastest, cheapest, best-quality",
                        s
                    ),
                )
            })
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated dispatch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub models: Vec<BackendConfig>,
    pub messages: Vec<Message>,
    pub strategy: Strategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl DispatchRequest {
    pub fn new(models: Vec<BackendConfig>, messages: Vec<Message>, strategy: Strategy) -> Self {
        Self {
            models,
            messages,
            strategy,
            trace_id: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Parse and validate a raw JSON body.
    pub fn from_json(body: &Value) -> Result<Self> {
        let obj = body
            .as_object()
            .ok_or_else(|| Error::validation("$", "request body must be a JSON object"))?;

        let models = match obj.get("models") {
            Some(Value::Array(arr)) if !arr.is_empty() => arr
                .iter()
                .enumerate()
                .map(|(i, m)| parse_backend(i, m))
                .collect::<Result<Vec<_>>>()?,
            Some(Value::Array(_)) => {
                return Err(Error::validation("models", "models must not be empty"))
            }
            _ => return Err(Error::validation("models", "models must be an array")),
        };

        let messages = match obj.get("messages") {
            Some(Value::Array(arr)) if !arr.is_empty() => arr
                .iter()
                .enumerate()
                .map(|(i, m)| parse_message(i, m))
                .collect::<Result<Vec<_>>>()?,
            Some(Value::Array(_)) => {
                return Err(Error::validation("messages", "messages must not be empty"))
            }
            _ => return Err(Error::validation("messages", "messages must be an array")),
        };

        let strategy = match obj.get("strategy") {
            Some(Value::String(s)) => s.parse::<Strategy>()?,
            _ => return Err(Error::validation("strategy", "strategy must be a string")),
        };

        let trace_id = match obj.get("traceId") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => {
                validate_trace_id(s)?;
                Some(s.clone())
            }
            Some(_) => return Err(Error::validation("traceId", "traceId must be a string")),
        };

        Ok(Self {
            models,
            messages,
            strategy,
            trace_id,
        })
    }

    /// Re-check invariants of a request built in code.
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::validation("models", "models must not be empty"));
        }
        for (i, m) in self.models.iter().enumerate() {
            if m.provider.trim().is_empty() {
                return Err(Error::validation(
                    format!("models[{}].provider", i),
                    "provider is required",
                ));
            }
            if m.model.trim().is_empty() {
                return Err(Error::validation(
                    format!("models[{}].model", i),
                    "model is required",
                ));
            }
        }
        if self.messages.is_empty() {
            return Err(Error::validation("messages", "messages must not be empty"));
        }
        if let Some(ref id) = self.trace_id {
            validate_trace_id(id)?;
        }
        Ok(())
    }
}

fn parse_backend(index: usize, value: &Value) -> Result<BackendConfig> {
    let field = |name: &str| format!("models[{}].{}", index, name);
    let obj = value
        .as_object()
        .ok_or_else(|| Error::validation(format!("models[{}]", index), "must be an object"))?;

    let provider = obj
        .get("provider")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::validation(field("provider"), "provider is required"))?;
    let model = obj
        .get("model")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::validation(field("model"), "model is required"))?;
    let temperature = match obj.get("temperature") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            v.as_f64()
                .filter(|t| t.is_finite() && *t >= 0.0)
                .ok_or_else(|| {
                    Error::validation(field("temperature"), "temperature must be a non-negative number")
                })?,
        ),
    };

    Ok(BackendConfig {
        provider: provider.to_string(),
        model: model.to_string(),
        temperature,
    })
}

fn parse_message(index: usize, value: &Value) -> Result<Message> {
    let field = |name: &str| format!("messages[{}].{}", index, name);
    let role = value
        .get("role")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::validation(field("role"), "role is required"))?;
    let role = MessageRole::parse(role).ok_or_else(|| {
        Error::validation(
            field("role"),
            format!("unknown role '{}'; expected system, user, assistant or tool", role),
        )
    })?;
    let content = value
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::validation(field("content"), "content must be a string"))?;
    Ok(Message::new(role, content))
}

fn validate_trace_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= MAX_TRACE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::validation(
            "traceId",
            "traceId must be 1-128 characters of [A-Za-z0-9_-]",
        ))
    }
}
