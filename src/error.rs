use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path that caused the error (e.g., "request.models[1].provider")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected value, upstream status)
    pub details: Option<String>,
    /// Source of the error (e.g., "request_validator", "redis_store")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the dispatch orchestrator.
///
/// Variants follow the dispatch error taxonomy; [`Error::status_code`] maps each
/// one onto the HTTP status the endpoint reports.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication error: {message}")]
    Auth { message: String },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Backend error ({provider}/{model}): {message}")]
    Backend {
        provider: String,
        model: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Backend timeout ({provider}/{model}) after {timeout_ms}ms")]
    Timeout {
        provider: String,
        model: String,
        timeout_ms: u64,
    },

    #[error("Cache store unavailable: {message}{}", format_context(.context))]
    CacheUnavailable {
        message: String,
        context: ErrorContext,
    },

    #[error("All backends missed cache ({attempted} attempted)")]
    AllMissed { attempted: usize },

    #[error("Not implemented: {feature}")]
    NotImplemented { feature: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Conflict: {what}")]
    Conflict { what: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn auth(msg: impl Into<String>) -> Self {
        Error::Auth {
            message: msg.into(),
        }
    }

    /// Validation error pointing at a request field.
    pub fn validation(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Validation {
            message: msg.into(),
            context: ErrorContext::new()
                .with_field_path(field)
                .with_source("request_validator"),
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn cache_unavailable(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::CacheUnavailable {
            message: msg.into(),
            context,
        }
    }

    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Validation { context, .. }
            | Error::CacheUnavailable { context, .. }
            | Error::Configuration { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// HTTP status reported by the dispatch endpoint for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Auth { .. } => 401,
            Error::Validation { .. } => 400,
            Error::Backend { .. } => 502,
            Error::Timeout { .. } => 504,
            Error::CacheUnavailable { .. } => 503,
            Error::AllMissed { .. } | Error::NotFound { .. } => 404,
            Error::NotImplemented { .. } => 501,
            Error::Conflict { .. } => 409,
            Error::Configuration { .. }
            | Error::Runtime { .. }
            | Error::Io(_)
            | Error::Serialization(_) => 500,
        }
    }

    /// Stable snake_case tag used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Auth { .. } => "auth_error",
            Error::Validation { .. } => "validation_error",
            Error::Backend { .. } => "backend_error",
            Error::Timeout { .. } => "timeout",
            Error::CacheUnavailable { .. } => "cache_unavailable",
            Error::AllMissed { .. } => "all_missed",
            Error::NotImplemented { .. } => "not_implemented",
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::Configuration { .. } => "configuration_error",
            Error::Runtime { .. } => "runtime_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }

    pub fn is_cache_unavailable(&self) -> bool {
        matches!(self, Error::CacheUnavailable { .. })
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::cache_unavailable(
            e.to_string(),
            ErrorContext::new().with_source("redis_store"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(Error::auth("missing key").status_code(), 401);
        assert_eq!(Error::validation("models", "empty").status_code(), 400);
        assert_eq!(Error::AllMissed { attempted: 2 }.status_code(), 404);
        assert_eq!(
            Error::NotImplemented {
                feature: "best-quality".into()
            }
            .status_code(),
            501
        );
        assert_eq!(
            Error::cache_unavailable("down", ErrorContext::new()).status_code(),
            503
        );
        assert_eq!(
            Error::Conflict {
                what: "trace t1 already exists".into()
            }
            .status_code(),
            409
        );
    }

    #[test]
    fn test_validation_display_includes_field_path() {
        let err = Error::validation("models[0].provider", "provider is required");
        let text = err.to_string();
        assert!(text.contains("provider is required"));
        assert!(text.contains("field: models[0].provider"));
        assert_eq!(err.kind(), "validation_error");
    }
}
