//! Error rendering for the HTTP surface.

use crate::dispatch::DispatchFailure;
use crate::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// An [`Error`] on its way out of a handler, plus the trace it belongs to.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub trace_id: Option<String>,
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            error,
            trace_id: None,
        }
    }
}

impl From<DispatchFailure> for ApiError {
    fn from(f: DispatchFailure) -> Self {
        Self {
            error: f.error,
            trace_id: f.trace_id,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(
                status = status.as_u16(),
                kind = self.error.kind(),
                trace_id = self.trace_id.as_deref(),
                error = %self.error,
                "request failed"
            );
        } else {
            debug!(status = status.as_u16(), kind = self.error.kind(), error = %self.error, "request rejected");
        }
        let body = ErrorBody {
            success: false,
            error: self.error.to_string(),
            kind: self.error.kind(),
            trace_id: self.trace_id,
        };
        (status, Json(body)).into_response()
    }
}
