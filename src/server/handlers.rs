//! Route handlers.

use super::error::ApiError;
use super::AppState;
use crate::auth::Identity;
use crate::dispatch::DispatchContext;
use crate::types::{BackendResult, DispatchRequest, Trace};
use crate::Error;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const NAMESPACE_HEADER: &str = "x-cache-namespace";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Observability {
    pub trace_url: String,
    pub total_latency: u64,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub errors: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    pub trace_id: String,
    pub strategy: String,
    pub models: usize,
    pub results: Vec<BackendResult>,
    pub observability: Observability,
}

impl DispatchResponse {
    fn from_trace(trace: Trace, trace_url: String) -> Self {
        Self {
            success: true,
            strategy: trace.strategy.as_str().to_string(),
            models: trace.models_requested,
            observability: Observability {
                trace_url,
                total_latency: trace.total_latency,
                cache_hits: trace.cache_hits,
                cache_misses: trace.cache_misses,
                cache_hit_rate: trace.cache_hit_rate(),
                errors: trace.errors,
            },
            trace_id: trace.trace_id,
            results: trace.results,
        }
    }
}

/// `Authorization: Bearer <key>` or `X-API-Key: <key>`.
pub fn credential(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .or_else(|| headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()))
}

fn namespace(headers: &HeaderMap) -> Result<Option<String>, Error> {
    let Some(raw) = headers.get(NAMESPACE_HEADER) else {
        return Ok(None);
    };
    let ns = raw
        .to_str()
        .map_err(|_| Error::validation(NAMESPACE_HEADER, "must be visible ASCII"))?
        .trim();
    if ns.is_empty() {
        return Ok(None);
    }
    if ns.len() > 128 || ns.contains(':') {
        return Err(Error::validation(
            NAMESPACE_HEADER,
            "must be at most 128 characters and contain no ':'",
        ));
    }
    Ok(Some(ns.to_string()))
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    Ok(state.auth.authenticate(credential(headers)).await?)
}

pub async fn dispatch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DispatchResponse>, ApiError> {
    let identity = authenticate(&state, &headers).await?;

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| Error::validation("body", format!("invalid JSON: {}", e)))?;
    let request = DispatchRequest::from_json(&value)?;

    let mut ctx = DispatchContext::new(identity.handle);
    if let Some(ns) = namespace(&headers)? {
        ctx = ctx.with_namespace(ns);
    }

    let trace = state.dispatcher.dispatch(&request, &ctx).await?;
    let trace_url = state.config.trace_url(&trace.trace_id);
    Ok(Json(DispatchResponse::from_trace(trace, trace_url)))
}

pub async fn get_trace(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(trace_id): Path<String>,
) -> Result<Json<Trace>, ApiError> {
    authenticate(&state, &headers).await?;
    Ok(Json(state.dispatcher.trace(&trace_id).await?))
}

pub async fn invalidate_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    authenticate(&state, &headers).await?;
    let deleted = state.dispatcher.invalidate(&key).await?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "store": state.store_name }))
}
