//! HTTP front-end: routing, API-key auth, error rendering.
//!
//! One `POST /{tool}` route serves every discovered tool; `GET /tools` lists
//! the catalog; `GET /health` is the unauthenticated readiness probe.

use crate::backend::ToolBackend;
use crate::error::BridgeError;
use crate::protocol;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn ToolBackend>,
    pub api_key: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/{tool}", post(call_tool))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "bridge": state.backend.status() }))
}

async fn list_tools(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    Json(json!({ "tools": state.backend.list_tools() })).into_response()
}

async fn call_tool(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    // An empty body means "no arguments"; anything else must be a JSON object.
    let arguments = if body.is_empty() {
        json!({})
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => {
                return error_body(
                    StatusCode::BAD_REQUEST,
                    "invalid_body",
                    "request body must be a JSON object",
                );
            }
            Err(e) => {
                return error_body(
                    StatusCode::BAD_REQUEST,
                    "invalid_body",
                    &format!("request body is not valid JSON: {e}"),
                );
            }
        }
    };

    match state.backend.call_tool(&tool, arguments).await {
        Ok(payload) => (StatusCode::OK, Json(payload)).into_response(),
        Err(e) => error_response(&tool, e),
    }
}

/// Pull the API key out of `x-api-key` or `Authorization: Bearer`.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers.get("x-api-key").and_then(|h| h.to_str().ok()) {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    let token = authz.strip_prefix("Bearer ").map(str::trim)?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Auth runs before anything is parsed or dispatched; a rejected request
/// never reaches the child.
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    match extract_api_key(headers) {
        Some(key) if key == state.api_key => Ok(()),
        Some(_) => Err(error_body(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid API key",
        )),
        None => Err(error_body(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "API key is required",
        )),
    }
}

fn error_body(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "code": code, "message": message }))).into_response()
}

fn error_response(tool: &str, err: BridgeError) -> Response {
    match err {
        BridgeError::UnknownTool(name) => error_body(
            StatusCode::NOT_FOUND,
            "unknown_tool",
            &format!("no such tool '{name}'"),
        ),
        BridgeError::InvalidArguments {
            message, violations, ..
        } => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "code": "invalid_arguments",
                "message": message,
                "violations": violations,
            })),
        )
            .into_response(),
        BridgeError::Unavailable { state } => error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            &format!("tool server is {state}"),
        ),
        BridgeError::Timeout(timeout) => error_body(
            StatusCode::GATEWAY_TIMEOUT,
            "timeout",
            &format!(
                "no reply from tool '{tool}' within {}ms",
                timeout.as_millis()
            ),
        ),
        BridgeError::Upstream { code, message, .. } => {
            let status = match code {
                protocol::INVALID_PARAMS => StatusCode::BAD_REQUEST,
                protocol::METHOD_NOT_FOUND => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_GATEWAY,
            };
            (
                status,
                Json(json!({ "code": "tool_error", "message": message, "jsonrpcCode": code })),
            )
                .into_response()
        }
        BridgeError::ToolFailed { message, .. } => {
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "tool_failed", &message)
        }
        BridgeError::Startup(_) | BridgeError::Discovery(_) => error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            &err.to_string(),
        ),
        BridgeError::Protocol(_) | BridgeError::Io(_) | BridgeError::Json(_) => {
            tracing::error!(error = %err, tool, "bridge error while serving call");
            error_body(
                StatusCode::BAD_GATEWAY,
                "bridge_error",
                "communication with the tool server failed",
            )
        }
    }
}
