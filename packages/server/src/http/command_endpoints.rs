//! Command and health endpoints
//!
//! `POST /` carries one command envelope. The shared secret is read from the
//! `x-api-key` header, falling back to the envelope's `apikey` field, and is
//! checked before anything is parsed further or dispatched.

use super::http_error::{CommandReply, HttpError};
use super::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use dbgate_core::GatewayError;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;

pub const API_KEY_HEADER: &str = "x-api-key";

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", post(run_command))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn run_command(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<CommandReply, HttpError> {
    let envelope = serde_json::from_slice::<Value>(&body);

    let supplied = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            envelope
                .as_ref()
                .ok()
                .and_then(|v| v.get("apikey"))
                .and_then(Value::as_str)
        });
    if !key_matches(supplied, &state.api_key) {
        tracing::warn!("🔒 Rejected command with missing or invalid api key");
        return Err(HttpError::unauthorized());
    }

    let envelope = envelope
        .map_err(|e| GatewayError::bad_request(format!("malformed JSON body: {}", e)))?;

    Ok(CommandReply(state.dispatcher.dispatch(envelope).await))
}

/// Compare the shared secret in constant time
fn key_matches(supplied: Option<&str>, expected: &str) -> bool {
    supplied.map_or(false, |key| {
        bool::from(key.as_bytes().ct_eq(expected.as_bytes()))
    })
}
