//! HTTP transport
//!
//! Thin axum layer in front of the dispatcher. It owns nothing but the
//! authentication gate and the status code mapping; command semantics live
//! entirely in `dbgate-core`.
//!
//! # Routes
//!
//! - `POST /`: run one command envelope
//! - `GET /health`: liveness probe, answers `{"status":"ok"}`

use axum::Router;
use dbgate_core::Dispatcher;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod command_endpoints;
mod http_error;

pub use command_endpoints::API_KEY_HEADER;
pub use http_error::{status_for, CommandReply, HttpError};

/// Application state shared across all endpoints
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            dispatcher,
            api_key: api_key.into(),
        }
    }
}

/// Create the router with CORS open to any origin and request tracing
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(command_endpoints::routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
