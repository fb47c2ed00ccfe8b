//! HTTP session API
//!
//! Thin axum layer over the session registry: request parsing and
//! validation, token auth, and the unified error body. Handlers never hold
//! registry state across LLM or STT calls.

mod handlers;
pub mod types;


use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorBody};
use crate::llm::OllamaClient;
use crate::output::CsvLock;
use crate::session::registry::SessionRegistry;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub registry: Arc<SessionRegistry>,
    pub llm: OllamaClient,
    pub llm_permits: Arc<Semaphore>,
    pub csv_lock: CsvLock,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let llm = OllamaClient::new(&config.llm)?;
        let llm_permits = Arc::new(Semaphore::new(config.llm.max_concurrent_calls));
        let registry = Arc::new(SessionRegistry::new(config.session.max_concurrent_sessions));

        Ok(Self {
            config: Arc::new(config),
            registry,
            llm,
            llm_permits,
            csv_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }
}

/// API-facing error wrapper rendering the unified error body.
pub struct ApiError {
    error: EngineError,
    extra_details: serde_json::Map<String, serde_json::Value>,
}

impl ApiError {
    pub fn with_details(
        error: EngineError,
        extra_details: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            error,
            extra_details,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        Self {
            error,
            extra_details: serde_json::Map::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = ErrorBody::from_error(&self.error);
        body.details.extend(self.extra_details);
        (status, Json(body)).into_response()
    }
}

/// Build the engine router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/start_session", post(handlers::start_session))
        .route("/audio_chunk", post(handlers::audio_chunk))
        .route("/stop_session", post(handlers::stop_session))
        .with_state(state)
}

/// Reject requests without the configured engine token. `/health` is exempt
/// and does not call this.
fn authorize(state: &State<AppState>, headers: &axum::http::HeaderMap) -> Result<(), EngineError> {
    if !state.config.auth_enabled() {
        return Ok(());
    }

    let presented = headers
        .get("x-engine-token")
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(token) if token == state.config.server.auth_token => Ok(()),
        _ => Err(EngineError::Unauthorized),
    }
}
