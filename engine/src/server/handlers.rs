//! Request handlers for the session API

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineMode;
use crate::error::EngineError;
use crate::session::registry::Lookup;
use crate::session::{Session, SessionConfig};
use crate::stt;
use crate::summarizer::{PromptTemplates, Summarizer};

use super::types::*;
use super::{authorize, ApiError, AppState};

type HandlerResult<T> = Result<Json<T>, ApiError>;

/// `GET /health`: version, advertised backends, and discovered LLM models.
pub async fn health(state: State<AppState>) -> HandlerResult<HealthResponse> {
    // An unreachable runtime is not a health failure; it just means no
    // models can be advertised yet.
    let llm_models = state.llm.list_models().await.unwrap_or_default();

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        engine_version: env!("CARGO_PKG_VERSION").to_string(),
        api_version: "1".to_string(),
        stt_backends: stt::available_backends(state.config.server.mode)
            .into_iter()
            .map(String::from)
            .collect(),
        llm_models,
    }))
}

/// `POST /start_session`: validate, verify backends, create the session.
pub async fn start_session(
    state: State<AppState>,
    headers: HeaderMap,
    body: Result<Json<StartSessionRequest>, JsonRejection>,
) -> HandlerResult<OkResponse> {
    authorize(&state, &headers)?;
    let Json(request) = body.map_err(invalid_body)?;

    validate_start_request(&request, state.config.server.mode)?;

    let templates = PromptTemplates {
        chunk_summary: request.user_settings.chunk_summary_prompt.clone(),
        final_summary: request.user_settings.final_summary_prompt.clone(),
        data_extraction: request.user_settings.data_extraction_prompt.clone(),
    };
    templates.validate()?;

    state.registry.check_can_start(&request.session_id).await?;

    // Production mode fails fast when the LLM runtime or the configured
    // model is missing, before any expensive STT model load.
    if state.config.server.mode == EngineMode::Prod {
        state
            .llm
            .ensure_model(&request.user_settings.llm_model_name)
            .await
            .map_err(|e| e.into_unavailable(&request.user_settings.llm_model_name))?;
    }

    let backend = request.model.clone();
    let sample_rate = request.sample_rate;
    let stt_config = state.config.stt.clone();
    let mode = state.config.server.mode;
    let transcriber = tokio::task::spawn_blocking(move || {
        stt::create_transcriber(&backend, sample_rate, &stt_config, mode)
    })
    .await
    .map_err(|e| EngineError::internal(format!("STT load task failed: {e}")))??;

    let summarizer = Summarizer::new(
        std::sync::Arc::new(state.llm.clone()),
        request.user_settings.llm_model_name.clone(),
        templates,
        state.llm_permits.clone(),
    );

    let session_config = SessionConfig {
        session_id: request.session_id.clone(),
        backend: request.model.clone(),
        sample_rate: request.sample_rate,
        llm_model: request.user_settings.llm_model_name.clone(),
        output_dir: request.user_settings.output_dir.clone(),
        csv_export_path: request.user_settings.csv_export_path.clone(),
        append_csv: request.user_settings.append_csv,
        chunk_duration_seconds: request
            .user_settings
            .chunk_duration_seconds
            .unwrap_or(state.config.session.chunk_duration_seconds),
    };

    let session = Session::start(
        session_config,
        state.config.session.clone(),
        state.config.guard.clone(),
        transcriber,
        summarizer,
        state.csv_lock.clone(),
        state.config.output.meeting_folders,
    );

    if let Err(err) = state.registry.register(session.clone()).await {
        // Lost an admission race; tear the session back down.
        session.abort().await;
        return Err(err.into());
    }

    info!(
        session_id = %request.session_id,
        backend = %request.model,
        sample_rate = request.sample_rate,
        llm_model = %request.user_settings.llm_model_name,
        "session started"
    );

    Ok(Json(OkResponse::ok()))
}

/// `POST /audio_chunk`: decode and transcribe one PCM chunk.
pub async fn audio_chunk(
    state: State<AppState>,
    headers: HeaderMap,
    body: Result<Json<AudioChunkRequest>, JsonRejection>,
) -> HandlerResult<AudioChunkResponse> {
    authorize(&state, &headers)?;
    let Json(request) = body.map_err(invalid_body)?;

    let session = match state.registry.lookup(&request.session_id).await {
        Lookup::Active(session) => session,
        Lookup::Terminal(_) => {
            return Err(EngineError::SessionAlreadyStopped {
                session_id: request.session_id,
            }
            .into())
        }
        Lookup::Unknown => {
            return Err(EngineError::SessionNotFound {
                session_id: request.session_id,
            }
            .into())
        }
    };

    debug!(
        session_id = %request.session_id,
        timestamp = request.timestamp,
        bytes = request.pcm_b64.len(),
        "audio chunk received"
    );

    let outcome = session
        .push_chunk(&request.pcm_b64, request.sample_rate)
        .await?;

    Ok(Json(AudioChunkResponse {
        status: "ok".to_string(),
        buffered_seconds: outcome.buffered_seconds,
        queue_depth: outcome.queue_depth,
    }))
}

/// `POST /stop_session`: finalize and persist; idempotent for terminal ids.
pub async fn stop_session(
    state: State<AppState>,
    headers: HeaderMap,
    body: Result<Json<StopSessionRequest>, JsonRejection>,
) -> HandlerResult<StopSessionResponse> {
    authorize(&state, &headers)?;
    let Json(request) = body.map_err(invalid_body)?;

    let session: std::sync::Arc<Session> = match state.registry.lookup(&request.session_id).await {
        Lookup::Active(session) => session,
        Lookup::Terminal(outcome) => {
            return Ok(Json(stop_response("already_stopped", &outcome)));
        }
        Lookup::Unknown => {
            return Err(EngineError::SessionNotFound {
                session_id: request.session_id,
            }
            .into())
        }
    };

    match session.stop().await {
        Ok(result) => {
            state
                .registry
                .finish(&request.session_id, result.outcome.clone())
                .await;

            let status = if result.already_stopped {
                "already_stopped"
            } else {
                "ok"
            };
            Ok(Json(stop_response(status, &result.outcome)))
        }
        Err(err) => {
            // The session reached a terminal state even though stop failed;
            // retire it and report any artifacts that did land on disk.
            let mut details = serde_json::Map::new();
            if let Some(outcome) = session.outcome().await {
                for (key, path) in [
                    ("summary_path", &outcome.paths.summary_path),
                    ("data_path", &outcome.paths.data_path),
                    ("csv_path", &outcome.paths.csv_path),
                ] {
                    if let Some(path) = path {
                        details.insert(
                            key.to_string(),
                            serde_json::Value::String(path.display().to_string()),
                        );
                    }
                }
                state.registry.finish(&request.session_id, outcome).await;
            }
            Err(ApiError::with_details(err, details))
        }
    }
}

fn stop_response(status: &str, outcome: &crate::session::SessionOutcome) -> StopSessionResponse {
    let path_string =
        |path: &Option<std::path::PathBuf>| path.as_ref().map(|p| p.display().to_string());

    StopSessionResponse {
        status: status.to_string(),
        summary_path: path_string(&outcome.paths.summary_path),
        data_path: path_string(&outcome.paths.data_path),
        csv_path: path_string(&outcome.paths.csv_path),
        session_status: outcome.state.as_str().to_string(),
    }
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    EngineError::invalid_request(rejection.body_text()).into()
}

fn validate_start_request(
    request: &StartSessionRequest,
    mode: EngineMode,
) -> Result<(), EngineError> {
    if Uuid::parse_str(&request.session_id).is_err() {
        return Err(EngineError::invalid_request(
            "session_id must be a UUID string",
        ));
    }
    if !stt::is_known_backend(&request.model, mode) {
        return Err(EngineError::invalid_request(format!(
            "unknown model {:?}; expected one of {:?}",
            request.model,
            stt::available_backends(mode)
        )));
    }
    if !(crate::audio::MIN_SAMPLE_RATE..=crate::audio::MAX_SAMPLE_RATE)
        .contains(&request.sample_rate)
    {
        return Err(EngineError::invalid_request(format!(
            "sample_rate {} outside supported range",
            request.sample_rate
        )));
    }
    if request.user_settings.llm_model_name.trim().is_empty() {
        return Err(EngineError::invalid_request("llm_model_name must be set"));
    }
    if request.user_settings.output_dir.trim().is_empty() {
        return Err(EngineError::invalid_request("output_dir must be set"));
    }
    if request.user_settings.csv_export_path.trim().is_empty() {
        return Err(EngineError::invalid_request("csv_export_path must be set"));
    }
    if let Some(chunk_seconds) = request.user_settings.chunk_duration_seconds {
        if !(chunk_seconds.is_finite() && chunk_seconds > 0.0) {
            return Err(EngineError::invalid_request(
                "chunk_duration_seconds must be positive",
            ));
        }
    }
    Ok(())
}
