//! Wire types for the session API

use serde::{Deserialize, Serialize};

/// `GET /health` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine_version: String,
    pub api_version: String,
    pub stt_backends: Vec<String>,
    pub llm_models: Vec<String>,
}

/// Client-supplied settings for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub chunk_summary_prompt: String,
    pub final_summary_prompt: String,
    pub data_extraction_prompt: String,
    pub llm_model_name: String,
    pub output_dir: String,
    pub csv_export_path: String,
    pub append_csv: bool,
    /// Optional per-session override of the MAP chunking span.
    #[serde(default)]
    pub chunk_duration_seconds: Option<f64>,
}

/// `POST /start_session` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub session_id: String,
    pub model: String,
    pub sample_rate: u32,
    pub user_settings: UserSettings,
}

/// Plain `{"status": "ok"}` acknowledgment.
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub status: String,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// `POST /audio_chunk` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioChunkRequest {
    pub session_id: String,
    /// Client capture timestamp in seconds; informational only
    pub timestamp: f64,
    pub pcm_b64: String,
    pub sample_rate: u32,
}

/// `POST /audio_chunk` response.
#[derive(Debug, Serialize, Deserialize)]
pub struct AudioChunkResponse {
    pub status: String,
    pub buffered_seconds: f64,
    pub queue_depth: usize,
}

/// `POST /stop_session` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSessionRequest {
    pub session_id: String,
}

/// `POST /stop_session` response. Paths are absolute; null when the session
/// ended without that artifact.
#[derive(Debug, Serialize, Deserialize)]
pub struct StopSessionResponse {
    pub status: String,
    pub summary_path: Option<String>,
    pub data_path: Option<String>,
    pub csv_path: Option<String>,
    pub session_status: String,
}
