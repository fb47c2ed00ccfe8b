//! Global error types and error handling utilities

use serde::{Deserialize, Serialize};

/// Main engine error type that encompasses all failures surfaced to callers.
///
/// Every variant maps to a stable `error_code` token and an HTTP status, so
/// the API layer can render the unified error body without inspecting the
/// failure site.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Missing or incorrect engine token")]
    Unauthorized,

    #[error("Unknown session: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("Another session is already active: {active_id}")]
    SessionAlreadyActive { active_id: String },

    #[error("Session id was already used: {session_id}")]
    SessionAlreadyExists { session_id: String },

    #[error("Session {session_id} is still starting")]
    SessionNotReady { session_id: String },

    #[error("Session {session_id} has already stopped")]
    SessionAlreadyStopped { session_id: String },

    #[error("Invalid audio payload: {message}")]
    InvalidAudioFormat { message: String },

    #[error("Transcript queue depth {depth} exceeds limit {limit}")]
    EngineOverloaded { depth: usize, limit: usize },

    #[error("STT backend unavailable: {message}")]
    SttBackendUnavailable { message: String },

    #[error("STT backend failure: {message}")]
    SttBackendFailure { message: String },

    #[error("LLM runtime unavailable: {message}")]
    LlmUnavailable { message: String, hint: Option<String> },

    #[error("MAP worker failed to drain within {timeout_secs}s")]
    MapStall { timeout_secs: u64 },

    #[error("Failed to write output artifact: {message}")]
    OutputWriteFailure { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Stable wire token for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::SessionAlreadyActive { .. } => "SESSION_ALREADY_ACTIVE",
            Self::SessionAlreadyExists { .. } => "SESSION_ALREADY_EXISTS",
            Self::SessionNotReady { .. } => "SESSION_NOT_READY",
            Self::SessionAlreadyStopped { .. } => "SESSION_ALREADY_STOPPED",
            Self::InvalidAudioFormat { .. } => "INVALID_AUDIO_FORMAT",
            Self::EngineOverloaded { .. } => "ENGINE_OVERLOADED",
            Self::SttBackendUnavailable { .. } => "STT_BACKEND_UNAVAILABLE",
            Self::SttBackendFailure { .. } => "STT_BACKEND_FAILURE",
            Self::LlmUnavailable { .. } => "LLM_UNAVAILABLE",
            Self::MapStall { .. } => "MAP_STALL",
            Self::OutputWriteFailure { .. } => "OUTPUT_WRITE_FAILURE",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } | Self::InvalidAudioFormat { .. } => 400,
            Self::Unauthorized => 401,
            Self::SessionNotFound { .. } => 404,
            Self::SessionAlreadyActive { .. }
            | Self::SessionAlreadyExists { .. }
            | Self::SessionNotReady { .. }
            | Self::SessionAlreadyStopped { .. } => 409,
            Self::EngineOverloaded { .. } => 429,
            Self::SttBackendUnavailable { .. }
            | Self::SttBackendFailure { .. }
            | Self::LlmUnavailable { .. }
            | Self::MapStall { .. }
            | Self::OutputWriteFailure { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// Optional hint surfaced in the error body `details`.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::LlmUnavailable { hint, .. } => hint.clone(),
            Self::EngineOverloaded { .. } => {
                Some("Reduce the audio chunk rate or drop frames client-side".to_string())
            }
            _ => None,
        }
    }

    /// Create an internal error from any displayable cause.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an invalid-audio error.
    pub fn invalid_audio(message: impl Into<String>) -> Self {
        Self::InvalidAudioFormat {
            message: message.into(),
        }
    }
}

/// Wire shape of any non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub status: String,
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl ErrorBody {
    pub fn from_error(err: &EngineError) -> Self {
        let mut details = serde_json::Map::new();
        if let Some(hint) = err.hint() {
            details.insert("hint".to_string(), serde_json::Value::String(hint));
        }
        Self {
            status: "error".to_string(),
            error_code: err.error_code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

/// Convert from std::io::Error
impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::OutputWriteFailure {
            message: err.to_string(),
        }
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON serialization failed: {}", err),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let cases: Vec<(EngineError, &str, u16)> = vec![
            (
                EngineError::invalid_request("bad body"),
                "INVALID_REQUEST",
                400,
            ),
            (EngineError::Unauthorized, "UNAUTHORIZED", 401),
            (
                EngineError::SessionNotFound {
                    session_id: "abc".into(),
                },
                "SESSION_NOT_FOUND",
                404,
            ),
            (
                EngineError::EngineOverloaded {
                    depth: 65,
                    limit: 64,
                },
                "ENGINE_OVERLOADED",
                429,
            ),
            (
                EngineError::MapStall { timeout_secs: 120 },
                "MAP_STALL",
                500,
            ),
        ];

        for (err, code, status) in cases {
            assert_eq!(err.error_code(), code);
            assert_eq!(err.http_status(), status);
        }
    }

    #[test]
    fn test_error_body_includes_hint() {
        let err = EngineError::LlmUnavailable {
            message: "connection refused".into(),
            hint: Some("Run: ollama pull llama3.2".into()),
        };
        let body = ErrorBody::from_error(&err);
        assert_eq!(body.status, "error");
        assert_eq!(body.error_code, "LLM_UNAVAILABLE");
        assert_eq!(
            body.details.get("hint").and_then(|v| v.as_str()),
            Some("Run: ollama pull llama3.2")
        );
    }

    #[test]
    fn test_error_body_omits_empty_details() {
        let err = EngineError::Unauthorized;
        let body = ErrorBody::from_error(&err);
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("details"));
    }
}
