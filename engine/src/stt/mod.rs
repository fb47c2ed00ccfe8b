//! Pluggable speech-to-text backends
//!
//! A backend is a stateful streaming transcriber owned by exactly one
//! session: audio goes in at the capture rate, punctuated segments come out.
//! The factory is keyed by backend name; production mode refuses the dev
//! echo backend outright.

mod echo;
mod feeder;
mod parakeet;
mod whisper;

#[cfg(test)]
mod tests;

pub use echo::EchoBackend;
pub use feeder::SegmentFeeder;
pub use parakeet::ParakeetBackend;
pub use whisper::WhisperBackend;

use crate::config::{EngineMode, SttConfig};
use crate::error::EngineError;
use crate::transcript::TranscriptSegment;

/// Sample rate the STT models consume. The feeder resamples capture audio
/// down to this before inference.
pub const MODEL_SAMPLE_RATE: u32 = 16_000;

/// Audio accumulated before a transcription pass is worthwhile.
pub const MIN_SLICE_SECONDS: f64 = 2.0;

/// Errors raised by STT backends.
#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("model load failed: {message}")]
    LoadFailed { message: String },

    #[error("transcription failed: {message}")]
    Inference { message: String },
}

impl From<SttError> for EngineError {
    fn from(err: SttError) -> Self {
        match err {
            SttError::LoadFailed { message } => EngineError::SttBackendUnavailable { message },
            SttError::Inference { message } => EngineError::SttBackendFailure { message },
        }
    }
}

/// Stateful streaming transcriber.
///
/// Implementations are serialized per session by the session's STT mutex and
/// must never be shared between sessions.
pub trait Transcriber: Send {
    /// Feed mono capture-rate samples; returns zero or more segments once
    /// enough audio has accumulated.
    fn push(&mut self, samples: &[f32]) -> Result<Vec<TranscriptSegment>, SttError>;

    /// Transcribe whatever remains buffered, leaving the backend empty.
    fn flush(&mut self) -> Result<Vec<TranscriptSegment>, SttError>;

    /// Undrained audio in capture-rate seconds.
    fn buffered_seconds(&self) -> f64;
}

impl std::fmt::Debug for dyn Transcriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Transcriber")
    }
}

/// Backend identifiers advertised by `/health` for the given mode.
pub fn available_backends(mode: EngineMode) -> Vec<&'static str> {
    match mode {
        EngineMode::Prod => vec!["whisper", "parakeet"],
        EngineMode::Dev => vec!["whisper", "parakeet", "echo"],
    }
}

/// Whether `name` is a valid backend selector for the given mode.
pub fn is_known_backend(name: &str, mode: EngineMode) -> bool {
    available_backends(mode).contains(&name)
}

/// Construct a transcriber by backend name.
///
/// Model loading happens here, so an unloadable model fails the session
/// start rather than the first audio chunk.
pub fn create_transcriber(
    backend: &str,
    capture_rate: u32,
    config: &SttConfig,
    mode: EngineMode,
) -> Result<Box<dyn Transcriber>, EngineError> {
    match backend {
        "whisper" => Ok(Box::new(WhisperBackend::new(
            capture_rate,
            &config.whisper_model_path,
        )?)),
        "parakeet" => Ok(Box::new(ParakeetBackend::new(
            capture_rate,
            &config.parakeet_model_dir,
        )?)),
        "echo" if mode == EngineMode::Dev => Ok(Box::new(EchoBackend::new(capture_rate))),
        "echo" => Err(EngineError::SttBackendUnavailable {
            message: "mock backends are disabled in production mode".to_string(),
        }),
        other => Err(EngineError::SttBackendUnavailable {
            message: format!("unknown STT backend {other:?}"),
        }),
    }
}
