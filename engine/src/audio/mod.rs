//! PCM audio decoding, validation, and conversion
//!
//! The capture client streams base64-encoded little-endian float32 PCM. This
//! module is the only place raw audio bytes are touched; everything here is a
//! pure function over the samples of a single `/audio_chunk` call.

mod resample;


pub use resample::resample;

use base64::Engine as _;

use crate::error::EngineError;

/// Tolerance applied to the [-1.0, 1.0] sample range check.
pub const RANGE_EPSILON: f32 = 1e-6;

/// Lowest capture sample rate the engine accepts.
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest capture sample rate the engine accepts.
pub const MAX_SAMPLE_RATE: u32 = 96_000;

/// Errors produced while decoding or converting PCM audio.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("byte length {len} is not a multiple of 4")]
    UnalignedBytes { len: usize },

    #[error("decoded audio contains no samples")]
    Empty,

    #[error("sample rate {rate} outside supported range {MIN_SAMPLE_RATE}..={MAX_SAMPLE_RATE}")]
    UnsupportedRate { rate: u32 },

    #[error("sample {value} at index {index} outside [-1.0, 1.0]")]
    OutOfRange { index: usize, value: f32 },

    #[error("resampling failed: {message}")]
    Resample { message: String },
}

impl From<AudioError> for EngineError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::Resample { message } => EngineError::internal(message),
            other => EngineError::invalid_audio(other.to_string()),
        }
    }
}

/// Decode a base64 PCM payload into validated float32 samples.
///
/// Validation order follows the wire contract: byte alignment, sample count,
/// declared rate, then per-sample range (non-finite values are out of range
/// by definition).
pub fn decode_pcm(pcm_b64: &str, sample_rate: u32) -> Result<Vec<f32>, AudioError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(pcm_b64)?;

    if bytes.len() % 4 != 0 {
        return Err(AudioError::UnalignedBytes { len: bytes.len() });
    }
    if bytes.is_empty() {
        return Err(AudioError::Empty);
    }
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(AudioError::UnsupportedRate { rate: sample_rate });
    }

    let mut samples = Vec::with_capacity(bytes.len() / 4);
    for (index, chunk) in bytes.chunks_exact(4).enumerate() {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() || value.abs() > 1.0 + RANGE_EPSILON {
            return Err(AudioError::OutOfRange { index, value });
        }
        samples.push(value);
    }

    Ok(samples)
}

/// Average interleaved channels down to mono. Identity for mono input.
///
/// Trailing samples that do not form a complete frame are dropped.
pub fn fold_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Duration of a sample buffer at the declared capture rate.
///
/// Callers always account duration against the source rate, never the
/// model rate the audio is later resampled to.
pub fn duration_seconds(sample_count: usize, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    sample_count as f64 / sample_rate as f64
}

/// RMS level of a sample window, used for voice gating.
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
