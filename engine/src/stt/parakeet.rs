//! Parakeet TDT STT backend (ONNX via parakeet-rs)

use parakeet_rs::{ParakeetTDT, TimestampMode, Transcriber as _};

use crate::transcript::TranscriptSegment;

use super::feeder::{AudioSlice, SegmentFeeder};
use super::{SttError, Transcriber, MODEL_SAMPLE_RATE};

/// Streaming transcriber backed by NVIDIA's Parakeet TDT model.
///
/// The model is stateless per call, so each drained slice is transcribed
/// independently with sentence-level timestamps.
pub struct ParakeetBackend {
    model: ParakeetTDT,
    feeder: SegmentFeeder,
}

impl ParakeetBackend {
    pub fn new(capture_rate: u32, model_dir: &str) -> Result<Self, SttError> {
        if !std::path::Path::new(model_dir).exists() {
            return Err(SttError::LoadFailed {
                message: format!("parakeet model directory not found at {model_dir}"),
            });
        }

        let model = ParakeetTDT::from_pretrained(model_dir, None).map_err(|e| {
            SttError::LoadFailed {
                message: e.to_string(),
            }
        })?;

        Ok(Self {
            model,
            feeder: SegmentFeeder::new(capture_rate),
        })
    }

    fn decode_slice(&mut self, slice: AudioSlice) -> Result<Vec<TranscriptSegment>, SttError> {
        let result = self
            .model
            .transcribe_samples(
                slice.samples,
                MODEL_SAMPLE_RATE,
                1,
                Some(TimestampMode::Sentences),
            )
            .map_err(|e| SttError::Inference {
                message: e.to_string(),
            })?;

        let mut segments = Vec::new();
        for token in &result.tokens {
            let text = token.text.trim().to_string();
            if text.is_empty() {
                continue;
            }
            let start_s = (slice.start_s + token.start as f64).min(slice.end_s);
            let end_s = (slice.start_s + token.end as f64).clamp(start_s, slice.end_s);
            segments.push(TranscriptSegment {
                text,
                start_s,
                end_s,
                arrival_index: self.feeder.next_arrival_index(),
            });
        }

        // Sentence timestamps can be absent for very short slices; fall back
        // to one slice-spanning segment so no transcribed text is lost.
        if segments.is_empty() {
            let text = result.text.trim().to_string();
            if !text.is_empty() {
                segments.push(TranscriptSegment {
                    text,
                    start_s: slice.start_s,
                    end_s: slice.end_s,
                    arrival_index: self.feeder.next_arrival_index(),
                });
            }
        }

        Ok(segments)
    }

    fn drain(&mut self, force: bool) -> Result<Vec<TranscriptSegment>, SttError> {
        match self.feeder.take_slice(force)? {
            Some(slice) => self.decode_slice(slice),
            None => Ok(Vec::new()),
        }
    }
}

impl Transcriber for ParakeetBackend {
    fn push(&mut self, samples: &[f32]) -> Result<Vec<TranscriptSegment>, SttError> {
        self.feeder.push(samples);
        self.drain(false)
    }

    fn flush(&mut self) -> Result<Vec<TranscriptSegment>, SttError> {
        self.drain(true)
    }

    fn buffered_seconds(&self) -> f64 {
        self.feeder.buffered_seconds()
    }
}
