//! Whisper STT backend (whisper.cpp via whisper-rs)

use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState,
};

use crate::transcript::TranscriptSegment;

use super::feeder::{AudioSlice, SegmentFeeder};
use super::{SttError, Transcriber, MODEL_SAMPLE_RATE};

/// whisper.cpp rejects very short inputs; pad decodes up to ~1.2s.
const MIN_DECODE_SAMPLES: usize = (MODEL_SAMPLE_RATE as usize * 12) / 10;

/// Streaming transcriber backed by a ggml whisper model.
pub struct WhisperBackend {
    state: WhisperState,
    feeder: SegmentFeeder,
    scratch: Vec<f32>,
}

impl WhisperBackend {
    pub fn new(capture_rate: u32, model_path: &str) -> Result<Self, SttError> {
        if !std::path::Path::new(model_path).exists() {
            return Err(SttError::LoadFailed {
                message: format!("whisper model not found at {model_path}"),
            });
        }

        let context =
            WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
                .map_err(|e| SttError::LoadFailed {
                    message: e.to_string(),
                })?;
        let state = context.create_state().map_err(|e| SttError::LoadFailed {
            message: e.to_string(),
        })?;

        Ok(Self {
            state,
            feeder: SegmentFeeder::new(capture_rate),
            scratch: Vec::with_capacity(MIN_DECODE_SAMPLES),
        })
    }

    fn decode_slice(&mut self, slice: AudioSlice) -> Result<Vec<TranscriptSegment>, SttError> {
        // Pad short tails with silence so the decoder accepts them.
        let audio: &[f32] = if slice.samples.len() >= MIN_DECODE_SAMPLES {
            &slice.samples
        } else {
            self.scratch.clear();
            self.scratch.extend_from_slice(&slice.samples);
            self.scratch.resize(MIN_DECODE_SAMPLES, 0.0);
            &self.scratch
        };

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_suppress_blank(true);
        params.set_no_context(true);

        self.state
            .full(params, audio)
            .map_err(|e| SttError::Inference {
                message: e.to_string(),
            })?;

        let slice_span = slice.end_s - slice.start_s;
        let mut segments = Vec::new();
        for segment in self.state.as_iter() {
            let text = match segment.to_str() {
                Ok(text) => text.trim().to_string(),
                Err(_) => continue,
            };
            if text.is_empty() {
                continue;
            }

            // Centisecond timestamps are relative to this decode; padding can
            // push the reported end past the real audio, so cap at the slice.
            let start_s = slice.start_s + segment.start_timestamp() as f64 / 100.0;
            let end_s = (slice.start_s + segment.end_timestamp() as f64 / 100.0)
                .min(slice.start_s + slice_span);

            segments.push(TranscriptSegment {
                text,
                start_s: start_s.min(slice.end_s),
                end_s: end_s.max(start_s),
                arrival_index: self.feeder.next_arrival_index(),
            });
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

impl Transcriber for WhisperBackend {
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
