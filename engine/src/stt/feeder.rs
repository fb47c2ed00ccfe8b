//! Shared audio accumulation for STT backends
//!
//! Buffers capture-rate mono audio, releases it in model-rate slices once
//! enough has accumulated, and keeps the session timeline so segment
//! timestamps are absolute and non-decreasing.

use crate::audio;

use super::{SttError, MIN_SLICE_SECONDS, MODEL_SAMPLE_RATE};

/// A drained run of audio, resampled to the model rate, with its position on
/// the session timeline.
pub struct AudioSlice {
    /// Samples at [`MODEL_SAMPLE_RATE`]
    pub samples: Vec<f32>,
    /// Slice start in seconds from session start (capture-rate accounting)
    pub start_s: f64,
    /// Slice end in seconds from session start
    pub end_s: f64,
}

/// Rolling capture-rate buffer shared by all backends.
pub struct SegmentFeeder {
    capture_rate: u32,
    pending: Vec<f32>,
    consumed_samples: u64,
    arrival_counter: u64,
    min_slice_samples: usize,
}

impl SegmentFeeder {
    pub fn new(capture_rate: u32) -> Self {
        Self {
            capture_rate,
            pending: Vec::new(),
            consumed_samples: 0,
            arrival_counter: 0,
            min_slice_samples: (capture_rate as f64 * MIN_SLICE_SECONDS) as usize,
        }
    }

    /// Append capture-rate samples.
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    /// Undrained audio in capture-rate seconds.
    pub fn buffered_seconds(&self) -> f64 {
        audio::duration_seconds(self.pending.len(), self.capture_rate)
    }

    /// Drain the accumulated audio as a model-rate slice.
    ///
    /// Returns `None` until at least [`MIN_SLICE_SECONDS`] has accumulated,
    /// unless `force` is set (flush path), which drains any remainder.
    pub fn take_slice(&mut self, force: bool) -> Result<Option<AudioSlice>, SttError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        if !force && self.pending.len() < self.min_slice_samples {
            return Ok(None);
        }

        let count = self.pending.len();
        let start_s = self.consumed_samples as f64 / self.capture_rate as f64;
        let end_s = (self.consumed_samples + count as u64) as f64 / self.capture_rate as f64;

        let drained = std::mem::take(&mut self.pending);
        let samples = audio::resample(&drained, self.capture_rate, MODEL_SAMPLE_RATE).map_err(
            |e| SttError::Inference {
                message: e.to_string(),
            },
        )?;

        self.consumed_samples += count as u64;

        Ok(Some(AudioSlice {
            samples,
            start_s,
            end_s,
        }))
    }

    /// Next monotonic arrival index for an emitted segment.
    pub fn next_arrival_index(&mut self) -> u64 {
        let index = self.arrival_counter;
        self.arrival_counter += 1;
        index
    }
}
