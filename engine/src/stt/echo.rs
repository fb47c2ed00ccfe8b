//! Deterministic echo backend for development and tests
//!
//! Emits a fixed phrase per drained slice of voiced audio so the rest of the
//! pipeline can be exercised without model files. Silent slices produce
//! nothing, which keeps the low-content guard reachable in dev mode.

use crate::audio;
use crate::transcript::TranscriptSegment;

use super::feeder::SegmentFeeder;
use super::{SttError, Transcriber};

/// RMS below this counts as silence.
const VOICE_THRESHOLD: f32 = 0.01;

const PHRASES: &[&str] = &[
    "Thanks everyone for making the time today.",
    "Let's walk through the agenda before we dive into numbers.",
    "Our allocation committee meets at the end of the quarter.",
    "Could you send over the updated fee schedule after the call?",
    "We are comparing two strategies for the fixed income sleeve.",
    "The decision ultimately sits with our chief investment officer.",
    "Let's schedule a follow-up once the diligence questionnaire is back.",
    "I will recap the action items in an email this afternoon.",
];

/// Dev-mode transcriber with deterministic output.
pub struct EchoBackend {
    feeder: SegmentFeeder,
    slice_counter: usize,
}

impl EchoBackend {
    pub fn new(capture_rate: u32) -> Self {
        Self {
            feeder: SegmentFeeder::new(capture_rate),
            slice_counter: 0,
        }
    }

    fn drain(&mut self, force: bool) -> Result<Vec<TranscriptSegment>, SttError> {
        let Some(slice) = self.feeder.take_slice(force)? else {
            return Ok(Vec::new());
        };

        if audio::rms_level(&slice.samples) < VOICE_THRESHOLD {
            return Ok(Vec::new());
        }

        let text = PHRASES[self.slice_counter % PHRASES.len()].to_string();
        self.slice_counter += 1;

        Ok(vec![TranscriptSegment {
            text,
            start_s: slice.start_s,
            end_s: slice.end_s,
            arrival_index: self.feeder.next_arrival_index(),
        }])
    }
}

impl Transcriber for EchoBackend {
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
