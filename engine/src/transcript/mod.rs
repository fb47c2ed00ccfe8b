//! Transcript segment store and chunking discipline
//!
//! Segments arrive from the STT backend in emission order and are folded
//! into fixed-duration chunks for MAP summarization. A sealed chunk is never
//! modified afterwards.

use serde::{Deserialize, Serialize};

/// A contiguous transcribed utterance emitted by the STT backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Transcribed text; never empty
    pub text: String,
    /// Start offset in seconds from session start
    pub start_s: f64,
    /// End offset in seconds from session start
    pub end_s: f64,
    /// Monotonic arrival counter within the session
    pub arrival_index: u64,
}

/// An ordered, sealed group of segments spanning at least the configured
/// chunk duration (or whatever remained at stop time).
#[derive(Debug, Clone)]
pub struct TranscriptChunk {
    /// Zero-based chunk sequence number
    pub index: usize,
    /// Segments in arrival order
    pub segments: Vec<TranscriptSegment>,
}

impl TranscriptChunk {
    /// Concatenated text of all segments; this is the MAP input.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Time span covered by the chunk.
    pub fn span_seconds(&self) -> f64 {
        match (self.segments.first(), self.segments.last()) {
            (Some(first), Some(last)) => (last.end_s - first.start_s).max(0.0),
            _ => 0.0,
        }
    }
}

/// Append-only segment store with duration-threshold chunk sealing.
///
/// Single producer, single consumer; the owning session serializes access.
pub struct TranscriptBuffer {
    chunk_duration_seconds: f64,
    pending: Vec<TranscriptSegment>,
    chunk_count: usize,
    total_segments: u64,
    full_text: String,
}

impl TranscriptBuffer {
    pub fn new(chunk_duration_seconds: f64) -> Self {
        Self {
            chunk_duration_seconds,
            pending: Vec::new(),
            chunk_count: 0,
            total_segments: 0,
            full_text: String::new(),
        }
    }

    /// Append a segment; seals and returns a chunk when the in-progress run
    /// spans at least the configured chunk duration.
    pub fn add(&mut self, segment: TranscriptSegment) -> Option<TranscriptChunk> {
        self.total_segments += 1;
        if !self.full_text.is_empty() {
            self.full_text.push(' ');
        }
        self.full_text.push_str(&segment.text);

        self.pending.push(segment);

        let span = {
            // Both bounds exist: pending is non-empty after the push.
            let first = &self.pending[0];
            let last = &self.pending[self.pending.len() - 1];
            last.end_s - first.start_s
        };

        if span >= self.chunk_duration_seconds {
            Some(self.seal())
        } else {
            None
        }
    }

    /// Seal whatever is pending into a final chunk. `None` when empty.
    pub fn force_finalize(&mut self) -> Option<TranscriptChunk> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.seal())
    }

    /// Concatenation of every segment seen so far. Used only by the
    /// low-content guard; released when the buffer is dropped at teardown.
    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    /// Segments not yet folded into a sealed chunk.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of chunks sealed so far.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Total segments appended over the buffer's lifetime.
    pub fn total_segments(&self) -> u64 {
        self.total_segments
    }

    fn seal(&mut self) -> TranscriptChunk {
        let chunk = TranscriptChunk {
            index: self.chunk_count,
            segments: std::mem::take(&mut self.pending),
        };
        self.chunk_count += 1;
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(text: &str, start_s: f64, end_s: f64, arrival_index: u64) -> TranscriptSegment {
        TranscriptSegment {
            text: text.to_string(),
            start_s,
            end_s,
            arrival_index,
        }
    }

    #[test]
    fn test_seals_chunk_at_duration_threshold() {
        let mut buffer = TranscriptBuffer::new(60.0);

        assert!(buffer.add(segment("first part", 0.0, 30.0, 0)).is_none());
        assert_eq!(buffer.pending_len(), 1);

        let chunk = buffer
            .add(segment("second part", 30.0, 60.0, 1))
            .expect("60s span seals a chunk");

        assert_eq!(chunk.index, 0);
        assert_eq!(chunk.segments.len(), 2);
        assert_eq!(chunk.text(), "first part second part");
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn test_span_measured_from_first_segment_start() {
        // A session that starts mid-call: timestamps begin past zero.
        let mut buffer = TranscriptBuffer::new(10.0);

        assert!(buffer.add(segment("a", 100.0, 104.0, 0)).is_none());
        assert!(buffer.add(segment("b", 104.0, 109.0, 1)).is_none());
        let chunk = buffer.add(segment("c", 109.0, 110.5, 2)).unwrap();
        assert!(chunk.span_seconds() >= 10.0);
    }

    #[test]
    fn test_force_finalize_partial() {
        let mut buffer = TranscriptBuffer::new(60.0);
        buffer.add(segment("tail", 0.0, 3.0, 0));

        let chunk = buffer.force_finalize().expect("partial chunk");
        assert_eq!(chunk.index, 0);
        assert_eq!(chunk.text(), "tail");

        assert!(buffer.force_finalize().is_none());
    }

    #[test]
    fn test_force_finalize_empty_is_none() {
        let mut buffer = TranscriptBuffer::new(60.0);
        assert!(buffer.force_finalize().is_none());
    }

    #[test]
    fn test_chunk_indices_are_sequential() {
        let mut buffer = TranscriptBuffer::new(5.0);
        let first = buffer.add(segment("one", 0.0, 5.0, 0)).unwrap();
        let second = buffer.add(segment("two", 5.0, 10.0, 1)).unwrap();
        buffer.add(segment("rest", 10.0, 11.0, 2));
        let last = buffer.force_finalize().unwrap();

        assert_eq!(first.index, 0);
        assert_eq!(second.index, 1);
        assert_eq!(last.index, 2);
        assert_eq!(buffer.chunk_count(), 3);
    }

    #[test]
    fn test_full_text_accumulates_across_chunks() {
        let mut buffer = TranscriptBuffer::new(5.0);
        buffer.add(segment("hello there", 0.0, 5.0, 0));
        buffer.add(segment("general update", 5.0, 10.0, 1));
        buffer.add(segment("tail words", 10.0, 11.0, 2));

        assert_eq!(buffer.full_text(), "hello there general update tail words");
        assert_eq!(buffer.total_segments(), 3);
    }
}
