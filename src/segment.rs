//! Transcription segment: the unit both the runtime adapter and the deduper operate on.

use serde::Serialize;

/// A time-aligned span of transcribed text.
///
/// `text` may be empty after overlap dedup; the segment is retained for its timing but
/// excluded from the concatenated full-text join.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct TranscriptionSegment {
    pub start_seconds: f32,
    pub end_seconds: f32,
    pub text: String,
    pub confidence: Option<f32>,
}

impl TranscriptionSegment {
    pub fn new(start_seconds: f32, end_seconds: f32, text: impl Into<String>) -> Self {
        Self {
            start_seconds,
            end_seconds,
            text: text.into(),
            confidence: None,
        }
    }

    /// Shift both endpoints by `offset_seconds`. Used to rebase chunk-local segments onto
    /// the job's absolute timeline.
    pub fn shift(&mut self, offset_seconds: f32) {
        self.start_seconds += offset_seconds;
        self.end_seconds += offset_seconds;
    }
}

pub(crate) fn centiseconds_to_seconds(value: i64) -> f32 {
    if value < 0 { 0.0 } else { value as f32 / 100.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_moves_both_endpoints() {
        let mut seg = TranscriptionSegment::new(1.0, 2.0, "hi");
        seg.shift(10.0);
        assert_eq!(seg.start_seconds, 11.0);
        assert_eq!(seg.end_seconds, 12.0);
    }

    #[test]
    fn centiseconds_to_seconds_clamps_negative() {
        assert_eq!(centiseconds_to_seconds(-5), 0.0);
        assert_eq!(centiseconds_to_seconds(250), 2.5);
    }
}
