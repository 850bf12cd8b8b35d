//! Audio chunks and their per-chunk transcription results.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::segment::TranscriptionSegment;

/// A window of preprocessed audio handed to the transcriber as one inference unit.
///
/// `samples` and `spill_path` both describe the same audio; `spill_path` exists so the
/// runtime adapter (or an external process) can consume the chunk from disk without holding
/// the whole buffer in memory, and so the Temp/Session Manager has something concrete to
/// clean up.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub index: usize,
    pub session_id: String,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub start_time_seconds: f32,
    pub duration_seconds: f32,
    pub spill_path: PathBuf,
}

impl AudioChunk {
    /// `samples.len() == round(duration * sample_rate)`, the invariant callers may rely on.
    pub fn expected_sample_count(&self) -> usize {
        (self.duration_seconds as f64 * self.sample_rate as f64).round() as usize
    }
}

/// Outcome of transcribing a single [`AudioChunk`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Completed,
    Failed,
}

/// Result of processing one chunk. A failed chunk degrades the job's output but never fails
/// the job itself.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub start_time_seconds: f32,
    pub duration_seconds: f32,
    pub segments: Vec<TranscriptionSegment>,
    pub processing_time: Duration,
    pub status: ChunkStatus,
    pub error_message: Option<String>,
}

impl ChunkResult {
    pub fn failed(chunk: &AudioChunk, processing_time: Duration, message: impl Into<String>) -> Self {
        Self {
            chunk_index: chunk.index,
            start_time_seconds: chunk.start_time_seconds,
            duration_seconds: chunk.duration_seconds,
            segments: Vec::new(),
            processing_time,
            status: ChunkStatus::Failed,
            error_message: Some(message.into()),
        }
    }

    /// Mean of the segments' non-null confidences, or `None` if none carry one.
    pub fn confidence(&self) -> Option<f32> {
        let values: Vec<f32> = self.segments.iter().filter_map(|s| s.confidence).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f32>() / values.len() as f32)
        }
    }
}
