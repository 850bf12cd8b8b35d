//! Job state: the lifecycle the orchestrator drives a submission through.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::chunk::ChunkResult;
use crate::config::ProcessingConfig;
use crate::segment::TranscriptionSegment;

/// `pending -> processing -> {completed | failed | cancelled}`. Terminal states are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What a caller submits to start a transcription.
pub struct TranscriptionRequest {
    pub audio_bytes: Vec<u8>,
    pub filename: String,
    /// `None` or `Some("auto")` means "let the runtime detect the language".
    pub language: Option<String>,
    pub include_timestamps: bool,
    pub include_confidence: bool,
    /// Capped at 2000 chars by the caller; the orchestrator does not re-validate this.
    pub system_prompt: Option<String>,
    pub processing: ProcessingConfig,
}

/// The assembled result of a completed job.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionResponse {
    pub job_id: String,
    pub filename: String,
    pub status: JobStatus,
    pub segments: Vec<TranscriptionSegment>,
    pub full_text: String,
    pub audio_duration_seconds: f32,
    pub processing_time: Duration,
    pub chunk_count: usize,
    pub confidence: Option<f32>,
}

/// Immutable copy of a job's observable state, handed to readers without holding the
/// orchestrator's lock.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub progress_percent: f32,
    pub current_chunk: Option<usize>,
    pub total_chunks: Option<usize>,
    pub chunks_completed: Vec<ChunkResultSummary>,
    pub error_message: Option<String>,
    pub can_cancel: bool,
}

/// A trimmed-down [`ChunkResult`] suitable for embedding in a snapshot (no full segment text).
#[derive(Debug, Clone, Serialize)]
pub struct ChunkResultSummary {
    pub chunk_index: usize,
    pub status: crate::chunk::ChunkStatus,
    pub processing_time: Duration,
}

impl From<&ChunkResult> for ChunkResultSummary {
    fn from(r: &ChunkResult) -> Self {
        Self {
            chunk_index: r.chunk_index,
            status: r.status.clone(),
            processing_time: r.processing_time,
        }
    }
}

/// Mutable job state, owned exclusively by the orchestrator task processing it. All other
/// observers go through [`Job::snapshot`].
pub struct Job {
    pub id: String,
    pub filename: String,
    state: Mutex<JobState>,
    cancel_requested: AtomicBool,
}

struct JobState {
    status: JobStatus,
    progress_percent: f32,
    current_chunk: Option<usize>,
    total_chunks: Option<usize>,
    segments: Vec<TranscriptionSegment>,
    chunk_results: Vec<ChunkResult>,
    error_message: Option<String>,
    response: Option<TranscriptionResponse>,
}

impl Job {
    pub fn new(id: String, filename: String) -> Self {
        Self {
            id,
            filename,
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                progress_percent: 0.0,
                current_chunk: None,
                total_chunks: None,
                segments: Vec::new(),
                chunk_results: Vec::new(),
                error_message: None,
                response: None,
            }),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn mark_processing(&self, total_chunks: usize) {
        let mut state = self.state.lock().unwrap();
        state.status = JobStatus::Processing;
        state.total_chunks = Some(total_chunks);
    }

    /// Append a chunk's segments (already rebased to absolute time) and advance progress.
    /// `completed_chunks` is 1-based (the count including the chunk just finished).
    pub fn record_chunk(&self, result: ChunkResult, completed_chunks: usize) {
        let mut state = self.state.lock().unwrap();
        state.current_chunk = Some(result.chunk_index);
        state.segments.extend(result.segments.clone());
        let total = state.total_chunks.unwrap_or(completed_chunks).max(1);
        state.progress_percent = (completed_chunks as f32 / total as f32 * 100.0).min(100.0);
        state.chunk_results.push(result);
    }

    /// Record the job's final response and mark it completed. The response carries the same
    /// segments already accumulated via [`Job::record_chunk`], merged by the caller.
    pub fn mark_completed(&self, response: TranscriptionResponse) {
        let mut state = self.state.lock().unwrap();
        state.segments = response.segments.clone();
        state.status = JobStatus::Completed;
        state.progress_percent = 100.0;
        state.response = Some(response);
    }

    /// The assembled response of a completed job, or `None` if the job hasn't completed (or
    /// failed/was cancelled before completing).
    pub fn response(&self) -> Option<TranscriptionResponse> {
        self.state.lock().unwrap().response.clone()
    }

    pub fn mark_failed(&self, message: impl Into<String>) {
        let mut state = self.state.lock().unwrap();
        state.status = JobStatus::Failed;
        state.error_message = Some(message.into());
    }

    pub fn mark_cancelled(&self) {
        let mut state = self.state.lock().unwrap();
        state.status = JobStatus::Cancelled;
        state.segments.clear();
        state.chunk_results.clear();
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn chunk_results(&self) -> Vec<ChunkResult> {
        self.state.lock().unwrap().chunk_results.clone()
    }

    pub fn status(&self) -> JobStatus {
        self.state.lock().unwrap().status
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state.lock().unwrap();
        JobSnapshot {
            job_id: self.id.clone(),
            status: state.status,
            progress_percent: state.progress_percent,
            current_chunk: state.current_chunk,
            total_chunks: state.total_chunks,
            chunks_completed: state.chunk_results.iter().map(Into::into).collect(),
            error_message: state.error_message.clone(),
            can_cancel: !state.status.is_terminal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{AudioChunk, ChunkStatus};
    use std::path::PathBuf;

    fn chunk(index: usize) -> AudioChunk {
        AudioChunk {
            index,
            session_id: "s".into(),
            samples: Vec::new(),
            sample_rate: 16_000,
            start_time_seconds: index as f32 * 10.0,
            duration_seconds: 10.0,
            spill_path: PathBuf::from("/tmp/x.wav"),
        }
    }

    #[test]
    fn progress_reaches_exactly_100_on_final_chunk() {
        let job = Job::new("job-1".into(), "f.wav".into());
        job.mark_processing(2);

        let c0 = chunk(0);
        let r0 = ChunkResult {
            chunk_index: 0,
            start_time_seconds: 0.0,
            duration_seconds: 10.0,
            segments: vec![],
            processing_time: Duration::from_secs(1),
            status: ChunkStatus::Completed,
            error_message: None,
        };
        job.record_chunk(r0, 1);
        assert_eq!(job.snapshot().progress_percent, 50.0);

        let _ = c0;
        let r1 = ChunkResult {
            chunk_index: 1,
            start_time_seconds: 10.0,
            duration_seconds: 10.0,
            segments: vec![],
            processing_time: Duration::from_secs(1),
            status: ChunkStatus::Completed,
            error_message: None,
        };
        job.record_chunk(r1, 2);
        assert_eq!(job.snapshot().progress_percent, 100.0);

        job.mark_completed(TranscriptionResponse {
            job_id: job.id.clone(),
            filename: job.filename.clone(),
            status: JobStatus::Completed,
            segments: vec![],
            full_text: String::new(),
            audio_duration_seconds: 20.0,
            processing_time: Duration::from_secs(2),
            chunk_count: 2,
            confidence: None,
        });
        assert_eq!(job.snapshot().progress_percent, 100.0);
        assert_eq!(job.snapshot().status, JobStatus::Completed);
        assert!(job.response().is_some());
    }

    #[test]
    fn cancel_request_is_observable_and_idempotent() {
        let job = Job::new("job-2".into(), "f.wav".into());
        assert!(!job.is_cancel_requested());
        job.request_cancel();
        job.request_cancel();
        assert!(job.is_cancel_requested());
    }

    #[test]
    fn terminal_status_cannot_be_cancelled() {
        let job = Job::new("job-3".into(), "f.wav".into());
        job.mark_completed(TranscriptionResponse {
            job_id: job.id.clone(),
            filename: job.filename.clone(),
            status: JobStatus::Completed,
            segments: vec![],
            full_text: String::new(),
            audio_duration_seconds: 0.0,
            processing_time: Duration::from_secs(0),
            chunk_count: 0,
            confidence: None,
        });
        assert!(!job.snapshot().can_cancel);
    }
}
