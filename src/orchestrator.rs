//! Job Orchestrator: turns a submitted file into a running, cancellable, observable job.
//!
//! Each job runs as its own task, owning its `Job` record exclusively while processing; every
//! other view (`get_job`, HTTP handlers) only ever reads an immutable [`crate::job::JobSnapshot`].
//! Admission is capped by a counting semaphore so a burst of uploads queues rather than
//! starving the machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::chunk::AudioChunk;
use crate::chunker::Chunker;
use crate::config::Config;
use crate::decoder;
use crate::dedup::dedup_overlap;
use crate::error::{Error, Result};
use crate::job::{Job, JobSnapshot, JobStatus, TranscriptionRequest, TranscriptionResponse};
use crate::preprocessor;
use crate::runtime::{ModelRuntime, RuntimeHealth};
use crate::session::SessionManager;
use crate::transcriber::transcribe_chunk;

#[cfg(feature = "notifier-http")]
use crate::notifier::{NotificationPayload, ProgressNotifier};

const POST_COMPLETION_RETENTION: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Hook for observing orchestrator events without coupling the core crate to any particular
/// metrics backend. The default is a silent no-op; `voxflow-server` supplies a Prometheus-backed
/// implementation.
pub trait OrchestratorObserver: Send + Sync {
    fn job_submitted(&self) {}
    fn job_terminal(&self, _status: JobStatus) {}
    fn chunk_completed(&self, _processing_time: std::time::Duration) {}
}

struct NullObserver;
impl OrchestratorObserver for NullObserver {}

pub struct Orchestrator {
    runtime: Mutex<Arc<dyn ModelRuntime>>,
    sessions: Arc<SessionManager>,
    semaphore: Arc<Semaphore>,
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    config: Config,
    observer: Arc<dyn OrchestratorObserver>,
    #[cfg(feature = "notifier-http")]
    notifier: Arc<ProgressNotifier>,
}

impl Orchestrator {
    pub fn new(runtime: Arc<dyn ModelRuntime>, config: Config) -> Self {
        let sessions = Arc::new(SessionManager::new(config.temp_root.clone()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));

        #[cfg(feature = "notifier-http")]
        let notifier = Arc::new(ProgressNotifier::new(
            config.enable_progress_notifications.then(|| config.node_service_url.clone()).flatten(),
        ));

        Self {
            runtime: Mutex::new(runtime),
            sessions,
            semaphore,
            jobs: Mutex::new(HashMap::new()),
            config,
            observer: Arc::new(NullObserver),
            #[cfg(feature = "notifier-http")]
            notifier,
        }
    }

    /// Replace the default no-op observer, e.g. with one that feeds Prometheus gauges/counters.
    pub fn with_observer(mut self, observer: Arc<dyn OrchestratorObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Admit `request`, returning its job id immediately. Processing happens on a spawned
    /// task; callers poll [`Orchestrator::get_job`] for progress.
    pub fn submit_file(self: &Arc<Self>, request: TranscriptionRequest) -> Result<String> {
        if request.audio_bytes.len() as u64 > self.config.max_file_size_bytes {
            return Err(Error::input("file exceeds the configured size limit"));
        }
        if request.audio_bytes.is_empty() {
            return Err(Error::input("empty upload"));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let job = Arc::new(Job::new(job_id.clone(), request.filename.clone()));
        self.jobs.lock().unwrap().insert(job_id.clone(), job.clone());
        self.observer.job_submitted();

        let this = self.clone();
        tokio::spawn(async move {
            this.process_job(job, request).await;
        });

        Ok(job_id)
    }

    pub fn get_job(&self, job_id: &str) -> Option<JobSnapshot> {
        self.jobs.lock().unwrap().get(job_id).map(|j| j.snapshot())
    }

    /// The completed job's full response, or `None` if the job is unknown or hasn't completed.
    pub fn get_response(&self, job_id: &str) -> Option<TranscriptionResponse> {
        self.jobs.lock().unwrap().get(job_id).and_then(|j| j.response())
    }

    /// Request cancellation. Returns `false` if the job doesn't exist or is already terminal.
    pub fn cancel_job(&self, job_id: &str) -> bool {
        let Some(job) = self.jobs.lock().unwrap().get(job_id).cloned() else {
            return false;
        };
        if job.status().is_terminal() {
            return false;
        }
        job.request_cancel();
        true
    }

    /// The session manager backing this orchestrator's scratch directories, shared so an
    /// embedder can run the periodic sweep alongside it.
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Jobs that have not yet reached a terminal status.
    pub fn active_job_count(&self) -> usize {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| !j.status().is_terminal())
            .count()
    }

    pub fn runtime_health(&self) -> RuntimeHealth {
        self.runtime.lock().unwrap().health()
    }

    pub fn runtime_capabilities(&self) -> crate::runtime::RuntimeCapabilities {
        self.runtime.lock().unwrap().capabilities()
    }

    /// Unload and reload the runtime's weights in place. Rejects the reload with a `busy`
    /// resource error while any job is still active rather than yanking the model out from
    /// under an in-flight chunk.
    pub fn reload_runtime(&self, model_name: &str, cache_dir: &std::path::Path) -> Result<()> {
        if self.active_job_count() > 0 {
            return Err(Error::resource("busy"));
        }

        let mut guard = self.runtime.lock().unwrap();
        let runtime = Arc::get_mut(&mut *guard).ok_or_else(|| Error::resource("busy"))?;
        runtime.unload()?;
        runtime.load(model_name, cache_dir)?;
        Ok(())
    }

    async fn process_job(self: Arc<Self>, job: Arc<Job>, request: TranscriptionRequest) {
        let Ok(_permit) = self.semaphore.acquire().await else {
            job.mark_failed("orchestrator shutting down");
            self.observer.job_terminal(job.status());
            return;
        };

        let session_id = job.id.clone();
        let spill_dir = match self.sessions.register(&session_id) {
            Ok(dir) => dir,
            Err(e) => {
                job.mark_failed(format!("failed to create session directory: {e}"));
                self.observer.job_terminal(job.status());
                return;
            }
        };

        if let Err(e) = self.run_pipeline(&job, &request, &spill_dir).await {
            job.mark_failed(e.to_string());
            self.observer.job_terminal(job.status());
            self.notify_failed(&job.id, &e.to_string()).await;
            let _ = self.sessions.cleanup_session(&session_id, true);
            return;
        }
        self.observer.job_terminal(job.status());

        let session_id_owned = session_id.clone();
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            tokio::time::sleep(POST_COMPLETION_RETENTION).await;
            let _ = sessions.cleanup_session(&session_id_owned, false);
        });
    }

    async fn run_pipeline(&self, job: &Arc<Job>, request: &TranscriptionRequest, spill_dir: &std::path::Path) -> Result<()> {
        let audio_bytes = request.audio_bytes.clone();
        let filename = request.filename.clone();
        let spill_threshold = 32 * 1024 * 1024;
        let decoded = tokio::task::spawn_blocking(move || decoder::decode_audio(&audio_bytes, &filename, spill_threshold))
            .await
            .map_err(|e| Error::runtime(format!("decode task panicked: {e}")))??;

        let processing = request.processing;
        let preprocessed = tokio::task::spawn_blocking(move || preprocessor::preprocess(&decoded, &processing))
            .await
            .map_err(|e| Error::runtime(format!("preprocess task panicked: {e}")))??;

        let chunks: Vec<AudioChunk> = {
            let chunker = Chunker::new(&preprocessed, &request.processing, job.id.clone(), spill_dir.to_path_buf(), &self.sessions);
            let mut out = Vec::new();
            for chunk in chunker {
                out.push(chunk.map_err(|e| Error::runtime(format!("failed to spill chunk: {e}")))?);
            }
            out
        };

        if chunks.is_empty() {
            return Err(Error::input("no audio chunks produced"));
        }

        job.mark_processing(chunks.len());
        self.notify_started(&job.id, chunks.len()).await;

        let mut per_chunk_segments = Vec::with_capacity(chunks.len());
        let started = std::time::Instant::now();

        for (completed, chunk) in chunks.iter().enumerate() {
            if job.is_cancel_requested() {
                job.mark_cancelled();
                self.notify_cancelled(&job.id).await;
                return Ok(());
            }

            let runtime = self.runtime.lock().unwrap().clone();
            let chunk_owned = chunk.clone();
            let language = request.language.clone();
            let system_prompt = request.system_prompt.clone();

            let result = tokio::task::spawn_blocking(move || {
                transcribe_chunk(runtime.as_ref(), &chunk_owned, language.as_deref(), system_prompt.as_deref())
            })
            .await
            .map_err(|e| Error::runtime(format!("transcribe task panicked: {e}")))?;

            per_chunk_segments.push(result.segments.clone());
            self.observer.chunk_completed(result.processing_time);
            job.record_chunk(result, completed + 1);
            self.notify_chunk_completed(&job.id, completed, job.snapshot().progress_percent).await;
        }

        let merged = dedup_overlap(&per_chunk_segments, request.processing.overlap_seconds as f32);
        let full_text = merged
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let chunk_confidences: Vec<f32> = job.chunk_results().iter().filter_map(|c| c.confidence()).collect();
        let confidence = if chunk_confidences.is_empty() {
            None
        } else {
            Some(chunk_confidences.iter().sum::<f32>() / chunk_confidences.len() as f32)
        };
        let response = TranscriptionResponse {
            job_id: job.id.clone(),
            filename: job.filename.clone(),
            status: JobStatus::Completed,
            segments: merged,
            full_text,
            audio_duration_seconds: preprocessed_duration(&chunks),
            processing_time: started.elapsed(),
            chunk_count: chunks.len(),
            confidence,
        };

        job.mark_completed(response);
        self.notify_completed(&job.id, chunks.len()).await;

        Ok(())
    }

    #[cfg(feature = "notifier-http")]
    async fn notify_started(&self, job_id: &str, total_chunks: usize) {
        self.notifier
            .notify(NotificationPayload::Started {
                job_id: job_id.to_string(),
                timestamp: now_iso8601(),
                total_chunks,
            })
            .await;
    }
    #[cfg(not(feature = "notifier-http"))]
    async fn notify_started(&self, _job_id: &str, _total_chunks: usize) {}

    #[cfg(feature = "notifier-http")]
    async fn notify_chunk_completed(&self, job_id: &str, chunk_index: usize, progress_percent: f32) {
        self.notifier
            .notify(NotificationPayload::ChunkCompleted {
                job_id: job_id.to_string(),
                timestamp: now_iso8601(),
                chunk_index,
                progress_percent,
            })
            .await;
    }
    #[cfg(not(feature = "notifier-http"))]
    async fn notify_chunk_completed(&self, _job_id: &str, _chunk_index: usize, _progress_percent: f32) {}

    #[cfg(feature = "notifier-http")]
    async fn notify_completed(&self, job_id: &str, chunk_count: usize) {
        self.notifier
            .notify(NotificationPayload::Completed {
                job_id: job_id.to_string(),
                timestamp: now_iso8601(),
                chunk_count,
            })
            .await;
    }
    #[cfg(not(feature = "notifier-http"))]
    async fn notify_completed(&self, _job_id: &str, _chunk_count: usize) {}

    #[cfg(feature = "notifier-http")]
    async fn notify_failed(&self, job_id: &str, error_message: &str) {
        self.notifier
            .notify(NotificationPayload::Failed {
                job_id: job_id.to_string(),
                timestamp: now_iso8601(),
                error_message: error_message.to_string(),
            })
            .await;
    }
    #[cfg(not(feature = "notifier-http"))]
    async fn notify_failed(&self, _job_id: &str, _error_message: &str) {}

    #[cfg(feature = "notifier-http")]
    async fn notify_cancelled(&self, job_id: &str) {
        self.notifier
            .notify(NotificationPayload::Cancelled {
                job_id: job_id.to_string(),
                timestamp: now_iso8601(),
            })
            .await;
    }
    #[cfg(not(feature = "notifier-http"))]
    async fn notify_cancelled(&self, _job_id: &str) {}
}

fn preprocessed_duration(chunks: &[AudioChunk]) -> f32 {
    chunks
        .last()
        .map(|c| c.start_time_seconds + c.duration_seconds)
        .unwrap_or(0.0)
}

#[cfg(feature = "notifier-http")]
fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            temp_root: dir.to_path_buf(),
            max_concurrent_requests: 2,
            ..Config::default()
        }
    }

    fn test_wav_bytes(seconds: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..(16_000 * seconds) {
                writer.write_sample(((i % 100) as i16) - 50).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    async fn loaded_runtime() -> Arc<dyn ModelRuntime> {
        let mut runtime = MockRuntime::new();
        runtime.load("tiny", std::path::Path::new(".")).unwrap();
        Arc::new(runtime)
    }

    #[tokio::test]
    async fn submits_and_completes_a_small_job() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = loaded_runtime().await;
        let orchestrator = Arc::new(Orchestrator::new(runtime, test_config(dir.path())));

        let request = TranscriptionRequest {
            audio_bytes: test_wav_bytes(3),
            filename: "clip.wav".to_string(),
            language: None,
            include_timestamps: true,
            include_confidence: true,
            system_prompt: None,
            processing: Default::default(),
        };

        let job_id = orchestrator.submit_file(request).unwrap();

        for _ in 0..200 {
            if let Some(snapshot) = orchestrator.get_job(&job_id) {
                if snapshot.status.is_terminal() {
                    assert_eq!(snapshot.status, JobStatus::Completed);
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn rejects_oversized_upload_before_spawning_a_task() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = loaded_runtime().await;
        let mut config = test_config(dir.path());
        config.max_file_size_bytes = 10;
        let orchestrator = Arc::new(Orchestrator::new(runtime, config));

        let request = TranscriptionRequest {
            audio_bytes: test_wav_bytes(1),
            filename: "clip.wav".to_string(),
            language: None,
            include_timestamps: true,
            include_confidence: true,
            system_prompt: None,
            processing: Default::default(),
        };

        let err = orchestrator.submit_file(request).unwrap_err();
        assert!(matches!(err, Error::Input(_)));
    }

    #[tokio::test]
    async fn cancel_of_unknown_job_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = loaded_runtime().await;
        let orchestrator = Arc::new(Orchestrator::new(runtime, test_config(dir.path())));
        assert!(!orchestrator.cancel_job("does-not-exist"));
    }

    #[tokio::test]
    async fn completed_job_response_is_retrievable_and_no_longer_active() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = loaded_runtime().await;
        let orchestrator = Arc::new(Orchestrator::new(runtime, test_config(dir.path())));

        let request = TranscriptionRequest {
            audio_bytes: test_wav_bytes(3),
            filename: "clip.wav".to_string(),
            language: None,
            include_timestamps: true,
            include_confidence: true,
            system_prompt: None,
            processing: Default::default(),
        };

        let job_id = orchestrator.submit_file(request).unwrap();
        assert_eq!(orchestrator.active_job_count(), 1);

        for _ in 0..200 {
            if let Some(response) = orchestrator.get_response(&job_id) {
                assert_eq!(response.job_id, job_id);
                assert!(!response.full_text.is_empty() || response.chunk_count > 0);
                assert_eq!(orchestrator.active_job_count(), 0);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job did not complete in time");
    }
}
