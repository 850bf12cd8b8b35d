//! Chunk Transcriber: turns one [`AudioChunk`] into a [`ChunkResult`] by calling the loaded
//! [`ModelRuntime`] and rebasing whatever segments it returns onto the chunk's absolute
//! position in the job's timeline.

use std::time::{Duration, Instant};

use crate::chunk::{AudioChunk, ChunkResult, ChunkStatus};
use crate::runtime::{ModelRuntime, TranscribeOptions, dynamic_token_budget, normalize_language};

/// Transcribe `chunk`, producing a [`ChunkResult`] whose segments are already shifted to
/// start at `chunk.start_time_seconds`. Runtime errors degrade to a failed result rather than
/// propagating, since one bad chunk should not fail the whole job.
pub fn transcribe_chunk(
    runtime: &dyn ModelRuntime,
    chunk: &AudioChunk,
    language: Option<&str>,
    system_prompt: Option<&str>,
) -> ChunkResult {
    let started = Instant::now();

    let opts = TranscribeOptions {
        language: normalize_language(language),
        system_prompt: system_prompt.map(str::to_string),
        token_budget: dynamic_token_budget(chunk.duration_seconds),
    };

    match runtime.transcribe(&chunk.samples, &opts) {
        Ok(mut segments) => {
            if segments.is_empty() {
                segments.push(crate::segment::TranscriptionSegment::new(
                    0.0,
                    chunk.duration_seconds,
                    "",
                ));
            }
            for segment in segments.iter_mut() {
                segment.shift(chunk.start_time_seconds);
            }

            ChunkResult {
                chunk_index: chunk.index,
                start_time_seconds: chunk.start_time_seconds,
                duration_seconds: chunk.duration_seconds,
                segments,
                processing_time: elapsed(started),
                status: ChunkStatus::Completed,
                error_message: None,
            }
        }
        Err(e) => ChunkResult::failed(chunk, elapsed(started), e.to_string()),
    }
}

fn elapsed(started: Instant) -> Duration {
    started.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;
    use std::path::PathBuf;

    fn chunk(index: usize, start: f32) -> AudioChunk {
        AudioChunk {
            index,
            session_id: "s".into(),
            samples: vec![0.0; 16_000],
            sample_rate: 16_000,
            start_time_seconds: start,
            duration_seconds: 1.0,
            spill_path: PathBuf::from("/tmp/x.wav"),
        }
    }

    #[test]
    fn successful_transcription_is_rebased_to_absolute_time() {
        let mut runtime = MockRuntime::new();
        runtime.load("tiny", std::path::Path::new(".")).unwrap();
        let result = transcribe_chunk(&runtime, &chunk(1, 10.0), None, None);
        assert_eq!(result.status, ChunkStatus::Completed);
        assert_eq!(result.segments[0].start_seconds, 10.0);
    }

    #[test]
    fn runtime_failure_degrades_to_failed_chunk_result() {
        let mut runtime = MockRuntime::failing();
        runtime.load("tiny", std::path::Path::new(".")).unwrap();
        let result = transcribe_chunk(&runtime, &chunk(0, 0.0), None, None);
        assert_eq!(result.status, ChunkStatus::Failed);
        assert!(result.error_message.is_some());
    }

    #[test]
    fn empty_result_synthesizes_a_single_span_segment() {
        struct EmptyRuntime;
        impl ModelRuntime for EmptyRuntime {
            fn load(&mut self, _: &str, _: &std::path::Path) -> crate::error::Result<()> {
                Ok(())
            }
            fn transcribe(
                &self,
                _: &[f32],
                _: &TranscribeOptions,
            ) -> crate::error::Result<Vec<crate::segment::TranscriptionSegment>> {
                Ok(Vec::new())
            }
            fn warmup(&self) -> crate::error::Result<()> {
                Ok(())
            }
            fn unload(&mut self) -> crate::error::Result<()> {
                Ok(())
            }
            fn health(&self) -> crate::runtime::RuntimeHealth {
                crate::runtime::RuntimeHealth::Ready
            }
            fn capabilities(&self) -> crate::runtime::RuntimeCapabilities {
                crate::runtime::RuntimeCapabilities {
                    supports_translation: false,
                    supports_language_detection: false,
                    max_context_tokens: 2048,
                }
            }
        }

        let result = transcribe_chunk(&EmptyRuntime, &chunk(0, 5.0), None, None);
        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].start_seconds, 5.0);
    }
}
