//! Splits preprocessed audio into overlapping [`AudioChunk`]s.
//!
//! Steps by `chunk_duration - overlap`. The tail of the audio collapses into a single final
//! window instead of a series of shrinking step-sized windows, which is what keeps a short
//! trailing window from ever needing a separate "too short, skip it" rule: the window that
//! would otherwise run past the end of the audio just becomes the (always emitted) final
//! chunk, however short.

use std::path::PathBuf;

use crate::chunk::AudioChunk;
use crate::config::ProcessingConfig;
use crate::preprocessor::PreprocessedAudio;
use crate::session::{SessionManager, SessionProtectionGuard};

/// Lazily yields chunks from `audio` one at a time; nothing beyond the current chunk is
/// materialized until [`Iterator::next`] is called again.
///
/// Holds the session protected for as long as it's spilling chunk files to disk, so the
/// periodic sweep never deletes a directory this is still writing into.
pub struct Chunker<'a> {
    samples: &'a [f32],
    sample_rate: u32,
    session_id: String,
    spill_dir: PathBuf,
    step_samples: usize,
    chunk_samples: usize,
    cursor: usize,
    next_index: usize,
    _protection: SessionProtectionGuard<'a>,
}

impl<'a> Chunker<'a> {
    pub fn new(
        audio: &'a PreprocessedAudio,
        processing: &ProcessingConfig,
        session_id: impl Into<String>,
        spill_dir: PathBuf,
        sessions: &'a SessionManager,
    ) -> Self {
        let session_id = session_id.into();
        let chunk_seconds = (processing.chunk_duration_minutes * 60) as usize;
        let overlap_seconds = processing.overlap_seconds as usize;
        let chunk_samples = chunk_seconds * audio.sample_rate as usize;
        let step_seconds = chunk_seconds.saturating_sub(overlap_seconds).max(1);
        let step_samples = step_seconds * audio.sample_rate as usize;
        let protection = sessions.protect(&session_id);

        Self {
            samples: &audio.samples,
            sample_rate: audio.sample_rate,
            session_id,
            spill_dir,
            step_samples,
            chunk_samples,
            cursor: 0,
            next_index: 0,
            _protection: protection,
        }
    }

    fn make_chunk(&self, start: usize, end: usize) -> std::io::Result<AudioChunk> {
        let samples = self.samples[start..end].to_vec();
        let spill_path = self.spill_dir.join(format!("chunk_{:04}.wav", self.next_index));
        write_wav(&spill_path, &samples, self.sample_rate)?;

        Ok(AudioChunk {
            index: self.next_index,
            session_id: self.session_id.clone(),
            start_time_seconds: start as f32 / self.sample_rate as f32,
            duration_seconds: samples.len() as f32 / self.sample_rate as f32,
            samples,
            sample_rate: self.sample_rate,
            spill_path,
        })
    }
}

impl Iterator for Chunker<'_> {
    type Item = std::io::Result<AudioChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.samples.len() {
            return None;
        }

        let is_final = self.cursor + self.chunk_samples >= self.samples.len();
        let end = if is_final {
            self.samples.len()
        } else {
            self.cursor + self.chunk_samples
        };

        let start = self.cursor;
        let chunk = match self.make_chunk(start, end) {
            Ok(c) => c,
            Err(e) => return Some(Err(e)),
        };
        self.next_index += 1;

        self.cursor = if is_final {
            self.samples.len()
        } else {
            self.cursor + self.step_samples
        };

        Some(Ok(chunk))
    }
}

fn write_wav(path: &std::path::Path, samples: &[f32], sample_rate: u32) -> std::io::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    for &s in samples {
        writer
            .write_sample(s)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    Ok(())
}

#[allow(dead_code)]
fn read_back(path: &std::path::Path) -> std::io::Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path).map_err(|e| std::io::Error::other(e.to_string()))?;
    reader
        .samples::<f32>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| std::io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn audio(seconds: usize, sample_rate: u32) -> PreprocessedAudio {
        PreprocessedAudio {
            samples: vec![0.1; seconds * sample_rate as usize],
            sample_rate,
            duration_seconds: seconds as f32,
        }
    }

    fn processing(chunk_minutes: u32, overlap_seconds: u32) -> ProcessingConfig {
        ProcessingConfig {
            chunk_duration_minutes: chunk_minutes,
            overlap_seconds,
            ..ProcessingConfig::default()
        }
    }

    #[test]
    fn single_short_clip_yields_one_final_chunk() {
        let dir = tempdir().unwrap();
        let audio = audio(3, 16_000);
        let cfg = processing(10, 3);
        let sessions = SessionManager::new(dir.path().to_path_buf());
        let chunks: Vec<_> = Chunker::new(&audio, &cfg, "s1", dir.path().to_path_buf(), &sessions)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(chunks.len(), 1);
        assert!((chunks[0].duration_seconds - 3.0).abs() < 1e-3);
    }

    #[test]
    fn long_clip_splits_with_overlap_and_final_chunk_always_emitted() {
        let dir = tempdir().unwrap();
        // 25 minutes at 10-minute windows, 3s overlap: windows step every 9m57s.
        let audio = audio(25 * 60, 16_000);
        let cfg = processing(10, 3);
        let sessions = SessionManager::new(dir.path().to_path_buf());
        let chunks: Vec<_> = Chunker::new(&audio, &cfg, "s1", dir.path().to_path_buf(), &sessions)
            .map(|r| r.unwrap())
            .collect();

        assert!(chunks.len() >= 3);
        let last = chunks.last().unwrap();
        assert!((last.start_time_seconds + last.duration_seconds - 25.0 * 60.0).abs() < 1.0);

        for pair in chunks.windows(2) {
            assert!(pair[1].start_time_seconds < pair[0].start_time_seconds + pair[0].duration_seconds);
        }
    }

    #[test]
    fn chunk_spill_files_are_written_and_readable() {
        let dir = tempdir().unwrap();
        let audio = audio(2, 16_000);
        let cfg = processing(10, 3);
        let sessions = SessionManager::new(dir.path().to_path_buf());
        let chunk = Chunker::new(&audio, &cfg, "s1", dir.path().to_path_buf(), &sessions)
            .next()
            .unwrap()
            .unwrap();
        assert!(chunk.spill_path.exists());
        let read = read_back(&chunk.spill_path).unwrap();
        assert_eq!(read.len(), chunk.samples.len());
    }

    #[test]
    fn session_is_protected_while_chunker_is_alive() {
        let dir = tempdir().unwrap();
        let audio = audio(3, 16_000);
        let cfg = processing(10, 3);
        let sessions = SessionManager::new(dir.path().to_path_buf());
        let session_dir = sessions.register("s1").unwrap();

        let chunker = Chunker::new(&audio, &cfg, "s1", dir.path().to_path_buf(), &sessions);
        assert_eq!(sessions.cleanup_session("s1", false).unwrap(), 0);
        assert!(session_dir.exists());
        drop(chunker);

        sessions.cleanup_session("s1", false).unwrap();
        assert!(!session_dir.exists());
    }
}
