//! A deterministic, in-process runtime used by the orchestrator's own test suite so those
//! tests don't depend on a real model being present.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::segment::TranscriptionSegment;

use super::{ModelRuntime, RuntimeCapabilities, RuntimeHealth, TranscribeOptions};

pub struct MockRuntime {
    loaded: AtomicBool,
    fail_transcribe: bool,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            fail_transcribe: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            loaded: AtomicBool::new(false),
            fail_transcribe: true,
        }
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRuntime for MockRuntime {
    fn load(&mut self, _model_name: &str, _cache_dir: &std::path::Path) -> Result<()> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn transcribe(&self, samples_16k_mono: &[f32], _opts: &TranscribeOptions) -> Result<Vec<TranscriptionSegment>> {
        if self.fail_transcribe {
            return Err(Error::runtime("mock runtime configured to fail"));
        }
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(Error::runtime("mock runtime not loaded"));
        }

        let duration = samples_16k_mono.len() as f32 / 16_000.0;
        Ok(vec![TranscriptionSegment::new(0.0, duration, "mock transcript")])
    }

    fn warmup(&self) -> Result<()> {
        Ok(())
    }

    fn unload(&mut self) -> Result<()> {
        self.loaded.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn health(&self) -> RuntimeHealth {
        if self.loaded.load(Ordering::SeqCst) {
            RuntimeHealth::Ready
        } else {
            RuntimeHealth::Unloaded
        }
    }

    fn capabilities(&self) -> RuntimeCapabilities {
        RuntimeCapabilities {
            supports_translation: false,
            supports_language_detection: true,
            max_context_tokens: 2048,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcribe_fails_before_load() {
        let runtime = MockRuntime::new();
        let err = runtime
            .transcribe(&[0.0; 16_000], &TranscribeOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[test]
    fn transcribe_succeeds_after_load() {
        let mut runtime = MockRuntime::new();
        runtime.load("tiny", std::path::Path::new(".")).unwrap();
        let segments = runtime
            .transcribe(&[0.0; 16_000], &TranscribeOptions::default())
            .unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn failing_runtime_always_errors() {
        let mut runtime = MockRuntime::failing();
        runtime.load("tiny", std::path::Path::new(".")).unwrap();
        assert!(runtime.transcribe(&[0.0; 16_000], &TranscribeOptions::default()).is_err());
    }
}
