//! `whisper-rs` / `whisper.cpp` backed [`ModelRuntime`].
//!
//! One model is loaded at a time; the strategy used to load it (CPU/accelerator/unified
//! memory) is baked into the `whisper-rs` build via its `cuda`/`metal`/`hipblas`/`vulkan`
//! cargo features, so this struct just calls into whatever was compiled in.

use std::path::Path;
use std::sync::Mutex;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::error::{Error, Result};
use crate::segment::{TranscriptionSegment, centiseconds_to_seconds};

use super::{ModelRuntime, RuntimeCapabilities, RuntimeHealth, TranscribeOptions};

pub struct WhisperRuntime {
    context: Mutex<Option<WhisperContext>>,
}

impl WhisperRuntime {
    pub fn new() -> Self {
        Self {
            context: Mutex::new(None),
        }
    }
}

impl Default for WhisperRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRuntime for WhisperRuntime {
    fn load(&mut self, model_name: &str, cache_dir: &Path) -> Result<()> {
        let model_path = cache_dir.join(model_name);
        let path_str = model_path
            .to_str()
            .ok_or_else(|| Error::input(format!("model path is not valid UTF-8: {}", model_path.display())))?;

        init_whisper_logging();

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| Error::resource(format!("failed to load whisper model '{path_str}': {e}")))?;

        *self.context.lock().unwrap() = Some(ctx);
        Ok(())
    }

    fn transcribe(&self, samples_16k_mono: &[f32], opts: &TranscribeOptions) -> Result<Vec<TranscriptionSegment>> {
        if samples_16k_mono.is_empty() {
            return Ok(Vec::new());
        }

        let guard = self.context.lock().unwrap();
        let ctx = guard.as_ref().ok_or_else(|| Error::runtime("whisper runtime not loaded"))?;

        let mut state = ctx
            .create_state()
            .map_err(|e| Error::runtime(format!("failed to create whisper state: {e}")))?;

        let params = build_full_params(opts);
        state
            .full(params, samples_16k_mono)
            .map_err(|e| Error::runtime(format!("whisper inference failed: {e}")))?;

        let mut segments = Vec::new();
        for whisper_segment in state.as_iter() {
            let text = whisper_segment
                .to_str()
                .map_err(|e| Error::runtime(format!("failed to read whisper segment text: {e}")))?
                .to_owned();

            let start = centiseconds_to_seconds(whisper_segment.start_timestamp());
            let end = centiseconds_to_seconds(whisper_segment.end_timestamp());
            let confidence = mean_token_probability(&whisper_segment);

            let mut segment = TranscriptionSegment::new(start, end, text);
            segment.confidence = confidence;
            segments.push(segment);
        }

        Ok(segments)
    }

    fn warmup(&self) -> Result<()> {
        let guard = self.context.lock().unwrap();
        let ctx = guard.as_ref().ok_or_else(|| Error::runtime("whisper runtime not loaded"))?;
        let mut state = ctx
            .create_state()
            .map_err(|e| Error::runtime(format!("failed to create whisper state: {e}")))?;
        let silence = vec![0.0f32; 16_000];
        state
            .full(build_full_params(&TranscribeOptions::default()), &silence)
            .map_err(|e| Error::runtime(format!("warmup inference failed: {e}")))?;
        Ok(())
    }

    fn unload(&mut self) -> Result<()> {
        *self.context.lock().unwrap() = None;
        Ok(())
    }

    fn health(&self) -> RuntimeHealth {
        if self.context.lock().unwrap().is_some() {
            RuntimeHealth::Ready
        } else {
            RuntimeHealth::Unloaded
        }
    }

    fn capabilities(&self) -> RuntimeCapabilities {
        RuntimeCapabilities {
            supports_translation: true,
            supports_language_detection: true,
            max_context_tokens: 2048,
        }
    }
}

fn build_full_params(opts: &TranscribeOptions) -> FullParams<'_, '_> {
    let mut params = FullParams::new(SamplingStrategy::BeamSearch {
        beam_size: 5,
        patience: 1.0,
    });

    params.set_n_threads(num_cpus::get() as i32);
    params.set_language(opts.language.as_deref());
    params.set_no_context(true);
    params.set_single_segment(false);
    params.set_token_timestamps(true);

    params.set_print_progress(false);
    params.set_print_special(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    if let Some(prompt) = opts.system_prompt.as_deref() {
        params.set_initial_prompt(prompt);
    }

    params
}

fn mean_token_probability(segment: &whisper_rs::WhisperSegment) -> Option<f32> {
    let token_count = usize::try_from(segment.n_tokens()).ok()?;
    if token_count == 0 {
        return None;
    }

    let mut sum = 0.0f32;
    let mut counted = 0usize;
    for idx in 0..token_count {
        if let Ok(token) = segment.get_token(idx as i32) {
            sum += token.token_data().p;
            counted += 1;
        }
    }

    if counted == 0 { None } else { Some(sum / counted as f32) }
}

fn init_whisper_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        whisper_rs::install_logging_hooks();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcribe_on_empty_samples_returns_no_segments() {
        let runtime = WhisperRuntime::new();
        let segments = runtime.transcribe(&[], &TranscribeOptions::default()).unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn transcribe_before_load_is_a_runtime_error() {
        let runtime = WhisperRuntime::new();
        let err = runtime.transcribe(&[0.0; 16_000], &TranscribeOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[test]
    fn health_reflects_load_state() {
        let runtime = WhisperRuntime::new();
        assert_eq!(runtime.health(), RuntimeHealth::Unloaded);
    }
}
