//! Model Runtime Adapter: the seam between the orchestrator and whatever actually runs
//! inference. [`ModelRuntime`] is intentionally narrow so a new backend only needs to
//! implement five methods; everything else (fallback ordering, token budgeting, language
//! normalization) lives here and is shared by every implementation.

use std::time::Duration;

use crate::config::DeviceKind;
use crate::error::Result;
use crate::segment::TranscriptionSegment;

#[cfg(feature = "runtime-whisper")]
pub mod whisper;

#[cfg(any(test, feature = "mock-runtime"))]
pub mod mock;

/// What a runtime is capable of, reported once after [`ModelRuntime::load`] succeeds.
#[derive(Debug, Clone)]
pub struct RuntimeCapabilities {
    pub supports_translation: bool,
    pub supports_language_detection: bool,
    pub max_context_tokens: u32,
}

/// Health of a loaded runtime, polled by the resource monitor and exposed on `/healthz`.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeHealth {
    Ready,
    Degraded { reason: String },
    Unloaded,
}

/// Options for a single chunk's transcription call.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    pub language: Option<String>,
    pub system_prompt: Option<String>,
    pub token_budget: u32,
}

/// One inference backend. Implementors own whatever process/library state is needed to go
/// from PCM samples to text; everything above this trait is backend-agnostic.
pub trait ModelRuntime: Send + Sync {
    fn load(&mut self, model_name: &str, cache_dir: &std::path::Path) -> Result<()>;
    fn transcribe(&self, samples_16k_mono: &[f32], opts: &TranscribeOptions) -> Result<Vec<TranscriptionSegment>>;
    fn warmup(&self) -> Result<()>;
    fn unload(&mut self) -> Result<()>;
    fn health(&self) -> RuntimeHealth;
    fn capabilities(&self) -> RuntimeCapabilities;
}

/// A compute strategy a runtime can be asked to load under. Strategies are tried in order
/// until one loads successfully; [`StrategyPlanner`] decides the order from [`DeviceKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStrategy {
    Standard,
    Accelerator,
    UnifiedMemory,
}

/// Builds the ordered fallback list of strategies to attempt for a given configured device.
pub struct StrategyPlanner;

impl StrategyPlanner {
    /// Configured device narrows, but never eliminates, the fallback chain: every plan ends
    /// in [`RuntimeStrategy::Standard`] so a load always has a last resort.
    pub fn plan(device: DeviceKind) -> Vec<RuntimeStrategy> {
        match device {
            DeviceKind::Cpu => vec![RuntimeStrategy::Standard],
            DeviceKind::Accelerator => vec![RuntimeStrategy::Accelerator, RuntimeStrategy::Standard],
            DeviceKind::UnifiedAccelerator => vec![
                RuntimeStrategy::UnifiedMemory,
                RuntimeStrategy::Accelerator,
                RuntimeStrategy::Standard,
            ],
        }
    }
}

/// Outcome of [`load_with_fallback`].
#[derive(Debug)]
pub struct LoadingResult {
    pub strategy_used: RuntimeStrategy,
    pub attempts_failed: Vec<(RuntimeStrategy, String)>,
}

/// Try each strategy in `plan` in order, calling `attempt` for each, stopping at the first
/// success. Every failure is recorded rather than discarded so callers can log the whole
/// chain, not just the final error.
pub fn load_with_fallback(
    plan: &[RuntimeStrategy],
    mut attempt: impl FnMut(RuntimeStrategy) -> Result<()>,
) -> Result<LoadingResult> {
    let mut attempts_failed = Vec::new();

    for &strategy in plan {
        match attempt(strategy) {
            Ok(()) => {
                return Ok(LoadingResult {
                    strategy_used: strategy,
                    attempts_failed,
                });
            }
            Err(e) => attempts_failed.push((strategy, e.to_string())),
        }
    }

    Err(crate::error::Error::resource(format!(
        "no runtime strategy succeeded: {}",
        attempts_failed
            .iter()
            .map(|(s, msg)| format!("{s:?}: {msg}"))
            .collect::<Vec<_>>()
            .join("; ")
    )))
}

/// `max(duration_seconds * 5, 100)`, capped to `min(base + 300, 2048)`.
///
/// Gives short chunks a floor so the model always gets a workable context window, and long
/// chunks headroom without ever exceeding what the model can actually hold.
pub fn dynamic_token_budget(duration_seconds: f32) -> u32 {
    let base = (duration_seconds * 5.0).ceil().max(100.0) as u32;
    (base + 300).min(2048)
}

/// `None`, `Some("")`, and `Some("auto")` all mean "let the runtime detect the language".
pub fn normalize_language(language: Option<&str>) -> Option<String> {
    match language {
        None => None,
        Some(l) if l.trim().is_empty() || l.eq_ignore_ascii_case("auto") => None,
        Some(l) => Some(l.to_string()),
    }
}

pub const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(300);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_plan_always_ends_in_standard() {
        for device in [DeviceKind::Cpu, DeviceKind::Accelerator, DeviceKind::UnifiedAccelerator] {
            let plan = StrategyPlanner::plan(device);
            assert_eq!(*plan.last().unwrap(), RuntimeStrategy::Standard);
        }
    }

    #[test]
    fn accelerator_plan_tries_accelerator_before_standard() {
        let plan = StrategyPlanner::plan(DeviceKind::Accelerator);
        assert_eq!(plan, vec![RuntimeStrategy::Accelerator, RuntimeStrategy::Standard]);
    }

    #[test]
    fn load_with_fallback_stops_at_first_success() {
        let plan = vec![RuntimeStrategy::Accelerator, RuntimeStrategy::Standard];
        let mut calls = Vec::new();
        let result = load_with_fallback(&plan, |s| {
            calls.push(s);
            if s == RuntimeStrategy::Accelerator {
                Err(crate::error::Error::resource("no accelerator"))
            } else {
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(result.strategy_used, RuntimeStrategy::Standard);
        assert_eq!(result.attempts_failed.len(), 1);
        assert_eq!(calls, vec![RuntimeStrategy::Accelerator, RuntimeStrategy::Standard]);
    }

    #[test]
    fn load_with_fallback_fails_when_every_strategy_fails() {
        let plan = vec![RuntimeStrategy::Standard];
        let err = load_with_fallback(&plan, |_| Err(crate::error::Error::resource("boom"))).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn dynamic_token_budget_floors_short_chunks() {
        assert_eq!(dynamic_token_budget(0.0), 400);
    }

    #[test]
    fn dynamic_token_budget_caps_long_chunks() {
        assert_eq!(dynamic_token_budget(1000.0), 2048);
    }

    #[test]
    fn dynamic_token_budget_rounds_fractional_seconds_up() {
        // 20.1 * 5 = 100.5, which must ceil to 101 before the +300 headroom, not truncate to 100.
        assert_eq!(dynamic_token_budget(20.1), 401);
    }

    #[test]
    fn normalize_language_treats_auto_and_empty_as_none() {
        assert_eq!(normalize_language(None), None);
        assert_eq!(normalize_language(Some("auto")), None);
        assert_eq!(normalize_language(Some("")), None);
        assert_eq!(normalize_language(Some("en")), Some("en".to_string()));
    }
}
