//! Core API Facade: the one type embedders construct, wiring together the runtime adapter,
//! orchestrator, and background maintenance tasks.

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::job::{JobSnapshot, TranscriptionRequest, TranscriptionResponse};
use crate::orchestrator::{Orchestrator, OrchestratorObserver};
use crate::resource_monitor::{ResourceMonitor, ThresholdBreach};
use crate::runtime::{ModelRuntime, RuntimeCapabilities, RuntimeHealth, StrategyPlanner, load_with_fallback};
use crate::session::SessionManager;

/// Overall process health, the shape `/healthz` reports.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub runtime: RuntimeHealth,
    pub active_jobs: usize,
}

/// Static-ish process information, the shape `/v1/info` reports.
#[derive(Debug, Clone)]
pub struct InfoReport {
    pub model_name: String,
    pub device: crate::config::DeviceKind,
    pub runtime_capabilities: RuntimeCapabilities,
    pub max_concurrent_requests: usize,
    pub active_jobs: usize,
}

pub struct Core {
    orchestrator: Arc<Orchestrator>,
    config: Config,
}

impl Core {
    /// Load a runtime under `config`'s device-derived strategy plan, then stand up the
    /// orchestrator and background maintenance loops around it.
    pub fn bootstrap(runtime: Box<dyn ModelRuntimeLoader>, config: Config) -> Result<Self> {
        Self::bootstrap_with_observer(runtime, config, Arc::new(NoopOrchestratorObserver))
    }

    /// Like [`Core::bootstrap`], but lets an embedder observe job/chunk lifecycle events (e.g. to
    /// feed a metrics backend) without this crate depending on one itself.
    pub fn bootstrap_with_observer(
        mut runtime: Box<dyn ModelRuntimeLoader>,
        config: Config,
        observer: Arc<dyn OrchestratorObserver>,
    ) -> Result<Self> {
        let plan = StrategyPlanner::plan(config.device);
        let model_name = config.model_name.clone();
        let cache_dir = config.model_cache_dir.clone();

        load_with_fallback(&plan, |_strategy| runtime.load(&model_name, &cache_dir))?;

        let runtime = Arc::from(runtime.into_runtime());
        let orchestrator = Arc::new(Orchestrator::new(runtime, config.clone()).with_observer(observer));

        Ok(Self { orchestrator, config })
    }

    pub fn submit_file(&self, request: TranscriptionRequest) -> Result<String> {
        self.orchestrator.submit_file(request)
    }

    pub fn get_job(&self, job_id: &str) -> Option<JobSnapshot> {
        self.orchestrator.get_job(job_id)
    }

    pub fn cancel_job(&self, job_id: &str) -> bool {
        self.orchestrator.cancel_job(job_id)
    }

    pub fn get_response(&self, job_id: &str) -> Option<TranscriptionResponse> {
        self.orchestrator.get_response(job_id)
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            runtime: self.orchestrator.runtime_health(),
            active_jobs: self.orchestrator.active_job_count(),
        }
    }

    /// Process metadata for `/v1/info`: what model is loaded, what it's capable of, and how
    /// busy this instance currently is.
    pub fn info(&self) -> InfoReport {
        InfoReport {
            model_name: self.config.model_name.clone(),
            device: self.config.device,
            runtime_capabilities: self.orchestrator.runtime_capabilities(),
            max_concurrent_requests: self.config.max_concurrent_requests,
            active_jobs: self.orchestrator.active_job_count(),
        }
    }

    /// Unload and reload the configured model in place. Rejected with a `busy` resource error
    /// while any job is active; see [`Orchestrator::reload_runtime`].
    pub fn reload_model(&self) -> Result<()> {
        self.orchestrator.reload_runtime(&self.config.model_name, &self.config.model_cache_dir)
    }

    pub fn spawn_resource_monitor(&self, mut monitor: ResourceMonitor) {
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(monitor.check_interval()).await;
                let Some(sample) = monitor.sample() else { continue };
                if let Some(breach) = monitor.check_thresholds(sample) {
                    tracing::error!(?breach, "resource threshold breached");
                    if monitor.emergency_shutdown_enabled() {
                        emergency_shutdown(&orchestrator, breach);
                    }
                }
            }
        });
    }

    /// Periodically sweep scratch directories: idle eviction, stale-age eviction, and
    /// emergency free-space eviction, per [`SessionManager::sweep`].
    pub fn spawn_session_sweep(&self, sessions: Arc<SessionManager>) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(sessions.sweep_interval()).await;
                match sessions.sweep(crate::session::disk_free_bytes) {
                    Ok(stats) => {
                        if stats.evicted_idle + stats.evicted_stale + stats.evicted_emergency > 0 {
                            tracing::info!(?stats, "session sweep reclaimed scratch space");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "session sweep failed"),
                }
            }
        });
    }

    /// The session manager backing this instance's scratch directories, for wiring
    /// [`Core::spawn_session_sweep`] from an embedder's startup code.
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.orchestrator.sessions()
    }
}

fn emergency_shutdown(_orchestrator: &Arc<Orchestrator>, breach: ThresholdBreach) {
    tracing::error!(?breach, "emergency shutdown triggered, exiting process");
    std::process::exit(1);
}

/// Bridges a not-yet-loaded runtime into [`Core::bootstrap`]: `load` is retried per strategy
/// before the runtime is handed off, so a failed accelerator load never leaves a half-loaded
/// runtime behind for the fallback attempt to inherit.
pub trait ModelRuntimeLoader: Send {
    fn load(&mut self, model_name: &str, cache_dir: &std::path::Path) -> Result<()>;
    fn into_runtime(self: Box<Self>) -> Box<dyn ModelRuntime>;
}

struct NoopOrchestratorObserver;
impl OrchestratorObserver for NoopOrchestratorObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    struct MockLoader(MockRuntime);

    impl ModelRuntimeLoader for MockLoader {
        fn load(&mut self, model_name: &str, cache_dir: &std::path::Path) -> Result<()> {
            self.0.load(model_name, cache_dir)
        }
        fn into_runtime(self: Box<Self>) -> Box<dyn ModelRuntime> {
            Box::new(self.0)
        }
    }

    #[test]
    fn bootstrap_loads_runtime_and_reports_ready_health() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            temp_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        let core = Core::bootstrap(Box::new(MockLoader(MockRuntime::new())), config).unwrap();
        assert_eq!(core.health().runtime, RuntimeHealth::Ready);
    }

    #[test]
    fn info_reports_configured_model_and_idle_job_count() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            temp_root: dir.path().to_path_buf(),
            model_name: "tiny".to_string(),
            ..Config::default()
        };
        let core = Core::bootstrap(Box::new(MockLoader(MockRuntime::new())), config).unwrap();
        let info = core.info();
        assert_eq!(info.model_name, "tiny");
        assert_eq!(info.active_jobs, 0);
    }

    #[test]
    fn reload_model_succeeds_while_idle() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            temp_root: dir.path().to_path_buf(),
            ..Config::default()
        };
        let core = Core::bootstrap(Box::new(MockLoader(MockRuntime::new())), config).unwrap();
        core.reload_model().unwrap();
        assert_eq!(core.health().runtime, RuntimeHealth::Ready);
    }
}
