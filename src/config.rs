//! Process-wide configuration.
//!
//! Every recognized key is a field here; parsing unknown environment variables is simply
//! not attempted, which is how "unknown keys are ignored" falls out for free. There is no
//! config-file format: callers that want one layer it on top of [`Config::from_env`].

use std::path::PathBuf;
use std::time::Duration;

/// Compute device a [`crate::runtime::ModelRuntime`] strategy may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Accelerator,
    UnifiedAccelerator,
}

impl DeviceKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "cpu" => Some(Self::Cpu),
            "accelerator" => Some(Self::Accelerator),
            "unified-accelerator" => Some(Self::UnifiedAccelerator),
            _ => None,
        }
    }
}

/// Processing shape for a single job: chunking, resampling, and denoise/VAD toggles.
///
/// Immutable for the lifetime of the job it was captured for.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingConfig {
    pub target_sample_rate: u32,
    pub chunk_duration_minutes: u32,
    pub overlap_seconds: u32,
    pub noise_reduction: bool,
    pub vad_enabled: bool,
    pub max_concurrent_chunks: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            chunk_duration_minutes: 10,
            overlap_seconds: 3,
            noise_reduction: true,
            vad_enabled: true,
            max_concurrent_chunks: 3,
        }
    }
}

/// Process-wide configuration covering every key in the external interface.
#[derive(Debug, Clone)]
pub struct Config {
    pub processing: ProcessingConfig,

    pub max_concurrent_requests: usize,
    pub model_timeout: Duration,
    pub inference_timeout: Duration,
    pub upload_timeout: Duration,

    pub vad_aggressiveness: u8,

    pub model_name: String,
    pub model_cache_dir: PathBuf,
    pub device: DeviceKind,

    pub enable_progress_notifications: bool,
    pub node_service_url: Option<String>,

    pub max_memory_gb: f64,
    pub max_cpu_percent: f64,
    pub memory_check_interval: Duration,
    pub emergency_shutdown_enabled: bool,

    pub max_audio_length_seconds: u32,
    pub max_file_size_bytes: u64,

    pub temp_root: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            max_concurrent_requests: 5,
            model_timeout: Duration::from_secs(300),
            inference_timeout: Duration::from_secs(120),
            upload_timeout: Duration::from_secs(300),
            vad_aggressiveness: 3,
            model_name: "default".to_string(),
            model_cache_dir: PathBuf::from("./models"),
            device: DeviceKind::Cpu,
            enable_progress_notifications: false,
            node_service_url: None,
            max_memory_gb: 8.0,
            max_cpu_percent: 90.0,
            memory_check_interval: Duration::from_secs(30),
            emergency_shutdown_enabled: false,
            max_audio_length_seconds: 1_800,
            max_file_size_bytes: 500 * 1024 * 1024,
            temp_root: std::env::temp_dir().join("voxflow"),
        }
    }
}

impl Config {
    /// Overlay `VOXFLOW_*` environment variables onto [`Config::default`].
    ///
    /// A malformed value for a key falls back to the default and logs a warning rather than
    /// failing the process; config loading itself is not a hard contract for this crate.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        Self::apply_u32(&mut cfg.processing.target_sample_rate, "VOXFLOW_SAMPLE_RATE");
        Self::apply_u32(
            &mut cfg.processing.chunk_duration_minutes,
            "VOXFLOW_CHUNK_DURATION_MINUTES",
        );
        Self::apply_u32(&mut cfg.processing.overlap_seconds, "VOXFLOW_OVERLAP_SECONDS");
        Self::apply_bool(&mut cfg.processing.noise_reduction, "VOXFLOW_NOISE_REDUCTION");
        Self::apply_bool(&mut cfg.processing.vad_enabled, "VOXFLOW_VAD_ENABLED");
        Self::apply_usize(
            &mut cfg.processing.max_concurrent_chunks,
            "VOXFLOW_MAX_CONCURRENT_CHUNKS",
        );
        Self::apply_usize(
            &mut cfg.max_concurrent_requests,
            "VOXFLOW_MAX_CONCURRENT_REQUESTS",
        );
        Self::apply_secs(&mut cfg.model_timeout, "VOXFLOW_MODEL_TIMEOUT");
        Self::apply_secs(&mut cfg.inference_timeout, "VOXFLOW_INFERENCE_TIMEOUT");
        Self::apply_secs(&mut cfg.upload_timeout, "VOXFLOW_UPLOAD_TIMEOUT");
        Self::apply_u8(&mut cfg.vad_aggressiveness, "VOXFLOW_VAD_AGGRESSIVENESS");

        if let Ok(v) = std::env::var("VOXFLOW_MODEL_NAME") {
            cfg.model_name = v;
        }
        if let Ok(v) = std::env::var("VOXFLOW_MODEL_CACHE_DIR") {
            cfg.model_cache_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VOXFLOW_DEVICE") {
            match DeviceKind::parse(&v) {
                Some(device) => cfg.device = device,
                None => tracing::warn!(value = %v, "invalid VOXFLOW_DEVICE, keeping default"),
            }
        }

        Self::apply_bool(
            &mut cfg.enable_progress_notifications,
            "VOXFLOW_ENABLE_PROGRESS_NOTIFICATIONS",
        );
        if let Ok(v) = std::env::var("VOXFLOW_NODE_SERVICE_URL") {
            cfg.node_service_url = Some(v);
        }

        Self::apply_f64(&mut cfg.max_memory_gb, "VOXFLOW_MAX_MEMORY_GB");
        Self::apply_f64(&mut cfg.max_cpu_percent, "VOXFLOW_MAX_CPU_PERCENT");
        Self::apply_secs(&mut cfg.memory_check_interval, "VOXFLOW_MEMORY_CHECK_INTERVAL");
        Self::apply_bool(
            &mut cfg.emergency_shutdown_enabled,
            "VOXFLOW_EMERGENCY_SHUTDOWN_ENABLED",
        );

        Self::apply_u32(
            &mut cfg.max_audio_length_seconds,
            "VOXFLOW_MAX_AUDIO_LENGTH_SECONDS",
        );
        Self::apply_u64(&mut cfg.max_file_size_bytes, "VOXFLOW_MAX_FILE_SIZE_BYTES");

        if let Ok(v) = std::env::var("VOXFLOW_TEMP_ROOT") {
            cfg.temp_root = PathBuf::from(v);
        }

        cfg
    }

    fn apply_u32(field: &mut u32, var: &str) {
        if let Ok(v) = std::env::var(var) {
            match v.parse() {
                Ok(parsed) => *field = parsed,
                Err(_) => tracing::warn!(%var, value = %v, "invalid integer, keeping default"),
            }
        }
    }

    fn apply_u64(field: &mut u64, var: &str) {
        if let Ok(v) = std::env::var(var) {
            match v.parse() {
                Ok(parsed) => *field = parsed,
                Err(_) => tracing::warn!(%var, value = %v, "invalid integer, keeping default"),
            }
        }
    }

    fn apply_usize(field: &mut usize, var: &str) {
        if let Ok(v) = std::env::var(var) {
            match v.parse() {
                Ok(parsed) => *field = parsed,
                Err(_) => tracing::warn!(%var, value = %v, "invalid integer, keeping default"),
            }
        }
    }

    fn apply_u8(field: &mut u8, var: &str) {
        if let Ok(v) = std::env::var(var) {
            match v.parse() {
                Ok(parsed) => *field = parsed,
                Err(_) => tracing::warn!(%var, value = %v, "invalid integer, keeping default"),
            }
        }
    }

    fn apply_f64(field: &mut f64, var: &str) {
        if let Ok(v) = std::env::var(var) {
            match v.parse() {
                Ok(parsed) => *field = parsed,
                Err(_) => tracing::warn!(%var, value = %v, "invalid float, keeping default"),
            }
        }
    }

    fn apply_bool(field: &mut bool, var: &str) {
        if let Ok(v) = std::env::var(var) {
            match v.parse() {
                Ok(parsed) => *field = parsed,
                Err(_) => tracing::warn!(%var, value = %v, "invalid bool, keeping default"),
            }
        }
    }

    fn apply_secs(field: &mut Duration, var: &str) {
        if let Ok(v) = std::env::var(var) {
            match v.parse::<u64>() {
                Ok(parsed) => *field = Duration::from_secs(parsed),
                Err(_) => tracing::warn!(%var, value = %v, "invalid duration, keeping default"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interface() {
        let cfg = Config::default();
        assert_eq!(cfg.processing.target_sample_rate, 16_000);
        assert_eq!(cfg.processing.chunk_duration_minutes, 10);
        assert_eq!(cfg.processing.overlap_seconds, 3);
        assert_eq!(cfg.max_audio_length_seconds, 1_800);
        assert_eq!(cfg.max_file_size_bytes, 500 * 1024 * 1024);
    }

    #[test]
    fn device_kind_parses_known_values() {
        assert_eq!(DeviceKind::parse("cpu"), Some(DeviceKind::Cpu));
        assert_eq!(DeviceKind::parse("accelerator"), Some(DeviceKind::Accelerator));
        assert_eq!(
            DeviceKind::parse("unified-accelerator"),
            Some(DeviceKind::UnifiedAccelerator)
        );
        assert_eq!(DeviceKind::parse("quantum"), None);
    }

    #[test]
    fn from_env_ignores_malformed_values() {
        // SAFETY: test-only env mutation, no concurrent access to this var elsewhere.
        unsafe {
            std::env::set_var("VOXFLOW_SAMPLE_RATE", "not-a-number");
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.processing.target_sample_rate, 16_000);
        unsafe {
            std::env::remove_var("VOXFLOW_SAMPLE_RATE");
        }
    }
}
