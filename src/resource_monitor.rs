//! Resource Monitor: samples process memory/CPU/GPU on a timer and triggers an emergency
//! shutdown callback when any configured threshold is crossed.
//!
//! Sampling reads `/proc/self/status` and `/proc/stat` directly rather than through a crate
//! like `sysinfo`, since the only numbers needed are resident memory and total CPU jiffies,
//! and reading two small files on an interval is cheaper than the generic cross-platform
//! abstraction. This is Linux-only; the sampler reports `None` everywhere else, which
//! disables threshold checks rather than failing to start.

use std::time::{Duration, Instant};

use crate::config::DeviceKind;

/// Hard GPU memory ceiling; unlike RAM/CPU this isn't operator-configurable.
const GPU_MEMORY_LIMIT_GB: f64 = 4.0;

/// One measurement of process resource use.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSample {
    pub memory_bytes: u64,
    pub cpu_percent: f64,
    pub gpu_memory_bytes: u64,
}

pub struct ResourceMonitor {
    max_memory_gb: f64,
    max_cpu_percent: f64,
    check_interval: Duration,
    emergency_shutdown_enabled: bool,
    device: DeviceKind,
    last_cpu_jiffies: Option<(u64, Instant)>,
}

/// What a threshold check found, if anything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdBreach {
    Memory,
    Gpu,
    Cpu,
}

impl ResourceMonitor {
    pub fn new(
        max_memory_gb: f64,
        max_cpu_percent: f64,
        check_interval: Duration,
        emergency_shutdown_enabled: bool,
        device: DeviceKind,
    ) -> Self {
        Self {
            max_memory_gb,
            max_cpu_percent,
            check_interval,
            emergency_shutdown_enabled,
            device,
            last_cpu_jiffies: None,
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    pub fn emergency_shutdown_enabled(&self) -> bool {
        self.emergency_shutdown_enabled
    }

    /// Sample current usage. Never blocks on anything but two small file reads.
    pub fn sample(&mut self) -> Option<ResourceSample> {
        let memory_bytes = read_memory_bytes()?;
        let cpu_percent = self.read_cpu_percent().unwrap_or(0.0);
        let gpu_memory_bytes = self.approximate_gpu_memory_bytes(memory_bytes);
        Some(ResourceSample { memory_bytes, cpu_percent, gpu_memory_bytes })
    }

    /// No GPU is actually driven by this crate, so usage is approximated the way the unified-
    /// memory case is on Apple Silicon: GPU and system RAM share one pool, so a fixed fraction
    /// of resident memory stands in for dedicated GPU memory. CPU-only deployments report zero.
    fn approximate_gpu_memory_bytes(&self, memory_bytes: u64) -> u64 {
        match self.device {
            DeviceKind::Cpu => 0,
            DeviceKind::Accelerator | DeviceKind::UnifiedAccelerator => memory_bytes / 2,
        }
    }

    /// Compare a sample against the configured thresholds. Returns the first breach found;
    /// memory is checked before GPU before CPU, since OOM is the most urgent failure mode.
    pub fn check_thresholds(&self, sample: ResourceSample) -> Option<ThresholdBreach> {
        let memory_gb = sample.memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        if memory_gb > self.max_memory_gb {
            return Some(ThresholdBreach::Memory);
        }
        let gpu_memory_gb = sample.gpu_memory_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
        if gpu_memory_gb > GPU_MEMORY_LIMIT_GB {
            return Some(ThresholdBreach::Gpu);
        }
        if sample.cpu_percent > self.max_cpu_percent {
            return Some(ThresholdBreach::Cpu);
        }
        None
    }

    fn read_cpu_percent(&mut self) -> Option<f64> {
        let jiffies = read_process_jiffies()?;
        let now = Instant::now();

        let percent = match self.last_cpu_jiffies {
            Some((prev_jiffies, prev_time)) => {
                let elapsed = now.duration_since(prev_time).as_secs_f64();
                if elapsed <= 0.0 {
                    0.0
                } else {
                    let delta_jiffies = jiffies.saturating_sub(prev_jiffies) as f64;
                    let clock_ticks_per_sec = 100.0;
                    (delta_jiffies / clock_ticks_per_sec / elapsed) * 100.0
                }
            }
            None => 0.0,
        };

        self.last_cpu_jiffies = Some((jiffies, now));
        Some(percent)
    }
}

#[cfg(target_os = "linux")]
fn read_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_memory_bytes() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn read_process_jiffies() -> Option<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    // Fields 14 (utime) and 15 (stime) are CPU time in clock ticks; the process name field
    // can itself contain spaces/parens, so split after the last ')'.
    let after_comm = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(not(target_os = "linux"))]
fn read_process_jiffies() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_breach_takes_priority_over_cpu() {
        let monitor = ResourceMonitor::new(1.0, 50.0, Duration::from_secs(30), true, DeviceKind::Cpu);
        let sample = ResourceSample {
            memory_bytes: 2 * 1024 * 1024 * 1024,
            cpu_percent: 99.0,
            gpu_memory_bytes: 0,
        };
        assert_eq!(monitor.check_thresholds(sample), Some(ThresholdBreach::Memory));
    }

    #[test]
    fn cpu_breach_detected_when_memory_is_fine() {
        let monitor = ResourceMonitor::new(8.0, 50.0, Duration::from_secs(30), true, DeviceKind::Cpu);
        let sample = ResourceSample {
            memory_bytes: 1024 * 1024 * 1024,
            cpu_percent: 95.0,
            gpu_memory_bytes: 0,
        };
        assert_eq!(monitor.check_thresholds(sample), Some(ThresholdBreach::Cpu));
    }

    #[test]
    fn no_breach_within_thresholds() {
        let monitor = ResourceMonitor::new(8.0, 90.0, Duration::from_secs(30), true, DeviceKind::Cpu);
        let sample = ResourceSample {
            memory_bytes: 1024 * 1024 * 1024,
            cpu_percent: 10.0,
            gpu_memory_bytes: 0,
        };
        assert_eq!(monitor.check_thresholds(sample), None);
    }

    #[test]
    fn gpu_breach_takes_priority_over_cpu_but_not_memory() {
        let monitor = ResourceMonitor::new(8.0, 50.0, Duration::from_secs(30), true, DeviceKind::Accelerator);
        let sample = ResourceSample {
            memory_bytes: 1024 * 1024 * 1024,
            cpu_percent: 95.0,
            gpu_memory_bytes: 5 * 1024 * 1024 * 1024,
        };
        assert_eq!(monitor.check_thresholds(sample), Some(ThresholdBreach::Gpu));
    }

    #[test]
    fn cpu_only_devices_never_report_gpu_usage() {
        let monitor = ResourceMonitor::new(8.0, 90.0, Duration::from_secs(30), true, DeviceKind::Cpu);
        assert_eq!(monitor.approximate_gpu_memory_bytes(32 * 1024 * 1024 * 1024), 0);
    }

    #[test]
    fn accelerator_devices_approximate_gpu_usage_from_resident_memory() {
        let monitor = ResourceMonitor::new(8.0, 90.0, Duration::from_secs(30), true, DeviceKind::UnifiedAccelerator);
        assert_eq!(monitor.approximate_gpu_memory_bytes(10 * 1024 * 1024 * 1024), 5 * 1024 * 1024 * 1024);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn sampling_on_linux_returns_nonzero_memory() {
        let mut monitor = ResourceMonitor::new(8.0, 90.0, Duration::from_secs(30), false, DeviceKind::Cpu);
        let sample = monitor.sample().expect("sampling should succeed on linux");
        assert!(sample.memory_bytes > 0);
    }
}
