use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

use crate::models::stats::round1;
use crate::models::{CpuInfo, MemoryInfo, ProcessMetrics, SystemMetrics};

/// Cumulative per-CPU tick counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub idle: u64,
    pub total: u64,
}

/// Reads process and machine resource usage from the OS.
///
/// One `System` is kept between calls; sysinfo derives process CPU usage from
/// the difference between two refreshes.
pub struct MetricsProbe {
    system: Arc<Mutex<System>>,
}

impl Default for MetricsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProbe {
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new_all())),
        }
    }

    /// `None` when the process is gone; that is "no metrics right now", not an error
    pub async fn sample_process(&self, pid: u32) -> Option<ProcessMetrics> {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || {
            let mut sys = system.lock().ok()?;
            read_process(&mut sys, pid)
        })
        .await
        .ok()
        .flatten()
    }

    /// Samples several pids in one refresh; vanished pids are left out
    pub async fn sample_processes(&self, pids: Vec<u32>) -> HashMap<u32, ProcessMetrics> {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || {
            let mut result = HashMap::new();
            let Ok(mut sys) = system.lock() else {
                return result;
            };
            let targets: Vec<Pid> = pids.iter().map(|p| Pid::from_u32(*p)).collect();
            sys.refresh_processes(ProcessesToUpdate::Some(&targets), true);
            for pid in pids {
                if let Some(metrics) = snapshot(&sys, pid) {
                    result.insert(pid, metrics);
                }
            }
            result
        })
        .await
        .unwrap_or_default()
    }

    pub async fn sample_system(&self) -> SystemMetrics {
        let system = Arc::clone(&self.system);
        let sampled = tokio::task::spawn_blocking(move || {
            let mut sys = system.lock().unwrap_or_else(|e| e.into_inner());
            read_system(&mut sys)
        })
        .await;

        match sampled {
            Ok(metrics) => metrics,
            Err(e) => {
                log::error!("System metrics task failed: {}", e);
                let mut sys = self.system.lock().unwrap_or_else(|e| e.into_inner());
                read_system(&mut sys)
            }
        }
    }
}

fn read_process(sys: &mut System, pid: u32) -> Option<ProcessMetrics> {
    sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    snapshot(sys, pid)
}

fn snapshot(sys: &System, pid: u32) -> Option<ProcessMetrics> {
    let process = sys.process(Pid::from_u32(pid))?;
    if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
        return None;
    }

    Some(ProcessMetrics {
        cpu: round1(process.cpu_usage() as f64),
        memory: crate::models::stats::bytes_to_mb(process.memory()),
        // whole seconds only; callers that know the spawn time refine it
        elapsed: process.run_time() * 1000,
        timestamp: Utc::now().timestamp_millis(),
    })
}

fn read_system(sys: &mut System) -> SystemMetrics {
    sys.refresh_memory();
    sys.refresh_cpu_all();

    let cpus = sys.cpus();
    let usage = cumulative_cpu_ticks()
        .and_then(|ticks| cumulative_usage(&ticks))
        .unwrap_or_else(|| round1(sys.global_cpu_usage() as f64));

    SystemMetrics {
        cpu: CpuInfo {
            usage,
            cores: cpus.len(),
            model: cpus
                .first()
                .map(|cpu| cpu.brand().trim().to_string())
                .unwrap_or_default(),
        },
        memory: MemoryInfo::from_bytes(sys.total_memory(), sys.available_memory()),
        platform: platform().to_string(),
        uptime: System::uptime(),
        timestamp: Utc::now().timestamp_millis(),
    }
}

/// `100 × (1 − meanIdle / meanTotal)` over all logical CPUs, one decimal place.
///
/// The counters are cumulative since boot, so the figure is a long-run
/// average rather than a recent-window rate.
pub fn cumulative_usage(cpus: &[CpuTicks]) -> Option<f64> {
    let count = cpus.len() as f64;
    if count == 0.0 {
        return None;
    }
    let idle = cpus.iter().map(|c| c.idle as f64).sum::<f64>() / count;
    let total = cpus.iter().map(|c| c.total as f64).sum::<f64>() / count;
    if total <= 0.0 {
        return None;
    }
    Some(round1(100.0 - 100.0 * idle / total))
}

#[cfg(target_os = "linux")]
fn cumulative_cpu_ticks() -> Option<Vec<CpuTicks>> {
    use procfs::{CurrentSI, KernelStats};

    let stats = match KernelStats::current() {
        Ok(stats) => stats,
        Err(e) => {
            log::debug!("Failed to read /proc/stat: {}", e);
            return None;
        }
    };

    Some(
        stats
            .cpu_time
            .iter()
            .map(|t| {
                let busy = t.user
                    + t.nice
                    + t.system
                    + t.iowait.unwrap_or(0)
                    + t.irq.unwrap_or(0)
                    + t.softirq.unwrap_or(0)
                    + t.steal.unwrap_or(0);
                CpuTicks {
                    idle: t.idle,
                    total: busy + t.idle,
                }
            })
            .collect(),
    )
}

#[cfg(not(target_os = "linux"))]
fn cumulative_cpu_ticks() -> Option<Vec<CpuTicks>> {
    None
}

/// Platform identifier in the conventional short form
pub fn platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}
