use chrono::{DateTime, Utc};
use serde::Serialize;

const MB: f64 = 1024.0 * 1024.0;

/// Resource usage of a single process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessMetrics {
    /// CPU usage in percent of one core, one decimal place
    pub cpu: f64,

    /// Resident memory in megabytes (rounded)
    pub memory: u64,

    /// Time since the process started, in milliseconds
    pub elapsed: u64,

    /// Capture time (Unix milliseconds)
    pub timestamp: i64,
}

impl ProcessMetrics {
    /// Recomputes `elapsed` against a known start time, to the millisecond
    pub fn measured_from(mut self, started_at: DateTime<Utc>) -> Self {
        self.elapsed = (self.timestamp - started_at.timestamp_millis()).max(0) as u64;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuInfo {
    /// Average utilisation across logical CPUs
    pub usage: f64,
    pub cores: usize,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub usage_percent: u64,
}

impl MemoryInfo {
    /// Builds the megabyte view from byte counts; `used` is whatever is not free
    pub fn from_bytes(total: u64, free: u64) -> Self {
        let free = free.min(total);
        let used = total - free;
        let usage_percent = if total > 0 {
            (used as f64 / total as f64 * 100.0).round() as u64
        } else {
            0
        };

        Self {
            total: bytes_to_mb(total),
            used: bytes_to_mb(used),
            free: bytes_to_mb(free),
            usage_percent,
        }
    }
}

/// Whole-machine snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub platform: String,
    /// System uptime in seconds
    pub uptime: u64,
    pub timestamp: i64,
}

pub fn bytes_to_mb(bytes: u64) -> u64 {
    (bytes as f64 / MB).round() as u64
}

/// Rounds to one decimal place
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_from_bytes() {
        let total = 16 * 1024 * 1024 * 1024u64;
        let free = 4 * 1024 * 1024 * 1024u64;
        let mem = MemoryInfo::from_bytes(total, free);

        assert_eq!(mem.total, 16384);
        assert_eq!(mem.free, 4096);
        assert_eq!(mem.used, 12288);
        assert_eq!(mem.usage_percent, 75);
    }

    #[test]
    fn test_memory_zero_total() {
        let mem = MemoryInfo::from_bytes(0, 10);
        assert_eq!(mem.usage_percent, 0);
        assert_eq!(mem.used, 0);
    }

    #[test]
    fn test_elapsed_from_start_time() {
        let started = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let metrics = ProcessMetrics {
            cpu: 0.0,
            memory: 1,
            elapsed: 1000,
            timestamp: 1_700_000_001_337,
        };
        assert_eq!(metrics.clone().measured_from(started).elapsed, 1337);

        // clock skew never yields a negative duration
        let later = DateTime::from_timestamp_millis(1_700_000_002_000).unwrap();
        assert_eq!(metrics.measured_from(later).elapsed, 0);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round1(12.345), 12.3);
        assert_eq!(round1(0.06), 0.1);
        assert_eq!(bytes_to_mb(1536 * 1024), 2);
        assert_eq!(bytes_to_mb(1024 * 1024 - 1), 1);
    }
}
