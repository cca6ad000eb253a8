use prometheus::core::Collector;
use prometheus::{
    Encoder, GaugeVec, Opts, Registry, TextEncoder,
    register_gauge_vec_with_registry,
};
use lazy_static::lazy_static;
use std::sync::Arc;
use sysinfo::System;

use crate::models::{ServerStatus, SystemMetrics, TrackedProcess};

pub struct MetricsRegistry {
    registry: Registry,
    hostname: String,

    // Per-server gauges
    pub server_up: GaugeVec,
    pub server_pid_info: GaugeVec,
    pub server_cpu_usage: GaugeVec,
    pub server_memory_megabytes: GaugeVec,
    pub server_elapsed_seconds: GaugeVec,

    // Machine gauges
    pub system_cpu_usage: GaugeVec,
    pub system_memory_total: GaugeVec,
    pub system_memory_used: GaugeVec,
    pub system_memory_free: GaugeVec,
    pub system_memory_percent: GaugeVec,
    pub system_uptime: GaugeVec,
}

fn gauge(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    register_gauge_vec_with_registry!(Opts::new(name, help), labels, registry)
        .expect("metric names are unique and valid")
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let registry = Registry::new();
        let hostname = System::host_name().unwrap_or_else(|| "unknown".to_string());

        let server_labels = &["id", "name", "hostname"];
        let host_labels = &["hostname"];

        Self {
            server_up: gauge(&registry, "dashboard_server_up", "Server process is running (1) or down (0)", server_labels),
            server_pid_info: gauge(&registry, "dashboard_server_pid_info", "Server process PID information", &["id", "pid", "hostname"]),
            server_cpu_usage: gauge(&registry, "dashboard_server_cpu_usage_percent", "Server process CPU usage percentage", server_labels),
            server_memory_megabytes: gauge(&registry, "dashboard_server_memory_megabytes", "Server process resident memory in megabytes", server_labels),
            server_elapsed_seconds: gauge(&registry, "dashboard_server_elapsed_seconds", "Seconds since the server process started", server_labels),
            system_cpu_usage: gauge(&registry, "dashboard_system_cpu_usage_percent", "Average CPU usage since boot", host_labels),
            system_memory_total: gauge(&registry, "dashboard_system_memory_total_megabytes", "Total physical memory in megabytes", host_labels),
            system_memory_used: gauge(&registry, "dashboard_system_memory_used_megabytes", "Used physical memory in megabytes", host_labels),
            system_memory_free: gauge(&registry, "dashboard_system_memory_free_megabytes", "Free physical memory in megabytes", host_labels),
            system_memory_percent: gauge(&registry, "dashboard_system_memory_usage_percent", "Used physical memory percentage", host_labels),
            system_uptime: gauge(&registry, "dashboard_system_uptime_seconds", "System uptime in seconds", host_labels),
            registry,
            hostname,
        }
    }

    /// Publishes one server; `down` servers keep only `dashboard_server_up 0`
    pub fn observe_server(&self, id: &str, name: &str, status: Option<(&TrackedProcess, &ServerStatus)>) {
        let labels = &[id, name, self.hostname.as_str()];
        self.clear_resource_series(id, name);

        let Some((tracked, status)) = status else {
            self.server_up.with_label_values(labels).set(0.0);
            return;
        };

        self.server_up.with_label_values(labels).set(1.0);
        self.server_pid_info
            .with_label_values(&[id, &tracked.pid.to_string(), self.hostname.as_str()])
            .set(1.0);

        if let Some(m) = &status.metrics {
            self.server_cpu_usage.with_label_values(labels).set(m.cpu);
            self.server_memory_megabytes.with_label_values(labels).set(m.memory as f64);
            self.server_elapsed_seconds.with_label_values(labels).set(m.elapsed as f64 / 1000.0);
        }
    }

    pub fn observe_system(&self, sys: &SystemMetrics) {
        let labels = &[self.hostname.as_str()];
        self.system_cpu_usage.with_label_values(labels).set(sys.cpu.usage);
        self.system_memory_total.with_label_values(labels).set(sys.memory.total as f64);
        self.system_memory_used.with_label_values(labels).set(sys.memory.used as f64);
        self.system_memory_free.with_label_values(labels).set(sys.memory.free as f64);
        self.system_memory_percent.with_label_values(labels).set(sys.memory.usage_percent as f64);
        self.system_uptime.with_label_values(labels).set(sys.uptime as f64);
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Drops every series of a deleted (or renamed) server
    pub fn reset_server_metrics(&self, id: &str, name: &str) {
        let labels = &[id, name, self.hostname.as_str()];
        let _ = self.server_up.remove_label_values(labels);
        self.clear_resource_series(id, name);
    }

    fn clear_resource_series(&self, id: &str, name: &str) {
        let labels = &[id, name, self.hostname.as_str()];
        let _ = self.server_cpu_usage.remove_label_values(labels);
        let _ = self.server_memory_megabytes.remove_label_values(labels);
        let _ = self.server_elapsed_seconds.remove_label_values(labels);

        // the pid label changes between runs, so match on id instead
        for family in self.server_pid_info.collect() {
            for metric in family.get_metric() {
                let pairs = metric.get_label();
                let value = |key: &str| {
                    pairs
                        .iter()
                        .find(|p| p.get_name() == key)
                        .map(|p| p.get_value().to_string())
                        .unwrap_or_default()
                };
                if value("id") == id {
                    let pid = value("pid");
                    let host = value("hostname");
                    let _ = self
                        .server_pid_info
                        .remove_label_values(&[id, pid.as_str(), host.as_str()]);
                }
            }
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(MetricsRegistry::new());
}
