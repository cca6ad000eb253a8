use chrono::{DateTime, Utc};
use serde::Serialize;

pub use crate::models::stats::ProcessMetrics;

/// Point-in-time view of a registry entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedProcess {
    /// Server identifier (registry key)
    pub server_id: String,
    /// Display name of the server
    pub name: String,
    /// OS process id of the spawned child
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Answer to a status query
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub id: String,
    pub running: bool,
    pub pid: Option<u32>,
    /// Absent while stopped, or when the process vanished before it could be sampled
    pub metrics: Option<ProcessMetrics>,
}
