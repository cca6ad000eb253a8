use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;

use crate::models::{ServerDefinition, ServerStatus, SystemMetrics, TrackedProcess};
use crate::services::probe::MetricsProbe;
use crate::services::registry::ProcessRegistry;
use crate::services::store::{ServerStore, StoreError};
use crate::services::supervisor::{StartError, Supervisor};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Server not found")]
    NotFound(String),

    #[error("Server already running")]
    AlreadyRunning(String),

    #[error("Server not running")]
    NotRunning(String),

    #[error("Failed to start server")]
    StartFailed(#[source] StartError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Lifecycle operations the request layer calls into.
///
/// Composes the store, the supervisor, the registry and the probe; none of
/// those know about each other.
pub struct ServerControl {
    store: Arc<ServerStore>,
    supervisor: Supervisor,
    registry: ProcessRegistry,
    probe: MetricsProbe,
}

impl ServerControl {
    pub fn new(store: Arc<ServerStore>, supervisor: Supervisor) -> Self {
        Self {
            store,
            supervisor,
            registry: ProcessRegistry::new(),
            probe: MetricsProbe::new(),
        }
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub async fn start_server(&self, id: &str) -> Result<TrackedProcess, ControlError> {
        // claim first: a concurrent start of the same id fails right here
        let reservation = self
            .registry
            .reserve(id)
            .map_err(|_| ControlError::AlreadyRunning(id.to_string()))?;

        let server = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ControlError::NotFound(id.to_string()))?;

        let handle = self
            .supervisor
            .start(&server)
            .await
            .map_err(ControlError::StartFailed)?;

        Ok(reservation.commit(handle))
    }

    pub async fn stop_server(&self, id: &str) -> Result<(), ControlError> {
        let handle = self
            .registry
            .begin_stop(id)
            .ok_or_else(|| ControlError::NotRunning(id.to_string()))?;

        self.supervisor.stop(&handle).await;
        self.registry.remove(id, handle.pid);
        Ok(())
    }

    pub async fn get_status(&self, id: &str) -> ServerStatus {
        let Some(handle) = self.registry.get(id) else {
            return ServerStatus {
                id: id.to_string(),
                running: false,
                pid: None,
                metrics: None,
            };
        };

        ServerStatus {
            id: id.to_string(),
            running: true,
            pid: Some(handle.pid),
            metrics: self
                .probe
                .sample_process(handle.pid)
                .await
                .map(|m| m.measured_from(handle.started_at)),
        }
    }

    /// Statuses of every tracked process, sampled in one pass
    pub async fn running_statuses(&self) -> Vec<(TrackedProcess, ServerStatus)> {
        let tracked = self.registry.list();
        let mut metrics = self
            .probe
            .sample_processes(tracked.iter().map(|t| t.pid).collect())
            .await;

        tracked
            .into_iter()
            .map(|t| {
                let status = ServerStatus {
                    id: t.server_id.clone(),
                    running: true,
                    pid: Some(t.pid),
                    metrics: metrics.remove(&t.pid).map(|m| m.measured_from(t.started_at)),
                };
                (t, status)
            })
            .collect()
    }

    pub async fn get_system_metrics(&self) -> SystemMetrics {
        self.probe.sample_system().await
    }

    /// Stops the process if running, then drops the definition
    pub async fn delete_server(&self, id: &str) -> Result<ServerDefinition, ControlError> {
        match self.stop_server(id).await {
            Ok(()) | Err(ControlError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }

        // hold the id so no start can commit a process for a removed record
        let _claim = self
            .registry
            .reserve(id)
            .map_err(|_| ControlError::AlreadyRunning(id.to_string()))?;

        self.store.delete(id).await.map_err(|e| match e {
            StoreError::NotFound(id) => ControlError::NotFound(id),
            other => ControlError::Store(other),
        })
    }

    /// Starts every definition flagged `autoStart`; failures are logged only
    pub async fn start_auto_start_servers(&self) -> usize {
        let servers = match self.store.list().await {
            Ok(servers) => servers,
            Err(e) => {
                log::error!("Failed to read servers for auto-start: {}", e);
                return 0;
            }
        };

        let mut started = 0;
        for server in servers.iter().filter(|s| s.auto_start) {
            match self.start_server(&server.id).await {
                Ok(tracked) => {
                    log::info!("Auto-started '{}' (PID: {})", server.name, tracked.pid);
                    started += 1;
                }
                Err(e) => log::warn!("Auto-start of '{}' failed: {}", server.name, describe(&e)),
            }
        }
        started
    }

    /// Stops every tracked process concurrently
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .map(|t| t.server_id)
            .collect();
        if ids.is_empty() {
            return;
        }

        log::info!("Stopping {} running server(s)", ids.len());
        let stops = ids.iter().map(|id| self.stop_server(id));
        for result in join_all(stops).await {
            if let Err(e) = result {
                log::debug!("Stop during shutdown: {}", e);
            }
        }
    }
}

/// Message plus underlying cause, for logs and error bodies
pub fn describe(err: &ControlError) -> String {
    match err {
        ControlError::StartFailed(source) => format!("{}: {}", err, source),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewServer;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    async fn setup(command: &str) -> (TempDir, ServerControl, String) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ServerStore::new(dir.path().join("servers.json")));
        let server = store
            .create(NewServer {
                name: "fixture".into(),
                command: command.into(),
                cwd: "/tmp".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let control = ServerControl::new(store, Supervisor::default());
        (dir, control, server.id)
    }

    #[tokio::test]
    async fn test_sleep_lifecycle() {
        let (_dir, control, id) = setup("sleep 30").await;

        let tracked = control.start_server(&id).await.unwrap();
        assert!(tracked.pid > 0);

        let status = control.get_status(&id).await;
        assert!(status.running);
        assert_eq!(status.pid, Some(tracked.pid));

        // metrics show up within a polling interval
        let mut metrics = status.metrics;
        for _ in 0..10 {
            if metrics.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            metrics = control.get_status(&id).await.metrics;
        }
        let metrics = metrics.unwrap();
        assert!(metrics.cpu >= 0.0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let elapsed = control.get_status(&id).await.metrics.unwrap().elapsed;
        assert!(elapsed >= 300 && elapsed < 5000, "elapsed {}", elapsed);

        let began = Instant::now();
        control.stop_server(&id).await.unwrap();
        assert!(began.elapsed() < Duration::from_secs(6));

        let status = control.get_status(&id).await;
        assert!(!status.running);
        assert_eq!(status.pid, None);
        assert!(status.metrics.is_none());
    }

    #[tokio::test]
    async fn test_unknown_binary_leaves_no_entry() {
        let (_dir, control, id) = setup("definitely-not-a-real-binary").await;

        let err = control.start_server(&id).await.unwrap_err();
        assert!(matches!(err, ControlError::StartFailed(_)));
        assert!(!control.registry().is_running(&id));
        assert_eq!(control.registry().len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_starts_track_one_process() {
        let (_dir, control, id) = setup("sleep 30").await;

        let (a, b) = tokio::join!(control.start_server(&id), control.start_server(&id));
        let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(oks, 1);
        assert!(matches!(
            a.err().or(b.err()),
            Some(ControlError::AlreadyRunning(_))
        ));
        assert_eq!(control.registry().list().len(), 1);

        control.stop_all().await;
        assert_eq!(control.registry().len(), 0);
    }

    #[tokio::test]
    async fn test_precondition_errors() {
        let (_dir, control, id) = setup("sleep 30").await;

        assert!(matches!(
            control.start_server("missing").await,
            Err(ControlError::NotFound(_))
        ));
        // the failed lookup released its claim
        assert_eq!(control.registry().len(), 0);

        assert!(matches!(
            control.stop_server(&id).await,
            Err(ControlError::NotRunning(_))
        ));

        control.start_server(&id).await.unwrap();
        assert!(matches!(
            control.start_server(&id).await,
            Err(ControlError::AlreadyRunning(_))
        ));
        control.stop_server(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_stops_running_process() {
        let (_dir, control, id) = setup("sleep 30").await;
        control.start_server(&id).await.unwrap();

        control.delete_server(&id).await.unwrap();
        assert!(!control.registry().is_running(&id));
        assert!(matches!(
            control.delete_server(&id).await,
            Err(ControlError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_refused_while_starting() {
        let (_dir, control, id) = setup("sleep 30").await;

        let starting = control.registry().reserve(&id).unwrap();
        assert!(matches!(
            control.delete_server(&id).await,
            Err(ControlError::AlreadyRunning(_))
        ));

        // the record survived and the claim is still the starter's
        drop(starting);
        assert_eq!(control.registry().len(), 0);
        assert_eq!(control.delete_server(&id).await.unwrap().id, id);
        assert_eq!(control.registry().len(), 0);
    }

    #[tokio::test]
    async fn test_auto_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ServerStore::new(dir.path().join("servers.json")));
        for (name, auto_start) in [("on", true), ("off", false)] {
            store
                .create(NewServer {
                    name: name.into(),
                    command: "sleep 30".into(),
                    cwd: "/tmp".into(),
                    auto_start,
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let control = ServerControl::new(store, Supervisor::default());
        assert_eq!(control.start_auto_start_servers().await, 1);

        let statuses = control.running_statuses().await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].0.name, "on");

        control.stop_all().await;
    }

    #[test]
    fn test_describe_includes_cause() {
        let err = ControlError::StartFailed(StartError::NoPid);
        assert_eq!(describe(&err), "Failed to start server: Failed to get process PID");
    }
}
