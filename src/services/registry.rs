use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::models::TrackedProcess;
use crate::services::supervisor::ProcessHandle;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Server '{0}' is already running")]
pub struct AlreadyRunning(pub String);

#[derive(Debug)]
enum Slot {
    /// Claimed by a start that has not finished yet
    Starting,
    Running(ProcessHandle),
    /// A stop is in flight; the process may still be alive
    Stopping(ProcessHandle),
}

/// In-memory map from server id to its live process.
///
/// Every mutation happens under one lock, and a start must claim its id with
/// [`ProcessRegistry::reserve`] before spawning, so one id never ends up with
/// two processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims `id` for a start. Fails if the id is starting, running or stopping.
    pub fn reserve(&self, id: &str) -> Result<Reservation, AlreadyRunning> {
        let mut slots = self.lock();
        if slots.contains_key(id) {
            return Err(AlreadyRunning(id.to_string()));
        }
        slots.insert(id.to_string(), Slot::Starting);

        Ok(Reservation {
            registry: self.clone(),
            id: id.to_string(),
            committed: false,
        })
    }

    /// Running or stopping entry for `id`
    pub fn get(&self, id: &str) -> Option<ProcessHandle> {
        match self.lock().get(id) {
            Some(Slot::Running(handle)) | Some(Slot::Stopping(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Marks a running entry as stopping and hands out its handle
    pub fn begin_stop(&self, id: &str) -> Option<ProcessHandle> {
        let mut slots = self.lock();
        let slot = slots.get_mut(id)?;
        let handle = match slot {
            Slot::Running(handle) => handle.clone(),
            _ => return None,
        };
        *slot = Slot::Stopping(handle.clone());
        Some(handle)
    }

    /// Removes the entry for `id` if it still belongs to `pid`
    pub fn remove(&self, id: &str, pid: u32) -> bool {
        let mut slots = self.lock();
        let owned = match slots.get(id) {
            Some(Slot::Running(handle)) | Some(Slot::Stopping(handle)) => handle.pid == pid,
            _ => false,
        };
        if owned {
            slots.remove(id);
        }
        owned
    }

    pub fn list(&self) -> Vec<TrackedProcess> {
        let mut list: Vec<TrackedProcess> = self
            .lock()
            .values()
            .filter_map(|slot| match slot {
                Slot::Running(handle) | Slot::Stopping(handle) => Some(tracked(handle)),
                Slot::Starting => None,
            })
            .collect();
        list.sort_by(|a, b| a.server_id.cmp(&b.server_id));
        list
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, id: &str) {
        let mut slots = self.lock();
        if matches!(slots.get(id), Some(Slot::Starting)) {
            slots.remove(id);
        }
    }

    fn install(&self, id: &str, handle: ProcessHandle) {
        self.lock().insert(id.to_string(), Slot::Running(handle.clone()));

        // a process that dies on its own must not linger as "running"
        let registry = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            let info = handle.exited().await;
            if registry.remove(&id, handle.pid) {
                log::info!(
                    "[{}] Exited on its own ({}), removed from registry",
                    handle.name,
                    info.map(|i| i.describe()).unwrap_or_else(|| "unknown".to_string())
                );
            }
        });
    }
}

/// Claim on a registry id; released on drop unless committed
#[derive(Debug)]
pub struct Reservation {
    registry: ProcessRegistry,
    id: String,
    committed: bool,
}

impl Reservation {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Installs the started process under the reserved id.
    ///
    /// Must be called from within a tokio runtime: it attaches the exit observer.
    pub fn commit(mut self, handle: ProcessHandle) -> TrackedProcess {
        let view = tracked(&handle);
        self.registry.install(&self.id, handle);
        self.committed = true;
        view
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(&self.id);
        }
    }
}

fn tracked(handle: &ProcessHandle) -> TrackedProcess {
    TrackedProcess {
        server_id: handle.server_id.clone(),
        name: handle.name.clone(),
        pid: handle.pid,
        started_at: handle.started_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerDefinition;
    use crate::services::supervisor::Supervisor;
    use chrono::Utc;
    use std::time::Duration;

    fn server(id: &str, command: &str) -> ServerDefinition {
        ServerDefinition {
            id: id.into(),
            name: id.into(),
            description: String::new(),
            command: command.into(),
            cwd: "/tmp".into(),
            port: None,
            auto_start: false,
            shell: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_reservation_blocks_second_claim() {
        let registry = ProcessRegistry::new();
        let first = registry.reserve("a").unwrap();
        assert_eq!(first.id(), "a");
        assert_eq!(registry.reserve("a").unwrap_err(), AlreadyRunning("a".into()));
        assert!(registry.reserve("b").is_ok());

        // a starting entry is not "running" yet
        assert!(!registry.is_running("a"));
    }

    #[test]
    fn test_dropped_reservation_releases_id() {
        let registry = ProcessRegistry::new();
        drop(registry.reserve("a").unwrap());
        assert_eq!(registry.len(), 0);
        assert!(registry.reserve("a").is_ok());
    }

    #[tokio::test]
    async fn test_commit_stop_and_remove() {
        let registry = ProcessRegistry::new();
        let supervisor = Supervisor::default();

        let reservation = registry.reserve("sleeper").unwrap();
        let handle = supervisor.start(&server("sleeper", "sleep 30")).await.unwrap();
        let view = reservation.commit(handle);

        assert!(registry.is_running("sleeper"));
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.list()[0].pid, view.pid);

        let handle = registry.begin_stop("sleeper").unwrap();
        // second stop request finds nothing to stop
        assert!(registry.begin_stop("sleeper").is_none());
        // still reported while stopping
        assert!(registry.is_running("sleeper"));

        supervisor.stop(&handle).await;
        registry.remove("sleeper", handle.pid);
        assert!(!registry.is_running("sleeper"));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_self_exit_is_reconciled() {
        let registry = ProcessRegistry::new();
        let supervisor = Supervisor::default();

        let reservation = registry.reserve("short").unwrap();
        let handle = supervisor.start(&server("short", "sleep 0.3")).await.unwrap();
        reservation.commit(handle);
        assert!(registry.is_running("short"));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!registry.is_running("short"));
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_remove_checks_pid() {
        let registry = ProcessRegistry::new();
        assert!(!registry.remove("missing", 1));
    }
}
