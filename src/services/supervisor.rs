use std::path::Path;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tokio::time::{timeout, timeout_at, Instant};

use crate::models::ServerDefinition;
use crate::services::command::CommandLine;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("{source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to get process PID")]
    NoPid,

    #[error("{0}")]
    ExitedEarly(String),
}

/// Timings of the start/stop policy
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// How long a fresh child gets to prove it is alive
    pub startup_grace: Duration,
    /// Wait after SIGTERM before escalating to SIGKILL
    pub term_timeout: Duration,
    /// Absolute bound on `stop`, even if no exit notification arrives
    pub stop_deadline: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_millis(100),
            term_timeout: Duration::from_secs(5),
            stop_deadline: Duration::from_secs(6),
        }
    }
}

/// How a child ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(127), _) => "command not found (exit status 127)".to_string(),
            (Some(126), _) => "command not executable (exit status 126)".to_string(),
            (Some(code), _) => format!("exited with status {}", code),
            (None, Some(signal)) => format!("killed by signal {}", signal),
            (None, None) => "exited".to_string(),
        }
    }
}

/// Live handle to a spawned child.
///
/// The child itself is owned by a waiter task; the handle only observes its
/// exit through a watch channel, so it can be cloned freely.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub server_id: String,
    pub name: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl ProcessHandle {
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Resolves once the child has been reaped
    pub async fn exited(&self) -> Option<ExitInfo> {
        let mut rx = self.exit.clone();
        let info = match rx.wait_for(Option::is_some).await {
            Ok(info) => (*info).clone(),
            // waiter task is gone; nothing left to wait for
            Err(_) => None,
        };
        info
    }
}

#[derive(Debug, Clone, Copy)]
enum StopSignal {
    Term,
    Kill,
}

/// Spawns server commands and takes them down again
#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub async fn start(&self, server: &ServerDefinition) -> Result<ProcessHandle, StartError> {
        let name = server.name.clone();
        let command_line = CommandLine::parse(&server.command, server.shell).map_err(|e| {
            log::error!("[{}] Failed to start: {}", name, e);
            e
        })?;

        let mut command = command_line.to_command(Path::new(&server.cwd));
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                log::error!("[{}] Failed to start: {}", name, e);
                return Err(StartError::Spawn { source: e });
            }
        };
        let pid = child.id();

        let last_error_line = Arc::new(Mutex::new(None));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_stdout(name.clone(), stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(name.clone(), stderr, last_error_line.clone()));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let waiter_name = name.clone();
        tokio::spawn(async move {
            let info = match child.wait().await {
                Ok(status) => ExitInfo::from_status(status),
                Err(e) => {
                    log::warn!("[{}] Failed to wait for process: {}", waiter_name, e);
                    ExitInfo { code: None, signal: None }
                }
            };
            log::info!(
                "[{}] Process exited with code {:?}, signal {:?}",
                waiter_name,
                info.code,
                info.signal
            );
            let _ = exit_tx.send(Some(info));
        });

        let Some(pid) = pid else {
            log::error!("[{}] Failed to start: no PID", name);
            return Err(StartError::NoPid);
        };

        let handle = ProcessHandle {
            server_id: server.id.clone(),
            name: name.clone(),
            pid,
            started_at: Utc::now(),
            exit: exit_rx,
        };

        // grace period: an unusable command line usually dies right here
        if let Ok(Some(info)) = timeout(self.config.startup_grace, handle.exited()).await {
            if !info.success() {
                let message = last_line(&last_error_line).unwrap_or_else(|| info.describe());
                log::error!("[{}] Failed to start: {}", name, message);
                return Err(StartError::ExitedEarly(message));
            }
        }

        log::info!(
            "[{}] Started successfully (PID: {}) via {}",
            name,
            pid,
            command_line.program()
        );
        Ok(handle)
    }

    /// Best-effort shutdown: SIGTERM to the group, SIGKILL after
    /// `term_timeout` to whatever is left of it, give up after
    /// `stop_deadline`. Never fails.
    pub async fn stop(&self, handle: &ProcessHandle) {
        if handle.has_exited() && !group_alive(handle.pid) {
            return;
        }

        let started = Instant::now();
        let deadline = started + self.config.stop_deadline;
        let term_deadline = started + self.config.term_timeout;
        log::info!("[{}] Stopping process (PID: {})", handle.name, handle.pid);
        send_signal(handle.pid, StopSignal::Term);

        let leader_exited = timeout_at(term_deadline, handle.exited()).await.is_ok();
        // the leader going away does not take members that ignore SIGTERM with it
        let lingering = leader_exited && !group_drained(handle.pid, term_deadline).await;

        if !leader_exited || lingering {
            log::warn!("[{}] Force killing process", handle.name);
            send_signal(handle.pid, StopSignal::Kill);

            if !leader_exited && timeout_at(deadline, handle.exited()).await.is_err() {
                log::warn!(
                    "[{}] No exit reported within {:?}, giving up",
                    handle.name,
                    self.config.stop_deadline
                );
                return;
            }
        }

        log::info!("[{}] Process stopped", handle.name);
    }
}

/// Polls until no member of the group is left or `deadline` passes
async fn group_drained(pid: u32, deadline: Instant) -> bool {
    loop {
        if !group_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn last_line(slot: &Mutex<Option<String>>) -> Option<String> {
    slot.lock().ok().and_then(|line| line.clone())
}

async fn forward_stdout<R>(name: String, reader: R)
where
    R: AsyncRead + Unpin,
{
    read_lines(reader, |line| log::info!("[{}] {}", name, line)).await;
}

async fn forward_stderr<R>(name: String, reader: R, last: Arc<Mutex<Option<String>>>)
where
    R: AsyncRead + Unpin,
{
    read_lines(reader, |line| {
        log::error!("[{}] ERROR: {}", name, line);
        if !line.is_empty() {
            if let Ok(mut slot) = last.lock() {
                *slot = Some(line);
            }
        }
    })
    .await;
}

/// Drains `reader` line by line until EOF.
///
/// Output is decoded lossily: closing the pipe early would leave the child
/// with SIGPIPE on its next write.
async fn read_lines<R, F>(reader: R, mut on_line: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => on_line(String::from_utf8_lossy(&buf).trim_end().to_string()),
            Err(e) => {
                log::debug!("Output stream closed: {}", e);
                break;
            }
        }
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: StopSignal) {
    let sig = match signal {
        StopSignal::Term => libc::SIGTERM,
        StopSignal::Kill => libc::SIGKILL,
    };
    let pid = pid as i32;
    unsafe {
        // group first, then the leader in case it left the group
        let _ = libc::kill(-pid, sig);
        let _ = libc::kill(pid, sig);
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: StopSignal) {
    log::warn!("Signal {:?} for PID {} not supported on this platform", signal, pid);
}

/// Whether any process is left in the group led by `pid`
#[cfg(unix)]
fn group_alive(pid: u32) -> bool {
    unsafe { libc::kill(-(pid as i32), 0) == 0 }
}

#[cfg(not(unix))]
fn group_alive(_pid: u32) -> bool {
    false
}
