//! Spawning and supervising the server process.
//!
//! The child runs in its own process group so a kill reaches anything the
//! startup script forks. Output is forwarded line by line to caller-supplied
//! sinks; a monitor task owns the child, observes its exit, publishes the new
//! state, releases the configuration file and calls the exit callback once.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::sidecar::config_file::TempConfigFile;
use crate::sidecar::error::{Result, SidecarError};

/// How long output readers may keep draining after the process exited.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Receives one line of server output (without the trailing newline).
pub type OutputSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Called once when the server process ends.
pub type ExitCallback = Box<dyn FnOnce(ProcessExit) + Send + 'static>;

/// Where server stdout and stderr go. A missing sink discards that stream.
#[derive(Clone, Default)]
pub struct OutputSinks {
    pub stdout: Option<OutputSink>,
    pub stderr: Option<OutputSink>,
}

impl std::fmt::Debug for OutputSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSinks")
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// How the server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if any (Unix only).
    pub signal: Option<i32>,
    /// Whether the exit followed a [`SidecarProcess::kill`] call.
    pub requested: bool,
}

impl ProcessExit {
    fn from_status(status: std::io::Result<std::process::ExitStatus>, requested: bool) -> Self {
        match status {
            Ok(status) => {
                #[cfg(unix)]
                let signal = std::os::unix::process::ExitStatusExt::signal(&status);
                #[cfg(not(unix))]
                let signal = None;
                Self {
                    code: status.code(),
                    signal,
                    requested,
                }
            }
            Err(e) => {
                tracing::warn!("Failed to wait for sidecar process: {}", e);
                Self {
                    code: None,
                    signal: None,
                    requested,
                }
            }
        }
    }

    /// Whether the process exited on its own with status 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code)?,
            (None, Some(signal)) => write!(f, "signal {}", signal)?,
            (None, None) => write!(f, "unknown exit status")?,
        }
        if self.requested {
            write!(f, ", killed on request")?;
        }
        Ok(())
    }
}

/// Lifecycle state of a spawned server.
///
/// A process that fails to spawn never gets a state: [`ProcessSupervisor::spawn`]
/// returns [`SidecarError::Spawn`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// The OS created the process. Says nothing about network readiness.
    Running {
        /// OS process id.
        pid: Option<u32>,
    },
    /// The process ended. Terminal.
    Exited(ProcessExit),
}

impl ProcessState {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }

    pub fn exit(&self) -> Option<ProcessExit> {
        match self {
            ProcessState::Exited(exit) => Some(*exit),
            ProcessState::Running { .. } => None,
        }
    }
}

/// A live (or finished) server process.
pub struct SidecarProcess {
    name: String,
    pid: Option<u32>,
    state: watch::Sender<ProcessState>,
    kill_requested: AtomicBool,
    /// Set as soon as the child is reaped, before output is drained and the
    /// exit is published. The pid (and its group) may be reused after this.
    reaped: AtomicBool,
    kill_notify: Notify,
}

impl std::fmt::Debug for SidecarProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarProcess")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl SidecarProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Get the current state.
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Watch state changes. The only change ever published is the exit.
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    /// Wait until the process has exited.
    pub async fn wait(&self) -> ProcessExit {
        let mut rx = self.subscribe();
        loop {
            if let Some(exit) = rx.borrow_and_update().exit() {
                return exit;
            }
            // The sender lives in `self`, so this only fails if we are gone.
            if rx.changed().await.is_err() {
                return ProcessExit {
                    code: None,
                    signal: None,
                    requested: self.kill_requested.load(Ordering::SeqCst),
                };
            }
        }
    }

    /// Terminate the process.
    ///
    /// Synchronous and safe to call from signal, exit and panic hooks. Returns
    /// `true` only for the call that delivered the kill; calling it again, or
    /// after the process exited, does nothing.
    pub fn kill(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        if self.kill_requested.swap(true, Ordering::SeqCst) {
            return false;
        }

        tracing::info!("Stopping sidecar '{}' (pid {:?})", self.name, self.pid);
        if !self.signal_process_group(Self::TERMINATE) {
            // Let the monitor task kill through the child handle instead.
            self.kill_notify.notify_one();
        }
        true
    }

    /// Kill the process group without giving it a chance to shut down.
    ///
    /// For servers that ignore [`kill`](Self::kill). Returns `false` once the
    /// process has been reaped.
    pub fn force_kill(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.kill_requested.store(true, Ordering::SeqCst);

        tracing::warn!("Force killing sidecar '{}' (pid {:?})", self.name, self.pid);
        if !self.signal_process_group(Self::FORCE) {
            self.kill_notify.notify_one();
        }
        true
    }

    fn is_alive(&self) -> bool {
        self.state().is_running() && !self.reaped.load(Ordering::SeqCst)
    }

    #[cfg(unix)]
    const TERMINATE: libc::c_int = libc::SIGTERM;
    #[cfg(unix)]
    const FORCE: libc::c_int = libc::SIGKILL;
    #[cfg(not(unix))]
    const TERMINATE: i32 = 15;
    #[cfg(not(unix))]
    const FORCE: i32 = 9;

    #[cfg(unix)]
    fn signal_process_group(&self, signal: libc::c_int) -> bool {
        let Some(pid) = self.pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
            return false;
        };
        // SAFETY: kill(2) has no memory-safety preconditions. The negative pid
        // addresses the process group created for the child at spawn.
        let rc = unsafe { libc::kill(-pid, signal) };
        if rc == 0 {
            return true;
        }
        tracing::warn!(
            "Failed to signal sidecar '{}' process group {}: {}",
            self.name,
            pid,
            std::io::Error::last_os_error()
        );
        false
    }

    #[cfg(not(unix))]
    fn signal_process_group(&self, _signal: i32) -> bool {
        false
    }
}

/// Spawns server processes and supervises them until exit.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    name: String,
    release_config_on_exit: bool,
}

impl ProcessSupervisor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            release_config_on_exit: true,
        }
    }

    /// Leave the configuration file in place when the process exits.
    pub fn keep_config_file(mut self, keep: bool) -> Self {
        self.release_config_on_exit = !keep;
        self
    }

    /// Start `<executable> <config-file>` and supervise it.
    ///
    /// Returns once the OS has created the process. Must be called within a
    /// Tokio runtime.
    pub fn spawn(
        &self,
        executable: &Path,
        config_file: &Arc<TempConfigFile>,
        sinks: OutputSinks,
        on_exit: Option<ExitCallback>,
    ) -> Result<Arc<SidecarProcess>> {
        let mut command = Command::new(executable);
        command
            .arg(config_file.path())
            .stdin(Stdio::null())
            .stdout(piped_if(sinks.stdout.is_some()))
            .stderr(piped_if(sinks.stderr.is_some()))
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| SidecarError::Spawn {
            executable: PathBuf::from(executable),
            source,
        })?;

        let pid = child.id();
        tracing::info!(
            "Started sidecar '{}' (pid {:?}): {} {}",
            self.name,
            pid,
            executable.display(),
            config_file.path().display()
        );

        let mut readers = Vec::new();
        if let (Some(stdout), Some(sink)) = (child.stdout.take(), sinks.stdout) {
            readers.push(forward_lines(stdout, sink));
        }
        if let (Some(stderr), Some(sink)) = (child.stderr.take(), sinks.stderr) {
            readers.push(forward_lines(stderr, sink));
        }

        let (state, _) = watch::channel(ProcessState::Running { pid });
        let process = Arc::new(SidecarProcess {
            name: self.name.clone(),
            pid,
            state,
            kill_requested: AtomicBool::new(false),
            reaped: AtomicBool::new(false),
            kill_notify: Notify::new(),
        });

        let release = self
            .release_config_on_exit
            .then(|| Arc::clone(config_file));
        tokio::spawn(monitor(
            Arc::clone(&process),
            child,
            readers,
            release,
            on_exit,
        ));

        Ok(process)
    }
}

fn piped_if(enabled: bool) -> Stdio {
    if enabled { Stdio::piped() } else { Stdio::null() }
}

/// Forward a stream to `sink` line by line until EOF.
fn forward_lines<R>(stream: R, sink: OutputSink) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    sink(line.trim_end_matches(['\n', '\r']));
                }
                Err(e) => {
                    tracing::trace!("Sidecar output stream closed: {}", e);
                    break;
                }
            }
        }
    })
}

async fn monitor(
    process: Arc<SidecarProcess>,
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    config_file: Option<Arc<TempConfigFile>>,
    on_exit: Option<ExitCallback>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        () = process.kill_notify.notified() => {
            if let Err(e) = child.start_kill() {
                tracing::warn!("Failed to kill sidecar '{}': {}", process.name, e);
            }
            child.wait().await
        }
    };
    process.reaped.store(true, Ordering::SeqCst);
    let exit = ProcessExit::from_status(status, process.kill_requested.load(Ordering::SeqCst));

    // Output written just before exit is still in the pipes.
    for mut reader in readers {
        if tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut reader)
            .await
            .is_err()
        {
            reader.abort();
        }
    }

    if let Some(file) = config_file {
        file.remove();
    }

    process.state.send_replace(ProcessState::Exited(exit));
    if exit.requested {
        tracing::info!("Sidecar '{}' stopped ({})", process.name, exit);
    } else {
        tracing::warn!("Sidecar '{}' exited ({})", process.name, exit);
    }

    if let Some(callback) = on_exit {
        callback(exit);
    }
}
