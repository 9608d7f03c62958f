//! Teardown of sidecars however the host program ends.
//!
//! Every started sidecar registers one idempotent teardown routine in a
//! process-wide registry keyed by a unique id. The routine runs on the first
//! of: explicit teardown, drop of the guard, normal process exit (`atexit`),
//! a termination signal, or a panic that ends the process. Later invocations
//! do nothing. Panics that something catches (a spawned task, a joined worker
//! thread, `catch_unwind`) leave live sidecars alone.
//!
//! Hooks are installed once per process. Signals are handled on a dedicated
//! thread with its own runtime, so they keep working when the caller's
//! runtime is busy or gone; after tearing everything down the process exits
//! with `128 + signo`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, Once};
use std::time::Duration;

use uuid::Uuid;

use crate::sidecar::config_file::TempConfigFile;
use crate::sidecar::port::PortClaim;
use crate::sidecar::process::SidecarProcess;

static REGISTRY: LazyLock<Mutex<HashMap<Uuid, Arc<Teardown>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

static HOOKS: Once = Once::new();

/// How long hook installation waits for the signal handlers to be registered.
const SIGNAL_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a teardown call actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// This call performed the teardown (false if it had already run).
    pub ran: bool,
    /// This call deleted the configuration file.
    pub config_removed: bool,
    /// This call delivered a kill to the process.
    pub process_killed: bool,
}

struct Teardown {
    name: String,
    done: AtomicBool,
    config_file: Option<Arc<TempConfigFile>>,
    process: Mutex<Option<Arc<SidecarProcess>>>,
    port: Mutex<Option<PortClaim>>,
}

impl Teardown {
    fn run(&self) -> TeardownReport {
        if self.done.swap(true, Ordering::SeqCst) {
            return TeardownReport::default();
        }
        tracing::debug!("Tearing down sidecar '{}'", self.name);

        let config_removed = step(&self.name, "remove configuration file", || {
            self.config_file.as_ref().is_some_and(|file| file.remove())
        });
        let process_killed = step(&self.name, "kill process", || {
            lock(&self.process)
                .as_ref()
                .is_some_and(|process| process.kill())
        });
        step(&self.name, "release port", || lock(&self.port).take().is_some());

        TeardownReport {
            ran: true,
            config_removed,
            process_killed,
        }
    }
}

/// Run one cleanup step; a panicking step must not stop the others.
fn step(name: &str, what: &str, f: impl FnOnce() -> bool) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(done) => done,
        Err(_) => {
            tracing::error!("Sidecar '{}' teardown step failed: {}", name, what);
            false
        }
    }
}

/// Owns the registered teardown routine of one sidecar.
///
/// Dropping the guard tears the sidecar down.
pub struct LifecycleGuard {
    id: Uuid,
    teardown: Arc<Teardown>,
}

impl std::fmt::Debug for LifecycleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleGuard")
            .field("id", &self.id)
            .field("name", &self.teardown.name)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl LifecycleGuard {
    /// Register a teardown routine covering `config_file` and `port`, and make
    /// sure the process-wide hooks are installed.
    ///
    /// Pass `None` for the file to leave it on disk.
    pub fn arm(
        name: impl Into<String>,
        config_file: Option<Arc<TempConfigFile>>,
        port: Option<PortClaim>,
    ) -> Self {
        install_process_hooks();

        let id = Uuid::new_v4();
        let teardown = Arc::new(Teardown {
            name: name.into(),
            done: AtomicBool::new(false),
            config_file,
            process: Mutex::new(None),
            port: Mutex::new(port),
        });
        lock(&REGISTRY).insert(id, Arc::clone(&teardown));
        tracing::trace!("Armed teardown {} for sidecar '{}'", id, teardown.name);

        Self { id, teardown }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Include the spawned process in the teardown.
    ///
    /// If teardown already ran, the process is killed immediately.
    pub fn attach_process(&self, process: Arc<SidecarProcess>) {
        let late = {
            let mut slot = lock(&self.teardown.process);
            *slot = Some(Arc::clone(&process));
            self.is_torn_down()
        };
        if late {
            process.kill();
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.teardown.done.load(Ordering::SeqCst)
    }

    /// Run the teardown now. Safe to call any number of times.
    pub fn teardown(&self) -> TeardownReport {
        let report = self.teardown.run();
        lock(&REGISTRY).remove(&self.id);
        report
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Whether a teardown with this id is still pending in the registry.
pub fn is_registered(id: Uuid) -> bool {
    lock(&REGISTRY).contains_key(&id)
}

/// Tear down every registered sidecar. Returns how many were torn down.
pub fn teardown_all() -> usize {
    // Drain first so the registry lock is not held while cleaning up.
    let pending: Vec<Arc<Teardown>> = lock(&REGISTRY).drain().map(|(_, t)| t).collect();
    pending.iter().filter(|teardown| teardown.run().ran).count()
}

/// Install the exit, signal and panic hooks (once per process).
pub fn install_process_hooks() {
    HOOKS.call_once(|| {
        install_panic_hook();
        install_exit_hook();
        spawn_signal_listener();
        tracing::debug!("Sidecar teardown hooks installed");
    });
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        if !panic_is_fatal() {
            return;
        }
        let count = teardown_all();
        if count > 0 {
            tracing::error!("Panic: tore down {} sidecar(s)", count);
        }
    }));
}

/// Whether the panic being reported will end the process.
///
/// With `panic = "abort"` every panic does. Otherwise only a panic on the
/// main thread unwinds out of `main`; anywhere else it may be caught and the
/// process keeps running, and unwinding drops the guards that are really lost.
fn panic_is_fatal() -> bool {
    cfg!(panic = "abort") || std::thread::current().name() == Some("main")
}

#[cfg(unix)]
fn install_exit_hook() {
    extern "C" fn on_exit() {
        let _ = std::panic::catch_unwind(teardown_all);
    }

    // SAFETY: `on_exit` is a plain `extern "C"` function that never unwinds.
    let rc = unsafe { libc::atexit(on_exit) };
    if rc != 0 {
        tracing::warn!("Failed to register exit hook; sidecars rely on drop for cleanup");
    }
}

#[cfg(not(unix))]
fn install_exit_hook() {}

/// Start the signal thread and wait until its handlers are registered, so a
/// signal arriving right after a sidecar starts is not handled by the default
/// action.
fn spawn_signal_listener() {
    let (registered_tx, registered_rx) = std::sync::mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("sidecar-signals".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!("Failed to start signal listener runtime: {}", e);
                    return;
                }
            };
            let registered = move || {
                let _ = registered_tx.send(());
            };
            if let Some(signo) = runtime.block_on(wait_for_termination_signal(registered)) {
                let count = teardown_all();
                tracing::info!("Received signal {}, tore down {} sidecar(s)", signo, count);
                std::process::exit(128 + signo);
            }
        });
    match spawned {
        Ok(_) => {
            if registered_rx
                .recv_timeout(SIGNAL_REGISTRATION_TIMEOUT)
                .is_err()
            {
                tracing::warn!("Signal handlers not confirmed; signals may skip sidecar teardown");
            }
        }
        Err(e) => tracing::warn!("Failed to spawn signal listener: {}", e),
    }
}

#[cfg(unix)]
async fn wait_for_termination_signal(registered: impl FnOnce()) -> Option<i32> {
    use tokio::signal::unix::{SignalKind, signal};

    let kinds = [
        (SignalKind::interrupt(), libc::SIGINT),
        (SignalKind::terminate(), libc::SIGTERM),
        (SignalKind::hangup(), libc::SIGHUP),
        (SignalKind::user_defined1(), libc::SIGUSR1),
        (SignalKind::user_defined2(), libc::SIGUSR2),
    ];

    let mut streams = Vec::new();
    for (kind, signo) in kinds {
        match signal(kind) {
            Ok(stream) => streams.push((stream, signo)),
            Err(e) => tracing::warn!("Failed to register handler for signal {}: {}", signo, e),
        }
    }
    registered();
    if streams.is_empty() {
        return None;
    }

    let waits = streams.iter_mut().map(|(stream, signo)| {
        let signo = *signo;
        Box::pin(async move {
            stream.recv().await;
            signo
        })
    });
    let (signo, _, _) = futures::future::select_all(waits).await;
    Some(signo)
}

#[cfg(not(unix))]
async fn wait_for_termination_signal(registered: impl FnOnce()) -> Option<i32> {
    let ctrl_c = tokio::signal::ctrl_c();
    registered();
    match ctrl_c.await {
        Ok(()) => Some(2),
        Err(e) => {
            tracing::warn!("Failed to register Ctrl-C handler: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidecar::config::{DriverDescriptor, ServerConfiguration};
    use crate::sidecar::port::PortAllocator;

    fn config_file(dir: &tempfile::TempDir) -> Arc<TempConfigFile> {
        let configuration = ServerConfiguration {
            host: "0.0.0.0".to_string(),
            port: 8000,
            drivers: vec![DriverDescriptor::new("/drv.jar", "org.x.Driver")],
        };
        Arc::new(TempConfigFile::materialize(dir.path(), &configuration).unwrap())
    }

    #[test]
    fn test_teardown_twice_removes_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let file = config_file(&dir);
        let guard = LifecycleGuard::arm("test", Some(Arc::clone(&file)), None);

        let first = guard.teardown();
        let second = guard.teardown();

        assert!(first.ran);
        assert!(first.config_removed);
        assert!(!first.process_killed);
        assert_eq!(second, TeardownReport::default());
        assert!(!file.path().exists());
    }

    #[test]
    fn test_registry_tracks_guard() {
        let guard = LifecycleGuard::arm("test", None, None);
        let id = guard.id();
        assert!(is_registered(id));

        drop(guard);
        assert!(!is_registered(id));
    }

    #[test]
    fn test_drop_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let file = config_file(&dir);

        drop(LifecycleGuard::arm("test", Some(Arc::clone(&file)), None));

        assert!(file.is_removed());
    }

    #[test]
    fn test_kept_file_is_not_removed() {
        let dir = tempfile::tempdir().unwrap();
        let file = config_file(&dir);

        let guard = LifecycleGuard::arm("test", None, None);
        let report = guard.teardown();

        assert!(report.ran);
        assert!(!report.config_removed);
        assert!(file.path().exists());
    }

    #[test]
    fn test_teardown_releases_port_claim() {
        let allocator = PortAllocator::default();
        let claim = allocator.allocate(0).unwrap();
        let port = claim.port();
        let guard = LifecycleGuard::arm("test", None, Some(claim));

        guard.teardown();

        // The released port can be claimed again as a preferred port.
        let again = allocator.allocate(port).unwrap();
        assert_eq!(again.port(), port);
    }

    #[test]
    fn test_step_reports_result() {
        assert!(step("test", "succeeds", || true));
        assert!(!step("test", "nothing to do", || false));
    }

    #[test]
    fn test_panic_off_main_thread_is_not_fatal() {
        let joined = std::thread::spawn(panic_is_fatal).join().unwrap();
        assert_eq!(joined, cfg!(panic = "abort"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_recovered_task_panic_keeps_sidecar_alive() {
        let dir = tempfile::tempdir().unwrap();
        let file = config_file(&dir);
        let guard = LifecycleGuard::arm("test", Some(Arc::clone(&file)), None);

        let joined = tokio::spawn(async { panic!("request handler failed") }).await;

        assert!(joined.is_err());
        assert!(!guard.is_torn_down());
        assert!(is_registered(guard.id()));
        assert!(file.path().exists());

        guard.teardown();
        assert!(!file.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_teardown_kills_attached_process_once() {
        use crate::sidecar::process::{OutputSinks, ProcessSupervisor};

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("server.sh");
        std::fs::write(&script, "sleep 30\n").unwrap();
        let file = Arc::new(TempConfigFile::adopt(script));

        let process = ProcessSupervisor::new("test")
            .keep_config_file(true)
            .spawn(
                std::path::Path::new("/bin/sh"),
                &file,
                OutputSinks::default(),
                None,
            )
            .unwrap();
        let guard = LifecycleGuard::arm("test", Some(Arc::clone(&file)), None);
        guard.attach_process(Arc::clone(&process));

        let first = guard.teardown();
        let second = guard.teardown();

        assert!(first.process_killed);
        assert!(first.config_removed);
        assert!(!second.ran);
        let exit = tokio::time::timeout(std::time::Duration::from_secs(10), process.wait())
            .await
            .unwrap();
        assert!(exit.requested);
    }
}
