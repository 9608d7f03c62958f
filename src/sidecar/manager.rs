//! Sidecar startup orchestration.

use std::sync::{Arc, Mutex};

use crate::client::SimpleJdbcClient;
use crate::sidecar::config::{DriverDescriptor, SidecarConfig, SidecarEndpoint};
use crate::sidecar::config_file::TempConfigFile;
use crate::sidecar::error::{Result, SidecarError};
use crate::sidecar::guard::LifecycleGuard;
use crate::sidecar::handle::SidecarHandle;
use crate::sidecar::port::PortAllocator;
use crate::sidecar::process::{
    ExitCallback, OutputSink, OutputSinks, ProcessExit, ProcessSupervisor,
};
use crate::sidecar::readiness::ReadinessPoller;

/// What to start and where its output goes.
pub struct StartOptions {
    /// Drivers the server loads, in order.
    pub drivers: Vec<DriverDescriptor>,
    pub on_stdout: Option<OutputSink>,
    pub on_stderr: Option<OutputSink>,
    /// Called once if the server exits after a successful start.
    pub on_exit: Option<ExitCallback>,
}

impl std::fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartOptions")
            .field("drivers", &self.drivers)
            .field("on_stdout", &self.on_stdout.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .finish()
    }
}

impl StartOptions {
    pub fn new(drivers: Vec<DriverDescriptor>) -> Self {
        Self {
            drivers,
            on_stdout: None,
            on_stderr: None,
            on_exit: None,
        }
    }

    pub fn on_stdout(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stdout = Some(Arc::new(sink));
        self
    }

    pub fn on_stderr(mut self, sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_stderr = Some(Arc::new(sink));
        self
    }

    pub fn on_exit(mut self, callback: impl FnOnce(ProcessExit) + Send + 'static) -> Self {
        self.on_exit = Some(Box::new(callback));
        self
    }
}

/// Starts simple-jdbc server sidecars.
///
/// Each [`start`](Self::start) allocates its own port and configuration file,
/// so one manager can run several sidecars side by side.
#[derive(Debug, Clone)]
pub struct SidecarManager {
    config: SidecarConfig,
}

impl SidecarManager {
    /// Create a new sidecar manager.
    pub fn new(config: SidecarConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }

    /// Start a server and wait until it reports ready.
    ///
    /// Allocates a port, writes the configuration file, arms teardown, spawns
    /// the server and polls it. Any failure tears down whatever was created
    /// and is returned as a single error; no handle is returned until the
    /// server answered ready. Dropping the returned future mid-start also
    /// tears down.
    pub async fn start(&self, options: StartOptions) -> Result<SidecarHandle> {
        let StartOptions {
            drivers,
            on_stdout,
            on_stderr,
            on_exit,
        } = options;
        let name = self.config.name.as_str();
        let keep = self.config.keep_config_file;

        let claim = PortAllocator::new(self.config.host.clone())
            .allocate(self.config.preferred_port)?;
        let port = claim.port();

        let configuration = self.config.server_configuration(port, drivers);
        let config_file = Arc::new(TempConfigFile::materialize(
            &self.config.config_dir,
            &configuration,
        )?);

        let guard = LifecycleGuard::arm(
            name,
            (!keep).then(|| Arc::clone(&config_file)),
            Some(claim),
        );

        let relay = ExitRelay::new(on_exit);
        let sinks = OutputSinks {
            stdout: on_stdout,
            stderr: on_stderr,
        };
        let process = match ProcessSupervisor::new(name)
            .keep_config_file(keep)
            .spawn(&self.config.executable, &config_file, sinks, relay.callback())
        {
            Ok(process) => process,
            Err(e) => return Err(abort(&guard, name, e)),
        };
        guard.attach_process(Arc::clone(&process));

        let endpoint = SidecarEndpoint::new(self.config.host.clone(), port);
        let client =
            match SimpleJdbcClient::with_timeout(&endpoint.http_url(), self.config.request_timeout)
            {
                Ok(client) => client,
                Err(e) => return Err(abort(&guard, name, e.into())),
            };

        let poller = ReadinessPoller::new(name, self.config.readiness);
        if let Err(e) = poller
            .wait_until_ready(&client, Some(process.subscribe()))
            .await
        {
            return Err(abort(&guard, name, e));
        }

        relay.open();
        tracing::info!("Sidecar '{}' ready at {}", name, endpoint);

        Ok(SidecarHandle::new(endpoint, client, process, guard))
    }
}

fn abort(guard: &LifecycleGuard, name: &str, error: SidecarError) -> SidecarError {
    tracing::error!("Sidecar '{}' failed to start: {}", name, error);
    guard.teardown();
    error
}

/// Holds back the caller's exit callback until startup succeeded.
///
/// Exits during startup are reported through the error returned by
/// [`SidecarManager::start`] instead. An exit that lands between the final
/// readiness probe and [`open`](Self::open) is delivered by `open`.
#[derive(Clone)]
struct ExitRelay {
    inner: Arc<Mutex<RelayState>>,
}

#[derive(Default)]
struct RelayState {
    open: bool,
    callback: Option<ExitCallback>,
    pending: Option<ProcessExit>,
}

impl ExitRelay {
    fn new(callback: Option<ExitCallback>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayState {
                callback,
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Callback handed to the supervisor, if the caller registered one.
    fn callback(&self) -> Option<ExitCallback> {
        if self.lock().callback.is_none() {
            return None;
        }
        let relay = self.clone();
        Some(Box::new(move |exit| relay.deliver(exit)))
    }

    fn deliver(&self, exit: ProcessExit) {
        let callback = {
            let mut state = self.lock();
            if !state.open {
                state.pending = Some(exit);
                return;
            }
            state.callback.take()
        };
        if let Some(callback) = callback {
            callback(exit);
        }
    }

    fn open(&self) {
        let delivery = {
            let mut state = self.lock();
            state.open = true;
            match state.pending.take() {
                Some(exit) => state.callback.take().map(|callback| (exit, callback)),
                None => None,
            }
        };
        if let Some((exit, callback)) = delivery {
            callback(exit);
        }
    }
}
