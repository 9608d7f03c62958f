//! The caller's view of a started, ready sidecar.

use std::sync::Arc;
use std::time::Duration;

use crate::client::SimpleJdbcClient;
use crate::sidecar::config::SidecarEndpoint;
use crate::sidecar::guard::{LifecycleGuard, TeardownReport};
use crate::sidecar::process::{ProcessExit, ProcessState, SidecarProcess};

/// How long [`SidecarHandle::shutdown`] waits before force killing.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running sidecar server that answered its readiness probe.
///
/// Dropping the handle tears the sidecar down: the configuration file is
/// removed and the process is killed. Termination signals, fatal panics and normal
/// process exit do the same while the handle is alive.
#[derive(Debug)]
pub struct SidecarHandle {
    endpoint: SidecarEndpoint,
    client: SimpleJdbcClient,
    process: Arc<SidecarProcess>,
    guard: LifecycleGuard,
}

impl SidecarHandle {
    pub(crate) fn new(
        endpoint: SidecarEndpoint,
        client: SimpleJdbcClient,
        process: Arc<SidecarProcess>,
        guard: LifecycleGuard,
    ) -> Self {
        Self {
            endpoint,
            client,
            process,
            guard,
        }
    }

    /// Host the server was configured to bind.
    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    /// Port the server was configured to bind.
    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    pub fn endpoint(&self) -> &SidecarEndpoint {
        &self.endpoint
    }

    /// Client bound to this server.
    pub fn client(&self) -> &SimpleJdbcClient {
        &self.client
    }

    pub fn state(&self) -> ProcessState {
        self.process.state()
    }

    pub fn process(&self) -> &Arc<SidecarProcess> {
        &self.process
    }

    /// Tear down without waiting for the process to exit.
    pub fn teardown(&self) -> TeardownReport {
        self.guard.teardown()
    }

    /// Tear down and wait until the process has exited, force killing it
    /// after [`DEFAULT_SHUTDOWN_GRACE`].
    pub async fn shutdown(self) -> ProcessExit {
        self.shutdown_with_grace(DEFAULT_SHUTDOWN_GRACE).await
    }

    /// Tear down, give the server `grace` to stop, then kill its process
    /// group outright.
    pub async fn shutdown_with_grace(self, grace: Duration) -> ProcessExit {
        self.guard.teardown();
        match tokio::time::timeout(grace, self.process.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                tracing::warn!(
                    "Sidecar at {} did not stop within {:?}",
                    self.endpoint.http_url(),
                    grace
                );
                self.process.force_kill();
                self.process.wait().await
            }
        }
    }
}
