//! Error types for sidecar management.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::sidecar::process::ProcessExit;

/// Result type for sidecar operations.
pub type Result<T> = std::result::Result<T, SidecarError>;

/// Errors that can occur while starting or supervising a sidecar.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// No free TCP port was found.
    #[error("No free port found starting from {preferred} after {attempts} attempts")]
    PortAllocation {
        /// Port tried first.
        preferred: u16,
        /// Number of ports probed.
        attempts: u32,
    },

    /// The configuration file could not be created or written.
    #[error("Failed to write sidecar configuration to {}: {reason}", path.display())]
    ConfigWrite {
        /// File or directory that was being written.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },

    /// The OS refused to start the server executable.
    #[error("Failed to spawn '{}': {source}", executable.display())]
    Spawn {
        /// Startup script path.
        executable: PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The server process died while readiness was being awaited.
    #[error("Sidecar '{name}' exited before becoming ready ({exit})")]
    ProcessExitedBeforeReady {
        /// Sidecar name.
        name: String,
        /// How the process ended.
        exit: ProcessExit,
    },

    /// The readiness budget ran out without a positive signal.
    #[error("Sidecar '{name}' not ready after {attempts} attempts ({elapsed:?}): {reason}")]
    ReadinessTimeout {
        /// Sidecar name.
        name: String,
        /// Number of probes issued.
        attempts: u32,
        /// Time spent polling.
        elapsed: Duration,
        /// Outcome of the last probe.
        reason: String,
    },

    /// The client for the started server could not be built.
    #[error("Failed to create client for sidecar: {0}")]
    Client(#[from] crate::error::ClientError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
