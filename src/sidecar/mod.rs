//! Lifecycle management for a local simple-jdbc server.
//!
//! The server is a separate JVM process started from a distribution's
//! startup script and configured through a YAML file. A sidecar:
//! - Gets its own free port and its own configuration file
//! - Is only handed to the caller once it answers its readiness probe
//! - Is torn down (process killed, file removed) on drop, on explicit
//!   shutdown, on normal process exit, on termination signals and on panics
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                           SidecarManager::start                            │
//! │                                                                            │
//! │   ┌──────────────┐     ┌──────────────────┐     ┌──────────────────────┐  │
//! │   │ PortAllocator│────▶│ TempConfigFile   │────▶│ LifecycleGuard::arm  │  │
//! │   │ (probe port) │     │ (write YAML)     │     │ (register teardown)  │  │
//! │   └──────────────┘     └──────────────────┘     └──────────────────────┘  │
//! │                                                            │               │
//! │                                                            ▼               │
//! │   ┌──────────────┐     ┌──────────────────┐     ┌──────────────────────┐  │
//! │   │ SidecarHandle│◀────│ ReadinessPoller  │◀────│ ProcessSupervisor    │  │
//! │   │              │     │ (GET /ready)     │     │ (spawn + monitor)    │  │
//! │   └──────────────┘     └──────────────────┘     └──────────────────────┘  │
//! │                                                                            │
//! │   Any failure ──▶ teardown of whatever was created ──▶ SidecarError        │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use simple_jdbc::sidecar::{DriverDescriptor, SidecarConfig, SidecarManager, StartOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SidecarConfig::for_executable(
//!     "/opt/simple-jdbc-server-0.1.0/bin/simple-jdbc-server",
//! );
//! let manager = SidecarManager::new(config);
//!
//! let handle = manager
//!     .start(
//!         StartOptions::new(vec![DriverDescriptor::new(
//!             "/drivers/postgresql.jar",
//!             "org.postgresql.Driver",
//!         )])
//!         .on_stderr(|line| eprintln!("{line}")),
//!     )
//!     .await?;
//!
//! println!("Server on {}:{}", handle.host(), handle.port());
//! let catalogs = handle
//!     .client()
//!     .catalogs("jdbc:postgresql://localhost/app")
//!     .await?;
//! println!("{catalogs:?}");
//!
//! // Clean shutdown
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod config_file;
pub mod error;
pub mod guard;
pub mod handle;
pub mod manager;
pub mod port;
pub mod process;
pub mod readiness;

pub use config::{DriverDescriptor, ServerConfiguration, SidecarConfig, SidecarEndpoint};
pub use config_file::TempConfigFile;
pub use error::{Result, SidecarError};
pub use guard::{LifecycleGuard, TeardownReport};
pub use handle::SidecarHandle;
pub use manager::{SidecarManager, StartOptions};
pub use port::{PortAllocator, PortClaim};
pub use process::{ProcessExit, ProcessState, ProcessSupervisor, SidecarProcess};
pub use readiness::{ReadinessPolicy, ReadinessPoller, ReadinessProbe};
