//! Query databases through a JDBC driver hosted by a simple-jdbc server.
//!
//! The server runs either remotely or as a local sidecar process whose
//! lifecycle is managed by [`sidecar::SidecarManager`]: a free port and a
//! private configuration file per start, readiness polling before the
//! caller gets a handle, and teardown on every exit path.

pub mod cli;
pub mod client;
pub mod config;
pub mod distribution;
pub mod error;
pub mod sidecar;

pub use client::SimpleJdbcClient;
pub use sidecar::{SidecarError, SidecarHandle, SidecarManager};
