//! Configuration types for the sidecar server.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sidecar::readiness::ReadinessPolicy;

/// Host the server binds to unless configured otherwise.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Port tried first by the allocator.
pub const DEFAULT_PREFERRED_PORT: u16 = 8000;

/// A JDBC driver artifact to load into the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverDescriptor {
    /// Path to the driver jar.
    pub path: PathBuf,
    /// Fully-qualified driver class name.
    #[serde(rename = "className")]
    pub class_name: String,
}

impl DriverDescriptor {
    pub fn new(path: impl Into<PathBuf>, class_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            class_name: class_name.into(),
        }
    }
}

/// The document handed to the server through its configuration file.
///
/// Serialized once per start; key order is `host`, `port`, `drivers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfiguration {
    pub host: String,
    pub port: u16,
    pub drivers: Vec<DriverDescriptor>,
}

/// Runtime configuration for launching a sidecar server.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Name used in log lines.
    pub name: String,
    /// Server startup script, invoked as `<executable> <config-file>`.
    pub executable: PathBuf,
    /// Host written into the server configuration.
    pub host: String,
    /// Port tried first; the allocator falls back to any free port.
    pub preferred_port: u16,
    /// Directory for the transient configuration file.
    pub config_dir: PathBuf,
    /// Readiness polling policy.
    pub readiness: ReadinessPolicy,
    /// Per-request timeout of the client handed back to the caller.
    pub request_timeout: Duration,
    /// Leave the configuration file on disk after teardown (for debugging).
    pub keep_config_file: bool,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            name: "simple-jdbc-server".to_string(),
            executable: PathBuf::new(),
            host: DEFAULT_HOST.to_string(),
            preferred_port: DEFAULT_PREFERRED_PORT,
            config_dir: std::env::temp_dir(),
            readiness: ReadinessPolicy::default(),
            request_timeout: Duration::from_secs(30),
            keep_config_file: false,
        }
    }
}

impl SidecarConfig {
    /// Config for the given startup script with every other field defaulted.
    pub fn for_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            ..Default::default()
        }
    }

    /// Build the document written to the configuration file.
    pub fn server_configuration(
        &self,
        port: u16,
        drivers: Vec<DriverDescriptor>,
    ) -> ServerConfiguration {
        ServerConfiguration {
            host: self.host.clone(),
            port,
            drivers,
        }
    }
}

/// Where a started sidecar can be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarEndpoint {
    /// Host as written into the server configuration.
    pub host: String,
    /// Port the server was told to bind.
    pub port: u16,
}

impl SidecarEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host to dial. Wildcard bind addresses are reached through loopback.
    pub fn connect_host(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) if ip.is_unspecified() => "127.0.0.1".to_string(),
            Ok(IpAddr::V6(ip)) if ip.is_unspecified() => "[::1]".to_string(),
            Ok(IpAddr::V6(ip)) => format!("[{}]", ip),
            _ => self.host.clone(),
        }
    }

    /// Get the HTTP base URL for this endpoint.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.connect_host(), self.port)
    }
}

impl std::fmt::Display for SidecarEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SidecarConfig::for_executable("/opt/server/bin/simple-jdbc-server");

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.preferred_port, 8000);
        assert_eq!(config.readiness.max_attempts, 10);
        assert_eq!(config.readiness.interval, Duration::from_secs(1));
        assert!(!config.keep_config_file);
    }

    #[test]
    fn test_server_configuration_uses_given_port() {
        let config = SidecarConfig::default();
        let server = config.server_configuration(
            8123,
            vec![DriverDescriptor::new("/drv.jar", "org.x.Driver")],
        );

        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8123);
        assert_eq!(server.drivers[0].class_name, "org.x.Driver");
    }

    #[test]
    fn test_wildcard_endpoint_dials_loopback() {
        let endpoint = SidecarEndpoint::new("0.0.0.0", 8000);
        assert_eq!(endpoint.http_url(), "http://127.0.0.1:8000");
        assert_eq!(endpoint.to_string(), "0.0.0.0:8000");
    }

    #[test]
    fn test_named_and_v6_endpoints() {
        assert_eq!(
            SidecarEndpoint::new("localhost", 9000).http_url(),
            "http://localhost:9000"
        );
        assert_eq!(
            SidecarEndpoint::new("::1", 9000).http_url(),
            "http://[::1]:9000"
        );
        assert_eq!(
            SidecarEndpoint::new("::", 9000).http_url(),
            "http://[::1]:9000"
        );
    }
}
