use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{optional_env, parse_bool_env, parse_optional_env};
use crate::error::ConfigError;
use crate::sidecar::readiness::ReadinessPolicy;

/// Settings for locally started simple-jdbc servers.
#[derive(Debug, Clone)]
pub struct SidecarSettings {
    /// Host written into the server configuration.
    pub host: String,
    /// Port tried first when allocating.
    pub preferred_port: u16,
    /// Maximum number of readiness probes.
    pub ready_attempts: u32,
    /// Delay between readiness probes in milliseconds.
    pub ready_interval_ms: u64,
    /// Whether to keep the configuration file after shutdown (for debugging).
    pub keep_config_file: bool,
    /// Startup script to run instead of the installed distribution.
    pub server_script: Option<PathBuf>,
}

impl Default for SidecarSettings {
    fn default() -> Self {
        Self {
            host: crate::sidecar::config::DEFAULT_HOST.to_string(),
            preferred_port: crate::sidecar::config::DEFAULT_PREFERRED_PORT,
            ready_attempts: 10,
            ready_interval_ms: 1000,
            keep_config_file: false,
            server_script: None,
        }
    }
}

impl SidecarSettings {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ready_attempts =
            parse_optional_env("SIMPLE_JDBC_READY_ATTEMPTS", defaults.ready_attempts)?;
        if ready_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SIMPLE_JDBC_READY_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            host: optional_env("SIMPLE_JDBC_HOST")?.unwrap_or(defaults.host),
            preferred_port: parse_optional_env("SIMPLE_JDBC_PORT", defaults.preferred_port)?,
            ready_attempts,
            ready_interval_ms: parse_optional_env(
                "SIMPLE_JDBC_READY_INTERVAL_MS",
                defaults.ready_interval_ms,
            )?,
            keep_config_file: parse_bool_env("SIMPLE_JDBC_KEEP_CONFIG", defaults.keep_config_file)?,
            server_script: optional_env("SIMPLE_JDBC_SERVER_SCRIPT")?.map(PathBuf::from),
        })
    }

    /// Create the runtime sidecar configuration for `executable`.
    pub fn to_sidecar_config(&self, executable: PathBuf) -> crate::sidecar::SidecarConfig {
        crate::sidecar::SidecarConfig {
            executable,
            host: self.host.clone(),
            preferred_port: self.preferred_port,
            readiness: ReadinessPolicy {
                max_attempts: self.ready_attempts,
                interval: Duration::from_millis(self.ready_interval_ms),
            },
            keep_config_file: self.keep_config_file,
            ..Default::default()
        }
    }
}
