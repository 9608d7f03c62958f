//! Configuration resolved from the environment.
//!
//! A `.env` file is loaded by the binary before [`Config::from_env`] runs.
//! Unset or empty variables fall back to defaults; values that do not parse
//! are reported as [`ConfigError::InvalidValue`].

mod distribution;
pub(crate) mod helpers;
mod sidecar;

pub use distribution::DistributionSettings;
pub use sidecar::SidecarSettings;

use crate::error::ConfigError;

/// All runtime settings.
#[derive(Debug, Clone)]
pub struct Config {
    pub sidecar: SidecarSettings,
    pub distribution: DistributionSettings,
}

impl Config {
    /// Resolve every section from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            sidecar: SidecarSettings::resolve()?,
            distribution: DistributionSettings::resolve()?,
        })
    }
}
