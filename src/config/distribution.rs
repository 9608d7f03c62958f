use std::path::PathBuf;

use crate::config::helpers::optional_env;
use crate::distribution::{DEFAULT_DOWNLOAD_BASE_URL, DEFAULT_SERVER_VERSION, ServerDistribution};
use crate::error::ConfigError;

/// Where the server distribution comes from and where it is installed.
#[derive(Debug, Clone)]
pub struct DistributionSettings {
    /// Server version to install.
    pub version: String,
    /// Root directory; the distribution lives under `<home>/bin`.
    pub home: PathBuf,
    /// Repository base URL.
    pub base_url: String,
}

impl DistributionSettings {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let home = match optional_env("SIMPLE_JDBC_HOME")? {
            Some(home) => PathBuf::from(home),
            None => default_home().ok_or_else(|| ConfigError::MissingRequired {
                key: "SIMPLE_JDBC_HOME".to_string(),
                hint: "no home directory found; set SIMPLE_JDBC_HOME".to_string(),
            })?,
        };

        let base_url = optional_env("SIMPLE_JDBC_DOWNLOAD_BASE_URL")?
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_BASE_URL.to_string());
        if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
            return Err(ConfigError::InvalidValue {
                key: "SIMPLE_JDBC_DOWNLOAD_BASE_URL".to_string(),
                message: "must start with http:// or https://".to_string(),
            });
        }

        Ok(Self {
            version: optional_env("SIMPLE_JDBC_SERVER_VERSION")?
                .unwrap_or_else(|| DEFAULT_SERVER_VERSION.to_string()),
            home,
            base_url,
        })
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.home.join("bin")
    }

    pub fn to_distribution(&self) -> ServerDistribution {
        ServerDistribution::new(self.version.clone(), self.bin_dir())
            .with_base_url(self.base_url.clone())
    }
}

/// `~/.simple-jdbc`
fn default_home() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".simple-jdbc"))
}
