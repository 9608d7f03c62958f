//! CLI command handling.
//!
//! Two ways to reach a server:
//! - Local (`--driver`, `--class-name`): install the server distribution if
//!   needed and start it as a sidecar for the session
//! - Remote (`--remote`): talk to an already running server
//!
//! Either way the session is an interactive REPL against `--jdbc-url`.
//! The `download` subcommand only installs the distribution.

pub mod repl;
pub mod table;

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{ColorChoice, Parser, Subcommand};

use crate::client::SimpleJdbcClient;
use crate::config::Config;
use crate::sidecar::{DriverDescriptor, SidecarManager, StartOptions};

pub use repl::{Repl, ReplCommand};
pub use table::render_table;

#[derive(Parser, Debug)]
#[command(name = "simple-jdbc")]
#[command(about = "Issue queries to a database through a JDBC driver")]
#[command(
    long_about = "Issue queries to a database through a JDBC driver, either with a local simple-jdbc server started for the session or against a remote one.\nExamples:\n  simple-jdbc --driver postgresql.jar --class-name org.postgresql.Driver --jdbc-url jdbc:postgresql://localhost/app\n  simple-jdbc --remote http://db-gateway:8000 --jdbc-url jdbc:postgresql://localhost/app"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
#[command(subcommand_negates_reqs = true, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the JDBC driver file
    #[arg(long, value_name = "DRIVER", conflicts_with = "remote")]
    pub driver: Option<PathBuf>,

    /// The driver class name to load
    #[arg(long, value_name = "CLASS_NAME", conflicts_with = "remote")]
    pub class_name: Option<String>,

    /// Include server log output
    #[arg(long, conflicts_with = "remote")]
    pub debug: bool,

    /// Remote simple-jdbc server URL. Cannot be used with --driver, --class-name, or --debug
    #[arg(long, value_name = "REMOTE")]
    pub remote: Option<String>,

    /// The JDBC url to use for queries
    #[arg(long, value_name = "JDBC_URL", required = true)]
    pub jdbc_url: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Download and install the server distribution
    #[command(
        about = "Install the simple-jdbc server",
        long_about = "Downloads the server distribution unless it is already installed and prints the startup script path.\nExample: simple-jdbc download"
    )]
    Download,
}

/// Where queries are served from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionMode {
    Local {
        driver: DriverDescriptor,
        debug: bool,
    },
    Remote {
        url: String,
    },
}

impl Cli {
    /// Resolve the session mode from the flags.
    pub fn session_mode(&self) -> anyhow::Result<SessionMode> {
        if let Some(url) = &self.remote {
            return Ok(SessionMode::Remote { url: url.clone() });
        }
        match (&self.driver, &self.class_name) {
            (Some(path), Some(class_name)) => Ok(SessionMode::Local {
                driver: DriverDescriptor::new(path.clone(), class_name.clone()),
                debug: self.debug,
            }),
            _ => bail!("--driver and --class-name must be defined"),
        }
    }
}

/// Install the server distribution and print its startup script.
pub async fn run_download_command(config: &Config) -> anyhow::Result<()> {
    let distribution = config.distribution.to_distribution();
    let script = distribution
        .ensure_installed()
        .await
        .context("Failed to install the simple-jdbc server")?;
    println!("{}", script.display());
    Ok(())
}

/// Run an interactive query session in the mode selected by `cli`.
pub async fn run_session(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let Some(jdbc_url) = cli.jdbc_url.as_deref() else {
        bail!("--jdbc-url must be defined");
    };
    let history = repl::history_path(&config.distribution.home);

    match cli.session_mode()? {
        SessionMode::Remote { url } => {
            let client = SimpleJdbcClient::new(&url)?;
            tracing::debug!("Using remote server {}", client.base_url());
            Repl::new(&client, jdbc_url).run(Some(&history)).await
        }
        SessionMode::Local { driver, debug } => {
            let executable = match &config.sidecar.server_script {
                Some(script) => script.clone(),
                None => config
                    .distribution
                    .to_distribution()
                    .ensure_installed()
                    .await
                    .context("Failed to install the simple-jdbc server")?,
            };

            let manager = SidecarManager::new(config.sidecar.to_sidecar_config(executable));
            let mut options = StartOptions::new(vec![driver]).on_exit(|exit| {
                if !exit.requested {
                    eprintln!("simple-jdbc server exited unexpectedly ({})", exit);
                    std::process::exit(1);
                }
            });
            if debug {
                options = options
                    .on_stdout(|line| eprintln!("{}", line))
                    .on_stderr(|line| eprintln!("{}", line));
            }

            let handle = manager
                .start(options)
                .await
                .context("Failed to start the simple-jdbc server")?;
            tracing::debug!("Server listening on {}", handle.endpoint());

            let result = Repl::new(handle.client(), jdbc_url)
                .run(Some(&history))
                .await;
            handle.shutdown().await;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_mode() {
        let cli = Cli::try_parse_from([
            "simple-jdbc",
            "--driver",
            "/drv.jar",
            "--class-name",
            "org.x.Driver",
            "--jdbc-url",
            "jdbc:x://db",
        ])
        .unwrap();

        assert_eq!(
            cli.session_mode().unwrap(),
            SessionMode::Local {
                driver: DriverDescriptor::new("/drv.jar", "org.x.Driver"),
                debug: false,
            }
        );
        assert_eq!(cli.jdbc_url.as_deref(), Some("jdbc:x://db"));
    }

    #[test]
    fn test_remote_mode() {
        let cli = Cli::try_parse_from([
            "simple-jdbc",
            "--remote",
            "http://server:8000",
            "--jdbc-url",
            "jdbc:x://db",
        ])
        .unwrap();

        assert_eq!(
            cli.session_mode().unwrap(),
            SessionMode::Remote {
                url: "http://server:8000".to_string()
            }
        );
    }

    #[test]
    fn test_missing_class_name_is_rejected() {
        let cli =
            Cli::try_parse_from(["simple-jdbc", "--driver", "/drv.jar", "--jdbc-url", "jdbc:x"])
                .unwrap();

        let err = cli.session_mode().unwrap_err();
        assert_eq!(err.to_string(), "--driver and --class-name must be defined");
    }

    #[test]
    fn test_remote_conflicts_with_local_flags() {
        let result = Cli::try_parse_from([
            "simple-jdbc",
            "--remote",
            "http://server:8000",
            "--debug",
            "--jdbc-url",
            "jdbc:x",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_jdbc_url_required_for_sessions() {
        assert!(Cli::try_parse_from(["simple-jdbc", "--remote", "http://server:8000"]).is_err());
    }

    #[test]
    fn test_download_subcommand() {
        let cli = Cli::try_parse_from(["simple-jdbc", "download"]).unwrap();
        assert_eq!(cli.command, Some(Command::Download));
    }
}
