//! simple-jdbc - Main entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use simple_jdbc::{
    cli::{Cli, Command, run_download_command, run_session},
    config::Config,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let default_filter = if cli.debug {
        "simple_jdbc=debug"
    } else {
        "simple_jdbc=warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = Config::from_env()?;

    match cli.command {
        Some(Command::Download) => run_download_command(&config).await,
        None => run_session(&cli, &config).await,
    }
}
