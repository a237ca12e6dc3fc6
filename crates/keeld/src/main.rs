//! keeld — the Keel agent daemon.
//!
//! # Usage
//!
//! ```text
//! keeld run --config /etc/keel/keel.toml --data-dir /var/lib/keel
//! keeld evict --config /etc/keel/keel.toml
//! keeld status
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use keel_core::{KeelConfig, LogFormat};
use keeld::Agent;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,keeld=debug,keel=debug";

#[derive(Parser)]
#[command(name = "keeld", about = "Keel agent daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent until Ctrl-C.
    Run {
        /// Path to keel.toml. Environment variables override it.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for the embedded database; overrides the configured path.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Run one stats eviction sweep and print the report.
    Evict {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print build queue status and pending jobs as JSON.
    Status {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, data_dir } => {
            let mut config = KeelConfig::load(config.as_deref())?;
            if let Some(dir) = data_dir {
                config.storage.embedded.path = dir.join("keel.redb");
            }
            init_tracing(config.log.format);
            run(config).await
        }
        Command::Evict { config } => {
            let config = load(config.as_deref())?;
            let agent = Agent::open(config)?;
            let report = agent.stats().evict()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Status { config } => {
            let config = load(config.as_deref())?;
            let agent = Agent::open(config)?;
            println!("{}", serde_json::to_string_pretty(&agent.status()?)?);
            Ok(())
        }
    }
}

fn load(path: Option<&Path>) -> anyhow::Result<KeelConfig> {
    let config = KeelConfig::load(path)?;
    init_tracing(config.log.format);
    Ok(config)
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(config: KeelConfig) -> anyhow::Result<()> {
    info!(backend = ?config.storage.backend, "keel agent starting");

    let agent = Agent::open(config)?;
    agent.prepare()?;

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor = agent.janitor();
    let janitor_handle = tokio::spawn(async move {
        janitor.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = janitor_handle.await;
    info!("keel agent stopped");
    Ok(())
}
