//! keastat - Kea DHCP subnet statistics to carbon
//!
//! Runs forever (one pass every `poller.interval_secs`) unless `--once`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use keastat::{AgentConfig, Poller};

#[derive(Debug, Parser)]
#[command(name = "keastat", version, about = "Collect Kea DHCP subnet statistics into carbon")]
struct Cli {
    /// Settings file (default: $KEASTAT_CONFIG, then <config dir>/keastat/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keastat=info")),
        )
        .init();

    let cli = Cli::parse();
    info!("keastat {} starting...", env!("CARGO_PKG_VERSION"));

    let config = AgentConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load settings")?;
    let poller = Poller::new(config);
    info!(
        "Polling {} Kea Control Agent(s), every {} seconds",
        poller.config().targets.len(),
        poller.config().poller.interval_secs
    );

    if cli.once {
        let summaries = poller.run_once().await;
        let failed = summaries.iter().filter(|s| !s.is_success()).count();
        if failed > 0 {
            anyhow::bail!("{} of {} target(s) failed", failed, summaries.len());
        }
    } else {
        poller.run().await;
    }

    Ok(())
}
