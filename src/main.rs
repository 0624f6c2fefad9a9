//! docker-domains daemon entry point.
//!
//! Keeps a dnsmasq configuration in sync with the running Docker
//! containers and points systemd-resolved at it, so containers resolve
//! as `<name><domain>` from the host.

use std::path::PathBuf;

use clap::Parser;
use log::info;

mod config;
mod dnsmasq;
mod error;
mod lifecycle;
mod names;
mod reconciler;
mod runtime;
mod system;
#[cfg(test)]
mod testing;
mod types;
mod watcher;

use config::Config;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Configuration file (TOML, or JSON with a `.json` extension).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load configuration
    let cfg = Config::load(cli.config.as_deref())?;
    info!("Starting docker-domains with config: {:?}", cfg);

    lifecycle::run(cfg).await
}
