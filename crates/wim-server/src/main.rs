use anyhow::Result;
use clap::Parser;
use serde::Serialize;

use wim_server::app;
use wim_server::cli::{Cli, Command};
use wim_server::config::ServerConfig;
use wim_server::logging;

#[allow(clippy::print_stdout)]
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install default CryptoProvider: {e:?}"))?;

    let cli = Cli::parse();
    let config = ServerConfig::load_or_default(cli.config.as_deref())?;
    logging::init_tracing(config.logging.format)?;

    match cli.command {
        Command::Reconcile { since } => {
            let report = app::run_reconcile(&config, since).await?;
            print_json(&report)
        }
        Command::CleanCertificates { cutoff, dry_run } => {
            let report = app::run_reclaim(&config, cutoff, dry_run)?;
            print_json(&report)
        }
        Command::InitDomains { seed } => {
            let summary = app::init_domains(&config, &seed)?;
            print_json(&summary)
        }
        Command::History { limit } => {
            let runs = app::history(&config, limit)?;
            print_json(&runs)
        }
        Command::Daemon => app::run_daemon(&config).await,
    }
}
