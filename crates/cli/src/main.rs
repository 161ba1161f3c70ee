//! certdesk command-line console.
//!
//! Logging goes to stderr as JSON so stdout stays parseable.

use anyhow::Result;
use certdesk_core::AppConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod args;
mod commands;
mod session;

use args::Cli;
use session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = cli.apply_overrides(AppConfig::load()?);
    config.validate()?;
    tracing::debug!(api = %config.api_base_url, page_size = config.page_size, "configuration loaded");

    let session = Session::new(&config)?;
    let mut stdout = std::io::stdout().lock();
    let result = commands::run(&session, cli.command, &mut stdout).await;
    session.shutdown();
    result
}
