//! opensurvd - OpenSurv manager daemon

use anyhow::Result;
use clap::Parser;
use opensurvd::cli::{Cli, Commands};
use opensurvd::config::Config;
use opensurvd::{apply, server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command() {
        Commands::Serve => {
            let config = Config::load(cli.config.as_deref())?;
            server::serve(config).await
        }
        Commands::ApplyUpdate { plan } => {
            tokio::task::spawn_blocking(move || apply::run(&plan)).await?
        }
        Commands::Check => {
            let config = Config::load(cli.config.as_deref())?;
            let result = config
                .update
                .release_fetcher()
                .check_for_update(config.update.current_version())
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
