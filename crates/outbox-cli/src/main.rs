//! Outbox CLI - queue changes offline and sync them from the terminal
//!
//! Every command opens the local outbox database, does its work and exits;
//! `watch` keeps the background sync running until interrupted.

mod cli;
mod commands;
mod config;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::cache::run_cache;
use crate::commands::common::open_client;
use crate::commands::completions::run_completions;
use crate::commands::config::run_config;
use crate::commands::demo::run_demo;
use crate::commands::enqueue::run_enqueue;
use crate::commands::queue::run_queue;
use crate::commands::reset::run_reset;
use crate::commands::resolve::run_resolve;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::config::{default_config_path, CliConfig};
use crate::error::CliError;

const DEFAULT_LOG_FILTER: &str = "outbox=info";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = CliConfig::load_from_path(&config_path)?;
    let db_path = config.resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Enqueue {
            id,
            op,
            payload,
            base_version,
        } => {
            let client = open_client(&config, &db_path, false).await?;
            run_enqueue(
                &client,
                &id,
                op,
                payload.as_deref(),
                base_version.as_deref(),
            )?;
        }
        Commands::Queue { json } => {
            let client = open_client(&config, &db_path, false).await?;
            run_queue(&client, json)?;
        }
        Commands::Sync { json } => {
            let client = open_client(&config, &db_path, false).await?;
            run_sync(&client, json).await?;
        }
        Commands::Status { json } => {
            let client = open_client(&config, &db_path, false).await?;
            run_status(&client, json)?;
        }
        Commands::Resolve {
            id,
            strategy,
            payload,
        } => {
            let client = open_client(&config, &db_path, false).await?;
            run_resolve(&client, &id, strategy, payload.as_deref()).await?;
        }
        Commands::Cache { command } => {
            let client = open_client(&config, &db_path, false).await?;
            run_cache(&client, command)?;
        }
        Commands::Reset { yes } => {
            let client = open_client(&config, &db_path, false).await?;
            run_reset(&client, yes)?;
        }
        Commands::Watch { interval } => {
            let client = open_client(&config, &db_path, true).await?;
            run_watch(&client, interval).await?;
        }
        Commands::Demo => run_demo().await?,
        Commands::Config { command } => run_config(command, &config_path, &config, &db_path)?,
        Commands::Completions { shell, output } => {
            run_completions(shell, output.as_deref())?;
        }
    }

    Ok(())
}
