use std::path::{Path, PathBuf};

use crate::cli::ConfigCommands;
use crate::config::{normalize_remote_url, CliConfig};
use crate::error::CliError;

pub fn run_config(
    command: ConfigCommands,
    config_path: &Path,
    config: &CliConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            remote_url,
            probe_addr,
            store_db_path,
        } => run_config_init(config_path, config.clone(), remote_url, probe_addr, store_db_path),
        ConfigCommands::Show => run_config_show(config_path, config, db_path),
    }
}

pub fn run_config_init(
    config_path: &Path,
    mut config: CliConfig,
    remote_url: Option<String>,
    probe_addr: Option<String>,
    db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    if let Some(url) = remote_url {
        config.remote_url = Some(normalize_remote_url(url)?);
    }
    if probe_addr.is_some() {
        config.probe_addr = probe_addr;
    }
    if db_path.is_some() {
        config.db_path = db_path;
    }

    config.save_to_path(config_path)?;
    println!("Saved config to {}", config_path.display());
    if config.remote_url.is_none() {
        println!("No remote URL set; changes will stay queued until one is configured.");
    }
    Ok(())
}

fn run_config_show(config_path: &Path, config: &CliConfig, db_path: &Path) -> Result<(), CliError> {
    println!("Config file: {}", config_path.display());
    println!("Database:    {}", db_path.display());
    println!(
        "Remote:      {}",
        config.remote_url().as_deref().unwrap_or("(not configured)")
    );
    println!(
        "Probe:       {}",
        config.probe_addr().as_deref().unwrap_or("(none, assuming online)")
    );
    println!("Sync:");
    println!("{}", serde_json::to_string_pretty(&config.sync)?);
    Ok(())
}
