//! Persistent CLI configuration.
//!
//! Stored as JSON in the platform config directory. `OUTBOX_REMOTE_URL` and
//! `OUTBOX_DB_PATH` override the file (a `.env` in the working directory is
//! loaded first).

use std::env;
use std::path::{Path, PathBuf};

use outbox_core::util::{has_http_scheme, non_empty};
use outbox_core::SyncConfig;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

const CONFIG_FILE_NAME: &str = "config.json";
const REMOTE_URL_ENV: &str = "OUTBOX_REMOTE_URL";
const DB_PATH_ENV: &str = "OUTBOX_DB_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CliConfig {
    #[serde(default)]
    pub remote_url: Option<String>,
    /// `host:port` probed for connectivity
    #[serde(default)]
    pub probe_addr: Option<String>,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub sync: SyncConfig,
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("outbox")
        .join(CONFIG_FILE_NAME)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("outbox")
        .join("outbox.db")
}

impl CliConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|error| {
            CliError::Config(format!("Failed to read config at {}: {error}", path.display()))
        })?;
        let mut config = serde_json::from_str::<Self>(&raw).map_err(|error| {
            CliError::Config(format!("Failed to parse config at {}: {error}", path.display()))
        })?;
        config.normalize();
        config
            .sync
            .validate()
            .map_err(|error| CliError::Config(format!("{}: {error}", path.display())))?;
        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        std::fs::write(path, serde_json::to_string_pretty(&normalized)?)?;
        Ok(())
    }

    /// Remote base URL, environment first
    pub fn remote_url(&self) -> Option<String> {
        non_empty(env::var(REMOTE_URL_ENV).ok())
            .or_else(|| non_empty(self.remote_url.clone()))
    }

    /// Database path: flag, then environment, then file, then the data dir
    pub fn resolve_db_path(&self, cli_db_path: Option<PathBuf>) -> PathBuf {
        cli_db_path
            .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
            .or_else(|| self.db_path.clone())
            .unwrap_or_else(default_db_path)
    }

    /// Address to probe; falls back to the remote URL's authority
    pub fn probe_addr(&self) -> Option<String> {
        non_empty(self.probe_addr.clone())
            .or_else(|| self.remote_url().as_deref().and_then(probe_addr_from_url))
    }

    fn normalize(&mut self) {
        self.remote_url = non_empty(self.remote_url.take());
        self.probe_addr = non_empty(self.probe_addr.take());
    }
}

/// Check a user-supplied remote URL before it is saved.
pub fn normalize_remote_url(value: String) -> Result<String, CliError> {
    let value = non_empty(Some(value))
        .ok_or_else(|| CliError::Config("Remote URL cannot be empty".to_string()))?;
    if !has_http_scheme(&value) {
        return Err(CliError::Config(
            "Remote URL must include http:// or https://".to_string(),
        ));
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// `https://api.example.com/v1` -> `api.example.com:443`
pub fn probe_addr_from_url(url: &str) -> Option<String> {
    let (default_port, rest) = if let Some(rest) = url.strip_prefix("https://") {
        (443, rest)
    } else {
        (80, url.strip_prefix("http://")?)
    };
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit('@').next()?;
    if host_port.is_empty() {
        return None;
    }

    let has_port = if host_port.starts_with('[') {
        host_port.contains("]:")
    } else {
        host_port.contains(':')
    };
    Some(if has_port {
        host_port.to_string()
    } else {
        format!("{host_port}:{default_port}")
    })
}
