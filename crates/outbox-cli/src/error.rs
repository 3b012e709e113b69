use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] outbox_core::Error),
    #[error(transparent)]
    Storage(#[from] outbox_core::storage::StorageError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Entity ID cannot be empty")]
    EmptyEntityId,
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(String),
    #[error("A --payload is required for {0}")]
    MissingPayload(&'static str),
    #[error("No cached entry for key: {0}")]
    CacheEntryNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Remote is not configured. Run `outbox config init --remote-url <URL>` or set OUTBOX_REMOTE_URL."
    )]
    RemoteNotConfigured,
    #[error("Aborted")]
    Aborted,
}
