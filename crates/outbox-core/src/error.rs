//! Error types for outbox-core

use thiserror::Error;

use crate::cache::CacheError;
use crate::storage::StorageError;

/// Result type alias using outbox-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in outbox-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Durable storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Cache write error
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No open conflict for the entity
    #[error("No conflict recorded for entity: {0}")]
    ConflictNotFound(String),
}
