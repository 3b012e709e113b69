//! Durable key-value storage behind the queue and the cache.
//!
//! The sync core treats persistence as an external collaborator with a plain
//! get/set/delete contract. Calls are synchronous so queue and cache mutations
//! never suspend.

mod memory;
mod migrations;
mod sqlite;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Result type alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised by key-value stores
#[derive(Error, Debug)]
pub enum StorageError {
    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend cannot be reached at all
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the write for lack of space
    #[error("Storage quota exceeded writing {key} ({bytes} bytes)")]
    QuotaExceeded { key: String, bytes: usize },

    /// Stored value could not be decoded
    #[error("Corrupt value at {key}: {message}")]
    Corrupt { key: String, message: String },

    /// Value could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Minimal durable key-value contract
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` when the key is absent
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Insert or overwrite a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a value; absent keys are not an error
    fn delete(&self, key: &str) -> StorageResult<()>;
}

/// Read and decode a JSON value
pub fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> StorageResult<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|error| StorageError::Corrupt {
            key: key.to_string(),
            message: error.to_string(),
        })
}

/// Encode and write a JSON value
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}
