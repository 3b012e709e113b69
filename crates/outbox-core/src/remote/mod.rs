//! Remote API contract the sync engine drains against.
//!
//! Any transport works as long as `update` is version-checked and reports a
//! mismatch as [`RemoteError::Conflict`].

mod http;
mod memory;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{EntityId, VersionMarker};

pub use http::HttpRemote;
pub use memory::{MemoryRemote, RemoteCall};

/// Result type alias for remote calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Current remote state of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub payload: Value,
    pub version: VersionMarker,
}

/// Failures reported by a remote API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// No response within the request timeout
    #[error("Request timed out")]
    Timeout,

    /// Connection refused, reset, DNS failure...
    #[error("Network error: {0}")]
    Network(String),

    /// Server-side failure worth retrying (5xx, 408, 429)
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Version-checked write refused
    #[error("Version conflict (remote at {})", .current.as_ref().map_or("unknown", VersionMarker::as_str))]
    Conflict { current: Option<VersionMarker> },

    /// Entity does not exist remotely
    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    /// Payload rejected as malformed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Any other permanent refusal
    #[error("Request rejected {status}: {message}")]
    Rejected { status: u16, message: String },
}

impl RemoteError {
    /// Whether retrying the same request later can succeed
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network(_) | Self::Server { .. }
        )
    }
}

/// Per-entity remote operations.
///
/// Futures must be `Send` because drains run on spawned tasks.
pub trait RemoteApi: Send + Sync + 'static {
    /// Create the entity, returning its first version
    fn create(
        &self,
        id: &EntityId,
        payload: &Value,
    ) -> impl Future<Output = RemoteResult<VersionMarker>> + Send;

    /// Read the entity; `None` when it does not exist
    fn read(&self, id: &EntityId)
        -> impl Future<Output = RemoteResult<Option<RemoteEntity>>> + Send;

    /// Replace the entity if its version still equals `expected`
    ///
    /// `None` skips the check (last writer wins).
    fn update(
        &self,
        id: &EntityId,
        payload: &Value,
        expected: Option<&VersionMarker>,
    ) -> impl Future<Output = RemoteResult<VersionMarker>> + Send;

    /// Delete the entity
    fn delete(&self, id: &EntityId) -> impl Future<Output = RemoteResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Timeout.is_transient());
        assert!(RemoteError::Network("refused".into()).is_transient());
        assert!(RemoteError::Server {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!RemoteError::Conflict { current: None }.is_transient());
        assert!(!RemoteError::Validation("bad".into()).is_transient());
        assert!(!RemoteError::NotFound(EntityId::from("x")).is_transient());
    }

    #[test]
    fn test_conflict_message_names_version() {
        let error = RemoteError::Conflict {
            current: Some(VersionMarker::from("v7")),
        };
        assert!(error.to_string().contains("v7"));
    }
}
