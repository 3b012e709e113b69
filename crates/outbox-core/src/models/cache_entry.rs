//! Offline cache entry model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{EntityId, VersionMarker};

/// Key of a cache entry: an entity id or a composite key for generated artifacts
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Join parts (e.g. image id and style) into one key
    pub fn composite<S: AsRef<str>>(parts: &[S]) -> Self {
        Self(
            parts
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join("::"),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&EntityId> for CacheKey {
    fn from(value: &EntityId) -> Self {
        Self(value.as_str().to_string())
    }
}

/// Last remotely confirmed content, kept while an optimistic write is pending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedContent {
    pub content: Value,
    pub version: Option<VersionMarker>,
}

/// A locally stored, offline-readable copy of an entity or artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub content: Value,
    /// Content is known to be persisted remotely
    pub synced: bool,
    /// Last write (Unix ms); eviction goes oldest first
    pub timestamp: i64,
    /// Remote version of `content` (or of `confirmed` while unsynced)
    #[serde(default)]
    pub version: Option<VersionMarker>,
    #[serde(default)]
    pub confirmed: Option<ConfirmedContent>,
    /// Approximate serialized size
    #[serde(default)]
    pub size_bytes: usize,
}

/// Filter for cache listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheFilter {
    #[default]
    All,
    Synced,
    /// Local writes not yet confirmed by the remote
    Unsynced,
}

impl CacheFilter {
    pub const fn matches(self, entry: &CacheEntry) -> bool {
        match self {
            Self::All => true,
            Self::Synced => entry.synced,
            Self::Unsynced => !entry.synced,
        }
    }
}

/// Cache footprint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSize {
    pub count: usize,
    pub approximate_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composite_key() {
        assert_eq!(CacheKey::composite(&["img-1", "sketch"]).as_str(), "img-1::sketch");
        assert_eq!(CacheKey::from(&EntityId::from("n1")).as_str(), "n1");
    }
}
