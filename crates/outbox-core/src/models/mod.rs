//! Data models for Outbox

mod action;
mod cache_entry;
mod conflict;
mod entity;
mod network;
mod sync_status;

pub use action::{NewAction, Operation, QueuedAction};
pub use cache_entry::{CacheEntry, CacheFilter, CacheKey, CacheSize, ConfirmedContent};
pub use conflict::{Conflict, ConflictType, EntityVersion, Resolution};
pub use entity::{EntityId, VersionMarker};
pub use network::{NetworkQuality, NetworkStatus};
pub use sync_status::{SyncStatus, SyncStatusKind};
