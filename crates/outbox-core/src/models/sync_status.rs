//! Aggregate sync status model

use serde::{Deserialize, Serialize};

use super::{Conflict, EntityId};

/// Coarse state of the sync engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatusKind {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
    Conflict,
}

/// Process-wide sync status, rebuilt on every state transition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub status: SyncStatusKind,
    /// Last drain that finished without errors or conflicts (Unix ms)
    pub last_sync: Option<i64>,
    pub last_error: Option<String>,
    /// Outstanding queued actions, conflicted ones included
    pub pending_changes: usize,
    /// Conflicts awaiting resolution, in detection order
    pub conflicts: Vec<Conflict>,
    /// Consecutive drains that ended with errors
    pub retry_count: u32,
    /// Auto-retry budget spent; only a manual sync will try again
    pub retry_exhausted: bool,
    /// When the scheduled retry fires (Unix ms)
    pub next_retry_at: Option<i64>,
}

impl SyncStatus {
    pub fn conflict_for(&self, id: &EntityId) -> Option<&Conflict> {
        self.conflicts.iter().find(|conflict| &conflict.entity_id == id)
    }

    /// Record a conflict, replacing an older one for the same entity in place.
    pub fn upsert_conflict(&mut self, conflict: Conflict) {
        if let Some(existing) = self
            .conflicts
            .iter_mut()
            .find(|existing| existing.entity_id == conflict.entity_id)
        {
            *existing = conflict;
        } else {
            self.conflicts.push(conflict);
        }
    }

    pub fn remove_conflict(&mut self, id: &EntityId) -> Option<Conflict> {
        let index = self
            .conflicts
            .iter()
            .position(|conflict| &conflict.entity_id == id)?;
        Some(self.conflicts.remove(index))
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}
