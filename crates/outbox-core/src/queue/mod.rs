//! Durable, ordered, coalescing queue of pending mutations.
//!
//! Entries live in a map keyed by insertion sequence with an id index beside
//! it, so coalescing updates an entry in place and keeps its drain position.
//! Every mutation writes a full snapshot to the key-value store. A failed
//! write is logged and the next snapshot carries the change.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::models::{EntityId, NewAction, Operation, QueuedAction, VersionMarker};
use crate::storage::{load_json, save_json, KeyValueStore, StorageResult};
use crate::util::unix_millis_now;

/// Storage key of the queue snapshot
pub const QUEUE_KEY: &str = "outbox/queue";

/// What [`ActionQueue::enqueue`] did with the action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// New entry at the back of the queue
    Inserted,
    /// Merged into the pending entry; operation unchanged
    Coalesced,
    /// Merged into the pending entry with a different operation; attempts reset
    Replaced,
}

/// What [`ActionQueue::complete`] did after a confirmed remote write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Removed,
    /// A newer edit arrived while the write was in flight; it stays queued
    /// on top of the confirmed version
    Rebased,
    Missing,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: BTreeMap<u64, QueuedAction>,
    index: HashMap<EntityId, u64>,
    next_seq: u64,
}

impl QueueState {
    fn entry_mut(&mut self, id: &EntityId) -> Option<&mut QueuedAction> {
        let seq = self.index.get(id)?;
        self.entries.get_mut(seq)
    }

    fn remove(&mut self, id: &EntityId) -> Option<QueuedAction> {
        let seq = self.index.remove(id)?;
        self.entries.remove(&seq)
    }
}

/// Pending mutations, at most one per entity
pub struct ActionQueue {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<QueueState>,
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ActionQueue")
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl ActionQueue {
    /// Load the persisted queue.
    ///
    /// Conflict flags are cleared: conflicts belong to the session that found
    /// them and the next drain detects them again.
    pub fn open(store: Arc<dyn KeyValueStore>) -> StorageResult<Self> {
        let persisted: Vec<QueuedAction> = load_json(store.as_ref(), QUEUE_KEY)?.unwrap_or_default();

        let mut state = QueueState::default();
        let mut unblocked = 0_usize;
        for mut action in persisted {
            if state.index.contains_key(&action.id) {
                tracing::warn!("Dropping duplicate queued action for {}", action.id);
                continue;
            }
            if action.conflicted {
                action.conflicted = false;
                unblocked += 1;
            }
            state.next_seq = state.next_seq.max(action.seq + 1);
            state.index.insert(action.id.clone(), action.seq);
            state.entries.insert(action.seq, action);
        }

        if !state.entries.is_empty() {
            tracing::info!(
                "Loaded {} queued action(s) ({} previously conflicted)",
                state.entries.len(),
                unblocked
            );
        }

        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    /// Insert a mutation or coalesce it into the pending one for the same id
    pub fn enqueue(&self, action: NewAction) -> EnqueueOutcome {
        let mut state = self.lock();
        let outcome = if let Some(entry) = state.entry_mut(&action.id) {
            let operation = entry.operation.coalesce(action.operation);
            let changed = operation != entry.operation;
            entry.operation = operation;
            entry.payload = action.payload;
            if entry.base_version.is_none() {
                entry.base_version = action.base_version;
            }
            entry.revision = entry.revision.wrapping_add(1);
            if changed {
                entry.attempts = 0;
                EnqueueOutcome::Replaced
            } else {
                EnqueueOutcome::Coalesced
            }
        } else {
            let seq = state.next_seq;
            state.next_seq += 1;
            state.index.insert(action.id.clone(), seq);
            state.entries.insert(
                seq,
                QueuedAction {
                    id: action.id,
                    operation: action.operation,
                    payload: action.payload,
                    timestamp: unix_millis_now(),
                    seq,
                    attempts: 0,
                    base_version: action.base_version,
                    revision: 0,
                    force: false,
                    conflicted: false,
                },
            );
            EnqueueOutcome::Inserted
        };
        self.persist(&state);
        outcome
    }

    /// Remove the entry for `id`; absent ids are a no-op
    pub fn dequeue(&self, id: &EntityId) -> bool {
        let mut state = self.lock();
        let removed = state.remove(id).is_some();
        if removed {
            self.persist(&state);
        }
        removed
    }

    /// Settle a confirmed remote write made from `revision` of the entry.
    ///
    /// `version` is the remote version the write produced (`None` after a
    /// delete). A newer edit queued meanwhile is kept and rebased on it.
    pub fn complete(
        &self,
        id: &EntityId,
        revision: u32,
        version: Option<&VersionMarker>,
    ) -> CompleteOutcome {
        let mut state = self.lock();
        let Some(entry) = state.entry_mut(id) else {
            return CompleteOutcome::Missing;
        };

        if entry.revision == revision {
            state.remove(id);
            self.persist(&state);
            return CompleteOutcome::Removed;
        }

        if entry.operation == Operation::Create && version.is_some() {
            entry.operation = Operation::Update;
        }
        entry.base_version = version.cloned();
        entry.attempts = 0;
        entry.force = false;
        self.persist(&state);
        CompleteOutcome::Rebased
    }

    /// Drop an entry that can never succeed, unless it changed since `revision`
    pub fn discard(&self, id: &EntityId, revision: u32) -> bool {
        let mut state = self.lock();
        let matches = state
            .entry_mut(id)
            .is_some_and(|entry| entry.revision == revision);
        if matches {
            state.remove(id);
            self.persist(&state);
        }
        matches
    }

    pub fn get(&self, id: &EntityId) -> Option<QueuedAction> {
        let state = self.lock();
        state
            .index
            .get(id)
            .and_then(|seq| state.entries.get(seq))
            .cloned()
    }

    /// Snapshot of every entry in insertion order
    pub fn peek_all(&self) -> Vec<QueuedAction> {
        self.lock().entries.values().cloned().collect()
    }

    /// Outstanding entries, conflicted ones included
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether a drain would attempt anything
    pub fn has_drainable(&self) -> bool {
        self.lock().entries.values().any(|entry| !entry.conflicted)
    }

    /// Count a failed attempt; returns the new total
    pub fn record_attempt(&self, id: &EntityId) -> Option<u32> {
        let mut state = self.lock();
        let entry = state.entry_mut(id)?;
        entry.attempts = entry.attempts.saturating_add(1);
        let attempts = entry.attempts;
        self.persist(&state);
        Some(attempts)
    }

    /// Block the entry until its conflict is resolved
    pub fn mark_conflicted(&self, id: &EntityId) -> bool {
        self.update_entry(id, |entry| entry.conflicted = true)
    }

    pub fn clear_conflict(&self, id: &EntityId) -> bool {
        self.update_entry(id, |entry| entry.conflicted = false)
    }

    /// Unblock the entry and skip the version check on its next write.
    ///
    /// A create becomes an update so it overwrites whatever the remote
    /// holds; a forced update of a missing entity still creates it.
    pub fn force_next(&self, id: &EntityId) -> bool {
        self.update_entry(id, |entry| {
            if entry.operation == Operation::Create {
                entry.operation = Operation::Update;
            }
            entry.conflicted = false;
            entry.force = true;
            entry.attempts = 0;
        })
    }

    /// Swap in a reconciled payload as an update on top of `base_version`.
    ///
    /// Inserts a fresh entry when nothing is queued for `id`.
    pub fn replace_payload(
        &self,
        id: &EntityId,
        payload: Value,
        base_version: Option<VersionMarker>,
    ) -> EnqueueOutcome {
        let replaced = self.update_entry(id, |entry| {
            entry.operation = Operation::Update;
            entry.payload = payload.clone();
            entry.base_version = base_version.clone();
            entry.revision = entry.revision.wrapping_add(1);
            entry.attempts = 0;
            entry.force = false;
            entry.conflicted = false;
        });
        if replaced {
            return EnqueueOutcome::Replaced;
        }

        let mut action = NewAction::update(id.clone(), payload);
        action.base_version = base_version;
        self.enqueue(action)
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        state.index.clear();
        self.persist(&state);
        tracing::info!("Cleared action queue ({} entries)", dropped);
    }

    fn update_entry(&self, id: &EntityId, apply: impl FnOnce(&mut QueuedAction)) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.entry_mut(id) else {
            return false;
        };
        apply(entry);
        self.persist(&state);
        true
    }

    fn persist(&self, state: &QueueState) {
        let snapshot: Vec<&QueuedAction> = state.entries.values().collect();
        if let Err(error) = save_json(self.store.as_ref(), QUEUE_KEY, &snapshot) {
            tracing::error!("Failed to persist action queue: {}", error);
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn queue() -> (Arc<MemoryStore>, ActionQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = ActionQueue::open(store.clone()).unwrap();
        (store, queue)
    }

    fn ids(queue: &ActionQueue) -> Vec<String> {
        queue
            .peek_all()
            .into_iter()
            .map(|action| action.id.as_str().to_string())
            .collect()
    }

    #[test]
    fn test_two_updates_coalesce_into_latest_payload() {
        let (_, queue) = queue();
        assert_eq!(
            queue.enqueue(NewAction::update("n1", json!({"title": "a"})).with_base_version("v1")),
            EnqueueOutcome::Inserted
        );
        assert_eq!(
            queue.enqueue(NewAction::update("n1", json!({"title": "b"})).with_base_version("v2")),
            EnqueueOutcome::Coalesced
        );

        assert_eq!(queue.size(), 1);
        let action = queue.get(&EntityId::from("n1")).unwrap();
        assert_eq!(action.payload, json!({"title": "b"}));
        assert_eq!(action.base_version, Some(VersionMarker::from("v1")));
        assert_eq!(action.revision, 1);
    }

    #[test]
    fn test_coalescing_keeps_position() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::create("a", json!({})));
        queue.enqueue(NewAction::create("b", json!({})));
        queue.enqueue(NewAction::create("c", json!({})));
        queue.enqueue(NewAction::update("a", json!({"n": 2})));

        assert_eq!(ids(&queue), vec!["a", "b", "c"]);
        assert_eq!(
            queue.get(&EntityId::from("a")).unwrap().operation,
            Operation::Create
        );
    }

    #[test]
    fn test_delete_after_create_collapses_to_delete() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::create("n1", json!({"title": "draft"})));
        queue.record_attempt(&EntityId::from("n1"));

        assert_eq!(queue.enqueue(NewAction::delete("n1")), EnqueueOutcome::Replaced);
        let action = queue.get(&EntityId::from("n1")).unwrap();
        assert_eq!(action.operation, Operation::Delete);
        assert_eq!(action.attempts, 0);
    }

    #[test]
    fn test_update_after_delete_resurrects_as_update() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::delete("n1"));
        queue.enqueue(NewAction::create("n1", json!({"title": "back"})));

        let action = queue.get(&EntityId::from("n1")).unwrap();
        assert_eq!(action.operation, Operation::Update);
        assert_eq!(action.payload, json!({"title": "back"}));
    }

    #[test]
    fn test_same_operation_keeps_attempts() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::update("n1", json!({})));
        queue.record_attempt(&EntityId::from("n1"));
        queue.enqueue(NewAction::update("n1", json!({"n": 1})));
        assert_eq!(queue.get(&EntityId::from("n1")).unwrap().attempts, 1);
    }

    #[test]
    fn test_dequeue_is_idempotent() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::create("n1", json!({})));

        assert!(queue.dequeue(&EntityId::from("n1")));
        assert!(!queue.dequeue(&EntityId::from("n1")));
        assert!(!queue.dequeue(&EntityId::from("never-queued")));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_complete_rebases_when_edited_in_flight() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::create("n1", json!({"title": "a"})));
        let in_flight = queue.get(&EntityId::from("n1")).unwrap();
        queue.enqueue(NewAction::update("n1", json!({"title": "b"})));

        let outcome = queue.complete(
            &in_flight.id,
            in_flight.revision,
            Some(&VersionMarker::from("v1")),
        );
        assert_eq!(outcome, CompleteOutcome::Rebased);

        let action = queue.get(&EntityId::from("n1")).unwrap();
        assert_eq!(action.operation, Operation::Update);
        assert_eq!(action.base_version, Some(VersionMarker::from("v1")));
        assert_eq!(action.payload, json!({"title": "b"}));

        let outcome = queue.complete(&action.id, action.revision, None);
        assert_eq!(outcome, CompleteOutcome::Removed);
        assert_eq!(
            queue.complete(&action.id, action.revision, None),
            CompleteOutcome::Missing
        );
    }

    #[test]
    fn test_queue_survives_reopen_and_clears_conflicts() {
        let (store, queue) = queue();
        queue.enqueue(NewAction::create("a", json!({})));
        queue.enqueue(NewAction::update("b", json!({})).with_base_version("v1"));
        queue.mark_conflicted(&EntityId::from("b"));
        assert!(queue.has_drainable());
        drop(queue);

        let reopened = ActionQueue::open(store).unwrap();
        assert_eq!(ids(&reopened), vec!["a", "b"]);
        assert!(!reopened.get(&EntityId::from("b")).unwrap().conflicted);

        reopened.enqueue(NewAction::create("c", json!({})));
        assert_eq!(ids(&reopened), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_conflicted_entries_are_not_drainable() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::update("n1", json!({})));
        queue.mark_conflicted(&EntityId::from("n1"));
        assert!(!queue.has_drainable());
        assert_eq!(queue.size(), 1);

        assert!(queue.force_next(&EntityId::from("n1")));
        let action = queue.get(&EntityId::from("n1")).unwrap();
        assert!(action.force);
        assert!(!action.conflicted);
    }

    #[test]
    fn test_force_next_turns_create_into_update() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::create("n1", json!({"title": "mine"})));
        queue.mark_conflicted(&EntityId::from("n1"));

        assert!(queue.force_next(&EntityId::from("n1")));
        let action = queue.get(&EntityId::from("n1")).unwrap();
        assert_eq!(action.operation, Operation::Update);
        assert_eq!(action.payload, json!({"title": "mine"}));
        assert!(action.force);
        assert!(queue.has_drainable());
    }

    #[test]
    fn test_replace_payload_turns_entry_into_update() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::update("n1", json!({"title": "mine"})).with_base_version("v1"));
        queue.mark_conflicted(&EntityId::from("n1"));

        let outcome = queue.replace_payload(
            &EntityId::from("n1"),
            json!({"title": "merged"}),
            Some(VersionMarker::from("v2")),
        );
        assert_eq!(outcome, EnqueueOutcome::Replaced);
        let action = queue.get(&EntityId::from("n1")).unwrap();
        assert_eq!(action.payload, json!({"title": "merged"}));
        assert_eq!(action.base_version, Some(VersionMarker::from("v2")));
        assert!(!action.conflicted);
    }

    #[test]
    fn test_discard_respects_newer_edits() {
        let (_, queue) = queue();
        queue.enqueue(NewAction::create("n1", json!("bad")));
        let stale = queue.get(&EntityId::from("n1")).unwrap();
        queue.enqueue(NewAction::create("n1", json!({"title": "fixed"})));

        assert!(!queue.discard(&stale.id, stale.revision));
        assert_eq!(queue.size(), 1);
        assert!(queue.discard(&stale.id, stale.revision + 1));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_survives_unavailable_store() {
        let (store, queue) = queue();
        store.set_available(false);
        assert_eq!(
            queue.enqueue(NewAction::create("n1", json!({}))),
            EnqueueOutcome::Inserted
        );
        assert_eq!(queue.size(), 1);

        store.set_available(true);
        queue.enqueue(NewAction::create("n2", json!({})));
        let reopened = ActionQueue::open(store).unwrap();
        assert_eq!(ids(&reopened), vec!["n1", "n2"]);
    }
}
