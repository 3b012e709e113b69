//! Applies a caller's conflict resolution to the queue and the cache.
//!
//! Pure mechanism: which resolution to offer or default to is up to the UI.

use std::sync::Arc;

use crate::cache::{CacheStore, PutOptions};
use crate::error::{Error, Result};
use crate::models::{CacheKey, Conflict, EntityId, NewAction, Resolution, SyncStatusKind};
use crate::queue::ActionQueue;
use crate::status::StatusHandle;

#[derive(Debug, Clone)]
pub struct ConflictResolver {
    queue: Arc<ActionQueue>,
    cache: Arc<CacheStore>,
    status: StatusHandle,
}

impl ConflictResolver {
    pub const fn new(queue: Arc<ActionQueue>, cache: Arc<CacheStore>, status: StatusHandle) -> Self {
        Self {
            queue,
            cache,
            status,
        }
    }

    /// Resolve the open conflict for `id`, returning the conflict removed
    pub fn resolve(&self, id: &EntityId, resolution: Resolution) -> Result<Conflict> {
        let conflict = self
            .status
            .snapshot()
            .conflict_for(id)
            .cloned()
            .ok_or_else(|| Error::ConflictNotFound(id.to_string()))?;

        match resolution {
            Resolution::UseLocal => self.use_local(&conflict),
            Resolution::UseRemote => self.use_remote(&conflict),
            Resolution::Merge { payload } => {
                if !payload.is_object() {
                    return Err(Error::InvalidInput(format!(
                        "merged payload for {id} must be a JSON object"
                    )));
                }
                self.merge(&conflict, payload);
            }
        }

        let pending = self.queue.size();
        self.status.update(|status| {
            status.remove_conflict(id);
            status.pending_changes = pending;
            if !status.has_conflicts() && status.status == SyncStatusKind::Conflict {
                status.status = SyncStatusKind::Idle;
            }
        });
        Ok(conflict)
    }

    fn use_local(&self, conflict: &Conflict) {
        let id = &conflict.entity_id;
        if !self.queue.force_next(id) {
            // Queue entry is gone (cleared or dequeued); push the local side again
            let local = &conflict.local_version;
            let action = if local.payload.is_null() {
                NewAction::delete(id.clone())
            } else {
                NewAction::update(id.clone(), local.payload.clone())
            };
            self.queue.enqueue(action);
            self.queue.force_next(id);
        }

        let remote = &conflict.remote_version;
        if remote.version.is_some() {
            let confirmed = self.cache.writer().confirm(
                CacheKey::from(id),
                remote.payload.clone(),
                remote.version.clone(),
            );
            if let Err(error) = confirmed {
                tracing::warn!("Failed to record remote copy of {}: {}", id, error);
            }
        }
        tracing::info!("Conflict on {} resolved with the local version", id);
    }

    fn use_remote(&self, conflict: &Conflict) {
        let id = &conflict.entity_id;
        self.queue.dequeue(id);

        let key = CacheKey::from(id);
        let remote = &conflict.remote_version;
        let cached = if remote.version.is_some() {
            self.cache
                .put(
                    key,
                    remote.payload.clone(),
                    PutOptions::synced(remote.version.clone()),
                )
                .map(drop)
        } else {
            self.cache.evict(&key).map(drop)
        };
        if let Err(error) = cached {
            tracing::warn!("Failed to cache remote version of {}: {}", id, error);
        }
        tracing::info!("Conflict on {} resolved with the remote version", id);
    }

    fn merge(&self, conflict: &Conflict, payload: serde_json::Value) {
        let id = &conflict.entity_id;
        let remote = &conflict.remote_version;
        self.queue
            .replace_payload(id, payload.clone(), remote.version.clone());

        let key = CacheKey::from(id);
        let mut cache = self.cache.writer();
        let staged = if remote.version.is_some() {
            cache
                .put(
                    key.clone(),
                    remote.payload.clone(),
                    PutOptions::synced(remote.version.clone()),
                )
                .and_then(|_| cache.stage(key, payload))
        } else {
            cache.evict(&key).and_then(|_| cache.stage(key, payload))
        };
        if let Err(error) = staged {
            tracing::warn!("Failed to stage merged {}: {}", id, error);
        }
        tracing::info!("Conflict on {} resolved with a merged payload", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictType, EntityVersion, Operation, VersionMarker};
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    struct Fixture {
        queue: Arc<ActionQueue>,
        cache: Arc<CacheStore>,
        status: StatusHandle,
        resolver: ConflictResolver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(ActionQueue::open(store.clone()).unwrap());
        let cache = Arc::new(CacheStore::open(store, 1 << 20).unwrap());
        let status = StatusHandle::new();
        let resolver = ConflictResolver::new(Arc::clone(&queue), Arc::clone(&cache), status.clone());
        Fixture {
            queue,
            cache,
            status,
            resolver,
        }
    }

    /// Queue a conflicted local edit of `n1` against remote `v2`
    fn conflicted(fixture: &Fixture, remote_payload: Value, remote_version: Option<&str>) {
        let id = EntityId::from("n1");
        fixture
            .queue
            .enqueue(NewAction::update("n1", json!({"title": "local"})).with_base_version("v1"));
        fixture.queue.mark_conflicted(&id);
        fixture.cache.stage(CacheKey::from("n1"), json!({"title": "local"})).unwrap();
        fixture.status.update(|status| {
            status.status = SyncStatusKind::Conflict;
            status.pending_changes = 1;
            status.upsert_conflict(Conflict {
                entity_id: id,
                local_version: EntityVersion {
                    payload: json!({"title": "local"}),
                    version: Some(VersionMarker::from("v1")),
                },
                remote_version: EntityVersion {
                    payload: remote_payload,
                    version: remote_version.map(VersionMarker::from),
                },
                conflict_type: ConflictType::ConcurrentModification,
                detected_at: 0,
            });
        });
    }

    #[test]
    fn test_use_remote_drops_local_change() {
        let fixture = fixture();
        conflicted(&fixture, json!({"title": "remote"}), Some("v2"));

        fixture
            .resolver
            .resolve(&EntityId::from("n1"), Resolution::UseRemote)
            .unwrap();

        assert!(fixture.queue.is_empty());
        let entry = fixture.cache.get(&CacheKey::from("n1")).unwrap();
        assert!(entry.synced);
        assert_eq!(entry.content, json!({"title": "remote"}));
        assert_eq!(entry.version, Some(VersionMarker::from("v2")));

        let status = fixture.status.snapshot();
        assert!(status.conflicts.is_empty());
        assert_eq!(status.status, SyncStatusKind::Idle);
        assert_eq!(status.pending_changes, 0);
    }

    #[test]
    fn test_use_remote_after_remote_delete_evicts() {
        let fixture = fixture();
        conflicted(&fixture, Value::Null, None);

        fixture
            .resolver
            .resolve(&EntityId::from("n1"), Resolution::UseRemote)
            .unwrap();
        assert!(fixture.cache.get(&CacheKey::from("n1")).is_none());
    }

    #[test]
    fn test_use_local_forces_next_write() {
        let fixture = fixture();
        conflicted(&fixture, json!({"title": "remote"}), Some("v2"));

        fixture
            .resolver
            .resolve(&EntityId::from("n1"), Resolution::UseLocal)
            .unwrap();

        let action = fixture.queue.get(&EntityId::from("n1")).unwrap();
        assert!(action.force);
        assert!(!action.conflicted);
        assert_eq!(action.payload, json!({"title": "local"}));
        assert_eq!(fixture.status.snapshot().pending_changes, 1);

        let entry = fixture.cache.get(&CacheKey::from("n1")).unwrap();
        assert!(!entry.synced);
        assert_eq!(entry.confirmed.unwrap().content, json!({"title": "remote"}));
    }

    #[test]
    fn test_merge_queues_update_on_remote_version() {
        let fixture = fixture();
        conflicted(&fixture, json!({"title": "remote"}), Some("v2"));

        fixture
            .resolver
            .resolve(
                &EntityId::from("n1"),
                Resolution::Merge {
                    payload: json!({"title": "local + remote"}),
                },
            )
            .unwrap();

        let action = fixture.queue.get(&EntityId::from("n1")).unwrap();
        assert_eq!(action.operation, Operation::Update);
        assert_eq!(action.base_version, Some(VersionMarker::from("v2")));
        assert_eq!(action.payload, json!({"title": "local + remote"}));

        let entry = fixture.cache.get(&CacheKey::from("n1")).unwrap();
        assert_eq!(entry.content, json!({"title": "local + remote"}));
        assert_eq!(entry.confirmed.unwrap().content, json!({"title": "remote"}));
    }

    #[test]
    fn test_unknown_conflict_is_an_error() {
        let fixture = fixture();
        let error = fixture
            .resolver
            .resolve(&EntityId::from("missing"), Resolution::UseLocal)
            .unwrap_err();
        assert!(matches!(error, Error::ConflictNotFound(id) if id == "missing"));
    }

    #[test]
    fn test_invalid_merge_payload_keeps_conflict() {
        let fixture = fixture();
        conflicted(&fixture, json!({"title": "remote"}), Some("v2"));

        let error = fixture
            .resolver
            .resolve(
                &EntityId::from("n1"),
                Resolution::Merge {
                    payload: json!("not an object"),
                },
            )
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(fixture.status.snapshot().conflicts.len(), 1);
    }
}
