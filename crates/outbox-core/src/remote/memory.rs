//! In-process remote used by tests and the CLI demo.
//!
//! Keeps entities in a map with integer revisions (`v1`, `v2`, ...), records
//! every call in order and can be scripted to fail or stall.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;

use super::{RemoteApi, RemoteEntity, RemoteError, RemoteResult};
use crate::models::{EntityId, VersionMarker};

/// A call observed by [`MemoryRemote`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Create(EntityId),
    Read(EntityId),
    Update(EntityId),
    Delete(EntityId),
}

#[derive(Debug, Default)]
struct State {
    entities: HashMap<EntityId, (Value, u64)>,
    calls: Vec<RemoteCall>,
    failures: VecDeque<RemoteError>,
    latency: Option<Duration>,
}

/// Map-backed reference implementation of [`RemoteApi`]
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next write or read with `error` (queued, first in first out)
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().failures.push_back(error);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Write directly, as another device would; returns the new version
    pub fn put_remote(&self, id: impl Into<EntityId>, payload: Value) -> VersionMarker {
        let mut state = self.lock();
        let id = id.into();
        let revision = state.entities.get(&id).map_or(1, |(_, revision)| revision + 1);
        state.entities.insert(id, (payload, revision));
        version_marker(revision)
    }

    pub fn entity(&self, id: &EntityId) -> Option<RemoteEntity> {
        self.lock()
            .entities
            .get(id)
            .map(|(payload, revision)| RemoteEntity {
                payload: payload.clone(),
                version: version_marker(*revision),
            })
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Calls other than reads, in issue order
    pub fn writes(&self) -> Vec<RemoteCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| !matches!(call, RemoteCall::Read(_)))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Record the call and return the scripted failure or latency, if any.
    fn begin(&self, call: RemoteCall) -> (Option<RemoteError>, Option<Duration>) {
        let mut state = self.lock();
        state.calls.push(call);
        (state.failures.pop_front(), state.latency)
    }

    async fn enter(&self, call: RemoteCall) -> RemoteResult<()> {
        let (failure, latency) = self.begin(call);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        failure.map_or(Ok(()), Err)
    }
}

fn version_marker(revision: u64) -> VersionMarker {
    VersionMarker::new(format!("v{revision}"))
}

fn parse_revision(version: &VersionMarker) -> Option<u64> {
    version.as_str().strip_prefix('v')?.parse().ok()
}

impl RemoteApi for MemoryRemote {
    async fn create(&self, id: &EntityId, payload: &Value) -> RemoteResult<VersionMarker> {
        self.enter(RemoteCall::Create(id.clone())).await?;
        if !payload.is_object() {
            return Err(RemoteError::Validation(format!(
                "payload for {id} must be an object"
            )));
        }

        let mut state = self.lock();
        if let Some((_, revision)) = state.entities.get(id) {
            return Err(RemoteError::Conflict {
                current: Some(version_marker(*revision)),
            });
        }
        state.entities.insert(id.clone(), (payload.clone(), 1));
        Ok(version_marker(1))
    }

    async fn read(&self, id: &EntityId) -> RemoteResult<Option<RemoteEntity>> {
        self.enter(RemoteCall::Read(id.clone())).await?;
        Ok(self.entity(id))
    }

    async fn update(
        &self,
        id: &EntityId,
        payload: &Value,
        expected: Option<&VersionMarker>,
    ) -> RemoteResult<VersionMarker> {
        self.enter(RemoteCall::Update(id.clone())).await?;
        if !payload.is_object() {
            return Err(RemoteError::Validation(format!(
                "payload for {id} must be an object"
            )));
        }

        let mut state = self.lock();
        let Some((stored, revision)) = state.entities.get_mut(id) else {
            return Err(RemoteError::NotFound(id.clone()));
        };
        if let Some(expected) = expected {
            if parse_revision(expected) != Some(*revision) {
                return Err(RemoteError::Conflict {
                    current: Some(version_marker(*revision)),
                });
            }
        }
        *stored = payload.clone();
        *revision += 1;
        Ok(version_marker(*revision))
    }

    async fn delete(&self, id: &EntityId) -> RemoteResult<()> {
        self.enter(RemoteCall::Delete(id.clone())).await?;
        if self.lock().entities.remove(id).is_some() {
            Ok(())
        } else {
            Err(RemoteError::NotFound(id.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_update_is_version_checked() {
        let remote = MemoryRemote::new();
        let id = EntityId::from("n1");
        let v1 = remote.create(&id, &json!({"title": "a"})).await.unwrap();
        assert_eq!(v1.as_str(), "v1");

        let v2 = remote
            .update(&id, &json!({"title": "b"}), Some(&v1))
            .await
            .unwrap();
        assert_eq!(v2.as_str(), "v2");

        let stale = remote.update(&id, &json!({"title": "c"}), Some(&v1)).await;
        assert_eq!(stale, Err(RemoteError::Conflict { current: Some(v2) }));
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let remote = MemoryRemote::new();
        remote.fail_next(RemoteError::Timeout);
        let id = EntityId::from("n1");

        assert_eq!(
            remote.create(&id, &json!({})).await,
            Err(RemoteError::Timeout)
        );
        assert!(remote.create(&id, &json!({})).await.is_ok());
        assert_eq!(
            remote.calls(),
            vec![RemoteCall::Create(id.clone()), RemoteCall::Create(id)]
        );
    }

    #[tokio::test]
    async fn test_put_remote_bumps_revision() {
        let remote = MemoryRemote::new();
        assert_eq!(remote.put_remote("x", json!({})).as_str(), "v1");
        assert_eq!(remote.put_remote("x", json!({"n": 2})).as_str(), "v2");
        assert_eq!(
            remote.entity(&EntityId::from("x")).unwrap().payload,
            json!({"n": 2})
        );
        assert!(remote.delete(&EntityId::from("x")).await.is_ok());
        assert!(remote.is_empty());
    }
}
