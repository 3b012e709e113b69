//! Sync engine: drains the action queue against the remote API.
//!
//! One pass runs at a time. Callers that arrive while a pass is in flight
//! wait for it and receive its result. Passes run on their own task, so a
//! caller that gives up does not abort the pass. Status transitions happen
//! once per pass; only `pending_changes` moves item by item.

mod backoff;
mod generation;
mod scheduler;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use backoff::Backoff;
pub use generation::Generation;
pub use scheduler::RetryScheduler;

use crate::cache::{CacheStore, PutOptions};
use crate::config::SyncConfig;
use crate::models::{
    CacheKey, Conflict, ConflictType, EntityVersion, Operation, QueuedAction, SyncStatusKind,
    VersionMarker,
};
use crate::network::NetworkMonitor;
use crate::queue::{ActionQueue, CompleteOutcome};
use crate::remote::{RemoteApi, RemoteEntity, RemoteError, RemoteResult};
use crate::status::StatusHandle;
use crate::util::unix_millis_now;

/// Summary of one drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainResult {
    pub success_count: usize,
    /// Transient failures left queued for retry
    pub error_count: usize,
    pub conflict_count: usize,
    /// Actions dropped because they can never succeed
    pub dead_lettered: usize,
    /// Actions held back by an unresolved conflict
    pub skipped_conflicted: usize,
    /// Nothing was attempted because the network is offline
    pub skipped_offline: bool,
    /// Results were discarded after a clear
    pub cancelled: bool,
    /// Status at the end of the pass
    pub status: SyncStatusKind,
    /// Delay until the scheduled retry, if one was scheduled
    pub next_retry_in_ms: Option<u64>,
    pub last_error: Option<String>,
}

impl DrainResult {
    fn aborted() -> Self {
        Self {
            cancelled: true,
            last_error: Some("drain task ended without a result".to_string()),
            ..Self::default()
        }
    }

    pub const fn attempted(&self) -> usize {
        self.success_count + self.error_count + self.conflict_count + self.dead_lettered
    }
}

/// What happened to one queued action
enum ItemOutcome {
    Applied(Option<VersionMarker>),
    Conflict(Conflict),
    Failed(RemoteError),
}

#[derive(Default)]
struct InFlight {
    receiver: Option<watch::Receiver<Option<DrainResult>>>,
    /// Someone asked for a drain while the pass was already past its snapshot
    rerun: bool,
}

struct EngineInner<R> {
    queue: Arc<ActionQueue>,
    cache: Arc<CacheStore>,
    remote: Arc<R>,
    network: NetworkMonitor,
    status: StatusHandle,
    backoff: Backoff,
    request_timeout: Duration,
    drain_interval: Duration,
    generation: Generation,
    in_flight: Mutex<InFlight>,
    retry: RetryScheduler,
}

/// Drains the queue; clones share the same single-flight state
pub struct SyncEngine<R: RemoteApi> {
    inner: Arc<EngineInner<R>>,
}

impl<R: RemoteApi> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteApi> std::fmt::Debug for SyncEngine<R> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncEngine")
            .field("processing", &self.is_processing())
            .field("generation", &self.inner.generation.current())
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight slot however the pass task ends
struct InFlightGuard<R: RemoteApi> {
    engine: Option<SyncEngine<R>>,
}

impl<R: RemoteApi> InFlightGuard<R> {
    /// Release normally; returns whether a follow-up pass was requested
    fn release(mut self) -> bool {
        self.engine
            .take()
            .is_some_and(|engine| engine.release_in_flight())
    }
}

impl<R: RemoteApi> Drop for InFlightGuard<R> {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.release_in_flight();
        }
    }
}

impl<R: RemoteApi> SyncEngine<R> {
    pub fn new(
        queue: Arc<ActionQueue>,
        cache: Arc<CacheStore>,
        remote: Arc<R>,
        network: NetworkMonitor,
        status: StatusHandle,
        config: &SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                queue,
                cache,
                remote,
                network,
                status,
                backoff: Backoff::from_config(config),
                request_timeout: config.request_timeout(),
                drain_interval: config.drain_interval(),
                generation: Generation::new(),
                in_flight: Mutex::new(InFlight::default()),
                retry: RetryScheduler::new(),
            }),
        }
    }

    /// Run a pass, or join the one in flight, and return its result
    pub async fn drain(&self) -> DrainResult {
        let mut receiver = self.start_pass(false);
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(result) = current {
                return result;
            }
            if receiver.changed().await.is_err() {
                return DrainResult::aborted();
            }
        }
    }

    /// Start a pass in the background.
    ///
    /// When a pass is already running, another one follows it so work
    /// queued after its snapshot is not left for the periodic timer.
    pub fn request_drain(&self) {
        drop(self.start_pass(true));
    }

    pub fn is_processing(&self) -> bool {
        self.lock_in_flight().receiver.is_some()
    }

    /// Discard the effects of in-flight work and stop pending retries
    pub fn cancel(&self) {
        let generation = self.inner.generation.bump();
        self.inner.retry.cancel();
        tracing::info!("Sync cancelled (generation {})", generation);
    }

    /// Drop the scheduled retry without touching in-flight work
    pub fn cancel_retry(&self) -> bool {
        self.inner.retry.cancel()
    }

    pub fn retry_scheduled(&self) -> bool {
        self.inner.retry.is_scheduled()
    }

    pub fn generation(&self) -> &Generation {
        &self.inner.generation
    }

    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    /// Drain on every offline to online transition, and on a timer while
    /// work is queued and no backoff is pending.
    pub fn spawn_background(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let mut network = self.inner.network.watch();
        let interval = self.inner.drain_interval;
        let mut was_online = network.borrow_and_update().is_online;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = network.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = network.borrow_and_update().is_online;
                        if online && !was_online {
                            tracing::info!("Connectivity restored, draining queue");
                            engine.request_drain();
                        }
                        was_online = online;
                    }
                    _ = ticker.tick() => {
                        if engine.should_drain_periodically() {
                            tracing::debug!("Periodic drain");
                            engine.request_drain();
                        }
                    }
                }
            }
        })
    }

    /// Scheduled retry fired. Offline, the next online transition drains
    /// instead, so the advertised retry time is dropped.
    fn retry_due(&self) {
        if self.inner.network.is_online() {
            self.request_drain();
            return;
        }
        tracing::debug!("Retry due while offline; waiting for connectivity");
        self.inner
            .status
            .update_if(|status| status.next_retry_at.take().is_some());
    }

    fn should_drain_periodically(&self) -> bool {
        if !self.inner.network.is_online() || !self.inner.queue.has_drainable() {
            return false;
        }
        let status = self.inner.status.snapshot();
        status.retry_count == 0 && !status.retry_exhausted
    }

    fn start_pass(&self, follow_up: bool) -> watch::Receiver<Option<DrainResult>> {
        let mut in_flight = self.lock_in_flight();
        if let Some(receiver) = in_flight.receiver.clone() {
            in_flight.rerun |= follow_up;
            return receiver;
        }

        let (sender, receiver) = watch::channel(None);
        in_flight.receiver = Some(receiver.clone());
        drop(in_flight);

        let engine = self.clone();
        tokio::spawn(async move {
            let guard = InFlightGuard {
                engine: Some(engine.clone()),
            };
            let result = engine.run_pass().await;
            let follow_up = guard.release()
                && result.error_count == 0
                && !result.cancelled
                && !result.skipped_offline
                && engine.inner.queue.has_drainable();
            sender.send_replace(Some(result));
            if follow_up {
                engine.request_drain();
            }
        });
        receiver
    }

    fn release_in_flight(&self) -> bool {
        let mut in_flight = self.lock_in_flight();
        in_flight.receiver = None;
        std::mem::take(&mut in_flight.rerun)
    }

    async fn run_pass(&self) -> DrainResult {
        let inner = &self.inner;
        let generation = inner.generation.current();
        let cache_generation = inner.cache.generation();

        if !inner.network.is_online() {
            tracing::debug!("Skipping drain: offline");
            return DrainResult {
                skipped_offline: true,
                status: inner.status.snapshot().status,
                ..DrainResult::default()
            };
        }

        let actions = inner.queue.peek_all();
        inner.retry.cancel();
        inner.status.update(|status| {
            status.status = SyncStatusKind::Syncing;
            status.next_retry_at = None;
        });
        tracing::debug!("Draining {} queued action(s)", actions.len());

        let mut result = DrainResult::default();
        let mut conflicts = Vec::new();
        for snapshot in actions {
            if !inner.generation.is_current(generation) {
                result.cancelled = true;
                break;
            }
            // The entry may have been coalesced or removed since the snapshot
            let Some(action) = inner.queue.get(&snapshot.id) else {
                continue;
            };
            if action.conflicted {
                result.skipped_conflicted += 1;
                continue;
            }

            if let Err(reason) = action.validate() {
                self.dead_letter(&action, cache_generation, &reason);
                result.dead_lettered += 1;
                result.last_error = Some(reason);
                self.refresh_pending();
                continue;
            }

            let outcome = self.apply(&action).await;
            if !inner.generation.is_current(generation) {
                tracing::debug!("Discarding result for {}: sync was cancelled", action.id);
                result.cancelled = true;
                break;
            }

            match outcome {
                ItemOutcome::Applied(version) => {
                    self.commit(&action, version, cache_generation);
                    result.success_count += 1;
                }
                ItemOutcome::Conflict(conflict) => {
                    tracing::warn!(
                        "Conflict on {}: remote is at {}",
                        action.id,
                        conflict
                            .remote_version
                            .version
                            .as_ref()
                            .map_or("deleted", VersionMarker::as_str)
                    );
                    inner.queue.mark_conflicted(&action.id);
                    conflicts.push(conflict);
                    result.conflict_count += 1;
                }
                ItemOutcome::Failed(error) if error.is_transient() => {
                    let attempts = inner.queue.record_attempt(&action.id).unwrap_or_default();
                    tracing::warn!(
                        "Sync of {} {} failed (attempt {}): {}",
                        action.operation,
                        action.id,
                        attempts,
                        error
                    );
                    result.error_count += 1;
                    result.last_error = Some(error.to_string());
                }
                ItemOutcome::Failed(error) => {
                    let reason = error.to_string();
                    self.dead_letter(&action, cache_generation, &reason);
                    result.dead_lettered += 1;
                    result.last_error = Some(reason);
                }
            }
            self.refresh_pending();
        }

        if result.cancelled {
            return result;
        }
        self.finish_pass(result, conflicts, generation)
    }

    /// Issue the remote calls for one action
    async fn apply(&self, action: &QueuedAction) -> ItemOutcome {
        let remote = self.inner.remote.as_ref();
        let id = &action.id;
        match action.operation {
            Operation::Create => self.create(action).await,
            Operation::Update => {
                let current = match self.call(remote.read(id)).await {
                    Ok(current) => current,
                    Err(error) => return ItemOutcome::Failed(error),
                };
                let Some(current) = current else {
                    // Deleted elsewhere after the edit was based on it
                    if action.base_version.is_some() && !action.force {
                        return ItemOutcome::Conflict(conflict_for(action, None));
                    }
                    tracing::debug!("{} is missing remotely, creating it", id);
                    return self.create(action).await;
                };

                let expected = match action.base_version.as_ref() {
                    Some(base) if !action.force => {
                        if &current.version != base {
                            return if current.payload == action.payload {
                                ItemOutcome::Applied(Some(current.version))
                            } else {
                                ItemOutcome::Conflict(conflict_for(action, Some(current)))
                            };
                        }
                        base
                    }
                    _ => &current.version,
                };

                match self.call(remote.update(id, &action.payload, Some(expected))).await {
                    Ok(version) => ItemOutcome::Applied(Some(version)),
                    Err(RemoteError::Conflict { .. }) => self.conflict_with_remote(action).await,
                    Err(error) => ItemOutcome::Failed(error),
                }
            }
            Operation::Delete => match self.call(remote.delete(id)).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => ItemOutcome::Applied(None),
                Err(RemoteError::Conflict { .. }) => self.conflict_with_remote(action).await,
                Err(error) => ItemOutcome::Failed(error),
            },
            Operation::Unknown => ItemOutcome::Failed(RemoteError::Validation(format!(
                "unknown operation queued for {id}"
            ))),
        }
    }

    async fn create(&self, action: &QueuedAction) -> ItemOutcome {
        match self
            .call(self.inner.remote.create(&action.id, &action.payload))
            .await
        {
            Ok(version) => ItemOutcome::Applied(Some(version)),
            Err(RemoteError::Conflict { .. }) => self.conflict_with_remote(action).await,
            Err(error) => ItemOutcome::Failed(error),
        }
    }

    /// Turn a refused write into a conflict against what the remote holds now.
    ///
    /// A remote that already holds exactly our payload (an earlier attempt
    /// landed but its response was lost) counts as applied.
    async fn conflict_with_remote(&self, action: &QueuedAction) -> ItemOutcome {
        match self.call(self.inner.remote.read(&action.id)).await {
            Ok(Some(current)) if current.payload == action.payload => {
                ItemOutcome::Applied(Some(current.version))
            }
            Ok(current) => ItemOutcome::Conflict(conflict_for(action, current)),
            Err(error) => ItemOutcome::Failed(error),
        }
    }

    async fn call<T>(&self, request: impl Future<Output = RemoteResult<T>> + Send) -> RemoteResult<T> {
        tokio::time::timeout(self.inner.request_timeout, request)
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }

    /// Settle a confirmed write in the queue and the cache
    fn commit(&self, action: &QueuedAction, version: Option<VersionMarker>, cache_generation: u64) {
        let inner = &self.inner;
        let completion = inner.queue.complete(&action.id, action.revision, version.as_ref());
        tracing::debug!("Synced {} {} ({:?})", action.operation, action.id, completion);

        let Some(mut cache) = inner.cache.guarded(cache_generation) else {
            tracing::debug!("Cache was cleared during the drain; not caching {}", action.id);
            return;
        };
        let key = CacheKey::from(&action.id);
        let written = match (action.operation, completion) {
            (Operation::Delete, CompleteOutcome::Rebased) => Ok(()),
            (Operation::Delete, _) => cache.evict(&key).map(drop),
            (_, CompleteOutcome::Rebased) => cache
                .confirm(key, action.payload.clone(), version)
                .map(drop),
            _ => cache
                .put(key, action.payload.clone(), PutOptions::synced(version))
                .map(drop),
        };
        if let Err(error) = written {
            tracing::warn!("Failed to cache synced {}: {}", action.id, error);
        }
    }

    /// Drop an action that can never succeed and undo its optimistic write
    fn dead_letter(&self, action: &QueuedAction, cache_generation: u64, reason: &str) {
        tracing::error!(
            "Dead-lettering {} {}: {}",
            action.operation,
            action.id,
            reason
        );
        if !self.inner.queue.discard(&action.id, action.revision) {
            return;
        }
        if let Some(mut cache) = self.inner.cache.guarded(cache_generation) {
            if let Err(error) = cache.rollback(&CacheKey::from(&action.id)) {
                tracing::warn!("Failed to roll back cached {}: {}", action.id, error);
            }
        }
    }

    fn refresh_pending(&self) {
        let pending = self.inner.queue.size();
        self.inner
            .status
            .update_if(|status| std::mem::replace(&mut status.pending_changes, pending) != pending);
    }

    /// Publish the pass outcome in one status transition and schedule a retry
    fn finish_pass(&self, mut result: DrainResult, conflicts: Vec<Conflict>, generation: u64) -> DrainResult {
        let inner = &self.inner;
        let backoff = inner.backoff;
        let pending = inner.queue.size();
        let mut retry_in = None;

        let published = inner.status.update_if(|status| {
            if !inner.generation.is_current(generation) {
                return false;
            }
            for conflict in conflicts {
                status.upsert_conflict(conflict);
            }
            status.pending_changes = pending;

            if result.error_count > 0 {
                status.retry_count = status.retry_count.saturating_add(1);
                status.status = SyncStatusKind::Error;
                status.last_error.clone_from(&result.last_error);
                if backoff.is_exhausted(status.retry_count) {
                    status.retry_exhausted = true;
                    status.next_retry_at = None;
                } else {
                    let delay = backoff.delay_for(status.retry_count);
                    status.retry_exhausted = false;
                    status.next_retry_at = Some(unix_millis_now().saturating_add(millis(delay)));
                    retry_in = Some(delay);
                }
            } else {
                status.retry_count = 0;
                status.retry_exhausted = false;
                status.next_retry_at = None;
                if result.dead_lettered > 0 {
                    status.status = SyncStatusKind::Error;
                    status.last_error.clone_from(&result.last_error);
                } else if status.has_conflicts() {
                    status.status = SyncStatusKind::Conflict;
                } else if result.success_count > 0 {
                    status.status = SyncStatusKind::Success;
                    status.last_sync = Some(unix_millis_now());
                    status.last_error = None;
                } else {
                    status.status = SyncStatusKind::Idle;
                }
            }
            result.status = status.status;
            true
        });

        if !published {
            result.cancelled = true;
            return result;
        }

        let status = inner.status.snapshot();
        if let Some(delay) = retry_in {
            tracing::warn!(
                "Drain finished with {} error(s); retry {} of {} in {:?}",
                result.error_count,
                status.retry_count,
                backoff.max_retries(),
                delay
            );
            result.next_retry_in_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
            let engine = self.clone();
            inner.retry.schedule(delay, async move {
                engine.retry_due();
            });
        } else if status.retry_exhausted {
            tracing::error!(
                "Giving up automatic retries after {} failed drains; manual sync required",
                status.retry_count
            );
        } else {
            tracing::info!(
                "Drain finished: {} synced, {} conflict(s), {} dead-lettered, {} pending",
                result.success_count,
                result.conflict_count,
                result.dead_lettered,
                pending
            );
        }
        result
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, InFlight> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn conflict_for(action: &QueuedAction, remote: Option<RemoteEntity>) -> Conflict {
    Conflict {
        entity_id: action.id.clone(),
        local_version: EntityVersion {
            payload: action.payload.clone(),
            version: action.base_version.clone(),
        },
        remote_version: remote.map_or(
            EntityVersion {
                payload: Value::Null,
                version: None,
            },
            |remote| EntityVersion {
                payload: remote.payload,
                version: Some(remote.version),
            },
        ),
        conflict_type: ConflictType::ConcurrentModification,
        detected_at: unix_millis_now(),
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
