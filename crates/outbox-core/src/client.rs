//! Composition root.
//!
//! [`SyncClient`] owns the queue, cache, network monitor, engine, resolver
//! and the process-wide status, and is the only surface front ends use.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::engine::{DrainResult, SyncEngine};
use crate::error::{Error, Result};
use crate::models::{
    CacheEntry, CacheFilter, CacheKey, CacheSize, Conflict, EntityId, NewAction, Operation,
    QueuedAction, Resolution, SyncStatus,
};
use crate::network::{ConnectivityProbe, NetworkMonitor};
use crate::queue::{ActionQueue, EnqueueOutcome};
use crate::remote::RemoteApi;
use crate::resolver::ConflictResolver;
use crate::status::{OutboxStatus, StatusAggregator, StatusHandle};
use crate::storage::KeyValueStore;
use crate::subscription::Subscription;

/// Background work started by [`SyncClient::start_background`].
///
/// Dropping it (or calling [`BackgroundTasks::shutdown`]) stops every task
/// and cancels a pending retry.
#[must_use = "background tasks stop when this value is dropped"]
#[derive(Debug)]
pub struct BackgroundTasks {
    tasks: Vec<Subscription>,
}

impl BackgroundTasks {
    pub fn shutdown(self) {
        tracing::debug!("Stopping {} background task(s)", self.tasks.len());
        drop(self);
    }
}

/// Offline-first sync client
pub struct SyncClient<R: RemoteApi> {
    config: SyncConfig,
    queue: Arc<ActionQueue>,
    cache: Arc<CacheStore>,
    network: NetworkMonitor,
    status: StatusHandle,
    engine: SyncEngine<R>,
    resolver: ConflictResolver,
    aggregator: StatusAggregator,
}

impl<R: RemoteApi> std::fmt::Debug for SyncClient<R> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncClient")
            .field("queue", &self.queue)
            .field("cache", &self.cache)
            .field("network", &self.network)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl<R: RemoteApi> SyncClient<R> {
    /// Open the queue and cache from `store` and take the first network sample.
    ///
    /// Fails only when the configuration is invalid or the store cannot be read.
    pub async fn initialize(
        config: SyncConfig,
        store: Arc<dyn KeyValueStore>,
        remote: Arc<R>,
        probe: impl ConnectivityProbe,
    ) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(ActionQueue::open(Arc::clone(&store))?);
        let cache = Arc::new(CacheStore::open(store, config.cache_quota_bytes)?);
        let network = NetworkMonitor::new(probe, config.quality.clone());
        let initial = network.start().await;

        let status = StatusHandle::new();
        let pending = queue.size();
        status.update(|status| status.pending_changes = pending);

        let engine = SyncEngine::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            remote,
            network.clone(),
            status.clone(),
            &config,
        );
        let resolver = ConflictResolver::new(Arc::clone(&queue), Arc::clone(&cache), status.clone());
        let aggregator = StatusAggregator::new(network.clone(), status.clone(), config.debounce());

        tracing::info!(
            "Sync client ready: {} pending, {} cached, {}",
            pending,
            cache.size().count,
            if initial.is_online { "online" } else { "offline" }
        );

        Ok(Self {
            config,
            queue,
            cache,
            network,
            status,
            engine,
            resolver,
            aggregator,
        })
    }

    /// Queue a mutation and apply it optimistically to the cache.
    ///
    /// Never waits on the network. When online, a drain starts in the
    /// background.
    pub fn enqueue(&self, mut action: NewAction) -> Result<EnqueueOutcome> {
        if action.id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("entity id must not be empty".to_string()));
        }

        let key = CacheKey::from(&action.id);
        if action.base_version.is_none() {
            action.base_version = self.cache.get(&key).and_then(|entry| entry.version);
        }
        if matches!(action.operation, Operation::Create | Operation::Update) {
            if let Err(error) = self.cache.stage(key, action.payload.clone()) {
                tracing::warn!("Queued {} but could not cache it: {}", action.id, error);
                let message = format!("{} is queued but not cached offline: {error}", action.id);
                self.status.update(|status| status.last_error = Some(message));
            }
        }

        let operation = action.operation;
        let id = action.id.clone();
        let outcome = self.queue.enqueue(action);
        self.refresh_pending();
        tracing::debug!("Enqueued {} {} ({:?})", operation, id, outcome);

        if self.config.drain_on_enqueue && self.network.is_online() {
            self.engine.request_drain();
        }
        Ok(outcome)
    }

    /// Drain now, or join the drain already running
    pub async fn force_sync(&self) -> DrainResult {
        self.engine.drain().await
    }

    pub fn resolve_conflict(&self, id: &EntityId, resolution: Resolution) -> Result<Conflict> {
        let conflict = self.resolver.resolve(id, resolution)?;
        if self.network.is_online() && self.queue.has_drainable() {
            self.engine.request_drain();
        }
        Ok(conflict)
    }

    /// Drop every cached entry; queued actions are kept
    pub fn clear_cache(&self) -> Result<usize> {
        Ok(self.cache.clear()?)
    }

    /// Forget everything (logout): in-flight results are discarded, retries
    /// cancelled, queue and cache emptied and status reset.
    pub fn clear_all_data(&self) -> Result<()> {
        self.engine.cancel();
        self.queue.clear();
        let cleared = self.cache.clear();
        self.status.replace(SyncStatus::default());
        cleared?;
        tracing::info!("Cleared all offline data");
        Ok(())
    }

    pub fn status(&self) -> OutboxStatus {
        self.aggregator.snapshot()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.status.snapshot()
    }

    pub const fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub const fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    pub fn remote(&self) -> &R {
        self.engine.remote()
    }

    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Debounced status updates; see [`StatusAggregator::subscribe`]
    pub fn subscribe(&self, callback: impl Fn(&OutboxStatus) + Send + Sync + 'static) -> Subscription {
        self.aggregator.subscribe(callback)
    }

    pub fn cached(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.cache.get(key)
    }

    pub fn cache_entries(&self, filter: CacheFilter) -> impl Iterator<Item = CacheEntry> {
        self.cache.list(filter)
    }

    pub fn cache_size(&self) -> CacheSize {
        self.cache.size()
    }

    /// Pending actions in drain order
    pub fn queued(&self) -> Vec<QueuedAction> {
        self.queue.peek_all()
    }

    /// Start the periodic and reconnect drains, plus probe polling when
    /// `poll_interval` is set (platforms without connectivity events).
    pub fn start_background(&self, poll_interval: Option<Duration>) -> BackgroundTasks {
        let mut tasks = vec![Subscription::from_task(self.engine.spawn_background())];
        if let Some(interval) = poll_interval {
            tasks.push(Subscription::from_task(self.network.spawn_polling(interval)));
        }
        let engine = self.engine.clone();
        tasks.push(Subscription::new(move || {
            engine.cancel_retry();
        }));
        BackgroundTasks { tasks }
    }

    fn refresh_pending(&self) {
        let pending = self.queue.size();
        self.status.update(|status| status.pending_changes = pending);
    }
}
