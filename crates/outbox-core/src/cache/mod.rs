//! Offline-readable cache of entities and generated artifacts.
//!
//! Each entry is stored under its own key with an index of keys beside it.
//! Writes staged before remote confirmation are unsynced and keep the last
//! confirmed copy so they can be rolled back. Only synced entries are evicted
//! to make room; unsynced ones are data the remote has not seen yet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;

use crate::models::{CacheEntry, CacheFilter, CacheKey, CacheSize, ConfirmedContent, VersionMarker};
use crate::storage::{load_json, save_json, KeyValueStore, StorageError, StorageResult};
use crate::util::unix_millis_now;

/// Storage key of the list of cached keys
pub const CACHE_INDEX_KEY: &str = "outbox/cache/index";

fn entry_storage_key(key: &CacheKey) -> String {
    format!("outbox/cache/{key}")
}

/// Errors from cache writes
#[derive(Error, Debug)]
pub enum CacheError {
    /// Not enough evictable space; not retryable
    #[error("Cache quota exceeded writing {key}: needs {needed} bytes of {quota}")]
    QuotaExceeded {
        key: String,
        needed: usize,
        quota: usize,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Options for [`CacheWriter::put`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub synced: bool,
    pub version: Option<VersionMarker>,
}

impl PutOptions {
    pub const fn synced(version: Option<VersionMarker>) -> Self {
        Self {
            synced: true,
            version,
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    total_bytes: usize,
    last_timestamp: i64,
    generation: u64,
}

impl CacheState {
    /// Strictly increasing write clock so eviction order is total
    fn tick(&mut self) -> i64 {
        let now = unix_millis_now().max(self.last_timestamp + 1);
        self.last_timestamp = now;
        now
    }
}

/// Local cache with a byte quota
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    quota_bytes: usize,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CacheStore")
            .field("quota_bytes", &self.quota_bytes)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Load every indexed entry. Undecodable entries are skipped.
    pub fn open(store: Arc<dyn KeyValueStore>, quota_bytes: usize) -> StorageResult<Self> {
        let keys: Vec<CacheKey> = load_json(store.as_ref(), CACHE_INDEX_KEY)?.unwrap_or_default();

        let mut state = CacheState::default();
        for key in keys {
            let mut entry = match load_json::<CacheEntry>(store.as_ref(), &entry_storage_key(&key)) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(StorageError::Corrupt { key, message }) => {
                    tracing::warn!("Skipping corrupt cache entry {}: {}", key, message);
                    continue;
                }
                Err(error) => return Err(error),
            };
            if entry.size_bytes == 0 {
                entry.size_bytes = approximate_size(&entry.key, &entry.content);
            }
            state.total_bytes += entry.size_bytes;
            state.last_timestamp = state.last_timestamp.max(entry.timestamp);
            state.entries.insert(key, entry);
        }

        tracing::debug!(
            "Loaded {} cache entries ({} bytes)",
            state.entries.len(),
            state.total_bytes
        );

        Ok(Self {
            store,
            quota_bytes,
            state: Mutex::new(state),
        })
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Insert or overwrite an entry
    pub fn put(&self, key: CacheKey, content: Value, options: PutOptions) -> CacheResult<CacheEntry> {
        self.writer().put(key, content, options)
    }

    /// Optimistic unsynced write that keeps the confirmed copy for rollback
    pub fn stage(&self, key: CacheKey, content: Value) -> CacheResult<CacheEntry> {
        self.writer().stage(key, content)
    }

    /// Undo an unsynced write; returns the entry left behind, if any
    pub fn rollback(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        self.writer().rollback(key)
    }

    pub fn evict(&self, key: &CacheKey) -> CacheResult<bool> {
        self.writer().evict(key)
    }

    /// Entries matching `filter`, newest first.
    ///
    /// Iterates over a snapshot; call again to restart.
    pub fn list(&self, filter: CacheFilter) -> impl Iterator<Item = CacheEntry> {
        let mut snapshot: Vec<CacheEntry> = self
            .lock()
            .entries
            .values()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        snapshot.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
        snapshot.into_iter()
    }

    /// Remove every entry and invalidate writers holding the old generation
    pub fn clear(&self) -> CacheResult<usize> {
        let mut state = self.lock();
        state.generation += 1;
        let removed = state.entries.len();

        let mut first_error = None;
        for key in state.entries.keys() {
            if let Err(error) = self.store.delete(&entry_storage_key(key)) {
                tracing::error!("Failed to delete cache entry {}: {}", key, error);
                first_error.get_or_insert(error);
            }
        }
        if let Err(error) = self.store.delete(CACHE_INDEX_KEY) {
            first_error.get_or_insert(error);
        }
        state.entries.clear();
        state.total_bytes = 0;
        drop(state);

        tracing::info!("Cleared cache ({} entries)", removed);
        first_error.map_or(Ok(removed), |error| Err(error.into()))
    }

    pub fn size(&self) -> CacheSize {
        let state = self.lock();
        CacheSize {
            count: state.entries.len(),
            approximate_bytes: state.total_bytes,
        }
    }

    pub fn quota_bytes(&self) -> usize {
        self.quota_bytes
    }

    /// Bumped by every [`CacheStore::clear`]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Exclusive writer, or `None` when the cache was cleared since `generation`
    pub fn guarded(&self, generation: u64) -> Option<CacheWriter<'_>> {
        let writer = self.writer();
        (writer.state.generation == generation).then_some(writer)
    }

    /// Exclusive writer; holds the cache lock until dropped
    pub fn writer(&self) -> CacheWriter<'_> {
        CacheWriter {
            store: self.store.as_ref(),
            quota_bytes: self.quota_bytes,
            state: self.lock(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Write access to the cache under its lock
pub struct CacheWriter<'a> {
    store: &'a dyn KeyValueStore,
    quota_bytes: usize,
    state: MutexGuard<'a, CacheState>,
}

impl CacheWriter<'_> {
    pub fn put(&mut self, key: CacheKey, content: Value, options: PutOptions) -> CacheResult<CacheEntry> {
        let timestamp = self.state.tick();
        let size_bytes = approximate_size(&key, &content);
        self.write(CacheEntry {
            key,
            content,
            synced: options.synced,
            timestamp,
            version: options.version,
            confirmed: None,
            size_bytes,
        })
    }

    pub fn stage(&mut self, key: CacheKey, content: Value) -> CacheResult<CacheEntry> {
        let confirmed = match self.state.entries.get(&key) {
            Some(existing) if existing.synced => Some(ConfirmedContent {
                content: existing.content.clone(),
                version: existing.version.clone(),
            }),
            Some(existing) => existing.confirmed.clone(),
            None => None,
        };
        let timestamp = self.state.tick();
        let size_bytes = approximate_size(&key, &content)
            + confirmed
                .as_ref()
                .map_or(0, |confirmed| confirmed.content.to_string().len());
        self.write(CacheEntry {
            key,
            version: confirmed.as_ref().and_then(|confirmed| confirmed.version.clone()),
            content,
            synced: false,
            timestamp,
            confirmed,
            size_bytes,
        })
    }

    /// Record `content` at `version` as confirmed remotely.
    ///
    /// An unsynced entry keeps its newer local content and only moves its
    /// rollback point; otherwise the entry becomes a synced copy of `content`.
    pub fn confirm(
        &mut self,
        key: CacheKey,
        content: Value,
        version: Option<VersionMarker>,
    ) -> CacheResult<CacheEntry> {
        let pending = self
            .state
            .entries
            .get(&key)
            .filter(|entry| !entry.synced)
            .cloned();
        let Some(mut entry) = pending else {
            return self.put(key, content, PutOptions::synced(version));
        };

        entry.size_bytes = approximate_size(&entry.key, &entry.content) + content.to_string().len();
        entry.version.clone_from(&version);
        entry.confirmed = Some(ConfirmedContent { content, version });
        entry.timestamp = self.state.tick();
        self.write(entry)
    }

    pub fn rollback(&mut self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let Some(entry) = self.state.entries.get(key).cloned() else {
            return Ok(None);
        };
        if entry.synced {
            return Ok(Some(entry));
        }

        match entry.confirmed {
            Some(confirmed) => {
                tracing::debug!("Rolling back cache entry {} to confirmed content", key);
                self.put(
                    key.clone(),
                    confirmed.content,
                    PutOptions::synced(confirmed.version),
                )
                .map(Some)
            }
            None => {
                tracing::debug!("Rolling back never-synced cache entry {}", key);
                self.remove(key)?;
                Ok(None)
            }
        }
    }

    pub fn evict(&mut self, key: &CacheKey) -> CacheResult<bool> {
        if !self.state.entries.contains_key(key) {
            return Ok(false);
        }
        self.remove(key)?;
        Ok(true)
    }

    fn write(&mut self, entry: CacheEntry) -> CacheResult<CacheEntry> {
        let replaced_bytes = self
            .state
            .entries
            .get(&entry.key)
            .map_or(0, |existing| existing.size_bytes);
        let projected = self.state.total_bytes - replaced_bytes + entry.size_bytes;
        if projected > self.quota_bytes {
            let victims = self
                .plan_eviction(&entry.key, projected - self.quota_bytes)
                .ok_or_else(|| self.quota_error(&entry))?;
            for victim in victims {
                self.remove(&victim)?;
                tracing::info!("Evicted cache entry {} to stay within quota", victim);
            }
        }

        loop {
            match save_json(self.store, &entry_storage_key(&entry.key), &entry) {
                Ok(()) => break,
                Err(StorageError::QuotaExceeded { .. }) => {
                    let Some(victim) = self.oldest_synced(&entry.key) else {
                        return Err(self.quota_error(&entry));
                    };
                    self.remove(&victim)?;
                    tracing::info!("Evicted cache entry {} after storage reported full", victim);
                }
                Err(error) => return Err(error.into()),
            }
        }

        let previous = self.state.entries.insert(entry.key.clone(), entry.clone());
        self.state.total_bytes = self.state.total_bytes - replaced_bytes + entry.size_bytes;
        if previous.is_none() {
            self.persist_index();
        }
        Ok(entry)
    }

    /// Oldest synced entries (other than `keep`) freeing at least `overflow` bytes
    fn plan_eviction(&self, keep: &CacheKey, overflow: usize) -> Option<Vec<CacheKey>> {
        let mut candidates: Vec<&CacheEntry> = self
            .state
            .entries
            .values()
            .filter(|entry| entry.synced && &entry.key != keep)
            .collect();
        candidates.sort_by_key(|entry| entry.timestamp);

        let mut freed = 0;
        let mut victims = Vec::new();
        for entry in candidates {
            if freed >= overflow {
                break;
            }
            freed += entry.size_bytes;
            victims.push(entry.key.clone());
        }
        (freed >= overflow).then_some(victims)
    }

    fn oldest_synced(&self, keep: &CacheKey) -> Option<CacheKey> {
        self.state
            .entries
            .values()
            .filter(|entry| entry.synced && &entry.key != keep)
            .min_by_key(|entry| entry.timestamp)
            .map(|entry| entry.key.clone())
    }

    fn quota_error(&self, entry: &CacheEntry) -> CacheError {
        tracing::error!(
            "Cache entry {} ({} bytes) does not fit; unsynced entries are never evicted",
            entry.key,
            entry.size_bytes
        );
        CacheError::QuotaExceeded {
            key: entry.key.to_string(),
            needed: entry.size_bytes,
            quota: self.quota_bytes,
        }
    }

    fn remove(&mut self, key: &CacheKey) -> CacheResult<()> {
        self.store.delete(&entry_storage_key(key))?;
        if let Some(entry) = self.state.entries.remove(key) {
            self.state.total_bytes -= entry.size_bytes;
        }
        self.persist_index();
        Ok(())
    }

    fn persist_index(&self) {
        let mut keys: Vec<&CacheKey> = self.state.entries.keys().collect();
        keys.sort();
        if let Err(error) = save_json(self.store, CACHE_INDEX_KEY, &keys) {
            tracing::error!("Failed to persist cache index: {}", error);
        }
    }
}

fn approximate_size(key: &CacheKey, content: &Value) -> usize {
    key.as_str().len() + content.to_string().len()
}
