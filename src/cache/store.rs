//! Cache storage.
//!
//! `CacheBackend` is the seam between the gateway and the storage medium.
//! `MemoryStore` keeps entries and their tag index under one lock, so a reader
//! either sees an entry together with its indexed tags or sees nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use super::config::CacheConfig;
use super::events::Epoch;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::registry::TagIndex;
use super::tags::Tag;

const SOURCE: &str = "cache::store";
const METRIC_EVICT: &str = "tagcache_evict_total";

/// A cached response and the tags it depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub body: Bytes,
    pub tags: Vec<Tag>,
    pub created_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn new(key: CacheKey, body: Bytes, tags: Vec<Tag>) -> Self {
        Self {
            key,
            body,
            tags,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub tags: usize,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Storage medium for cached responses and their tag index.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `entry`, replacing any previous entry for its key.
    ///
    /// `observed` comes from an outstanding `observe` taken before the body
    /// was produced. Returns `false` without storing when any of the entry's
    /// tags was invalidated (or the cache was flushed) after that epoch.
    async fn put(&self, entry: CacheEntry, observed: Epoch) -> Result<bool, CacheError>;

    async fn evict(&self, keys: &HashSet<CacheKey>) -> Result<usize, CacheError>;

    /// Evict every entry carrying any of `tags`. Returns the evicted keys.
    async fn invalidate_tags(&self, tags: &[Tag]) -> Result<HashSet<CacheKey>, CacheError>;

    /// Register an in-flight resolution and return the epoch it starts from.
    /// Every successful call is paired with one `release`.
    async fn observe(&self) -> Result<Epoch, CacheError>;

    fn release(&self, observed: Epoch);

    /// Drop everything. Returns the number of evicted entries.
    async fn flush(&self) -> Result<usize, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

struct StoreState {
    entries: LruCache<CacheKey, CacheEntry>,
    index: TagIndex,
    epoch: Epoch,
    /// Invalidation epochs newer than the oldest in-flight observer.
    invalidated_at: HashMap<Tag, Epoch>,
    flushed_at: Epoch,
    /// Outstanding observers per observed epoch.
    observers: BTreeMap<Epoch, usize>,
}

impl StoreState {
    fn is_stale(&self, tags: &[Tag], observed: Epoch) -> bool {
        self.flushed_at > observed
            || tags.iter().any(|tag| {
                self.invalidated_at
                    .get(tag)
                    .is_some_and(|epoch| *epoch > observed)
            })
    }

    fn prune_invalidations(&mut self) {
        match self.observers.keys().next().copied() {
            Some(oldest) => self.invalidated_at.retain(|_, epoch| *epoch > oldest),
            None => self.invalidated_at.clear(),
        }
    }

    fn remove(&mut self, key: &CacheKey) -> bool {
        self.index.remove_key(key);
        self.entries.pop(key).is_some()
    }
}

/// In-process LRU store with a tag index.
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: RwLock::new(StoreState {
                entries: LruCache::new(config.capacity_non_zero()),
                index: TagIndex::new(),
                epoch: 0,
                invalidated_at: HashMap::new(),
                flushed_at: 0,
                observers: BTreeMap::new(),
            }),
        }
    }

    pub fn get_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        rw_write(&self.state, SOURCE, "get").entries.get(key).cloned()
    }

    pub fn put_entry(&self, entry: CacheEntry, observed: Epoch) -> bool {
        let mut state = rw_write(&self.state, SOURCE, "put");
        if state.is_stale(&entry.tags, observed) {
            debug!(
                key = %entry.key,
                observed,
                current = state.epoch,
                "Refusing to store entry invalidated during resolution"
            );
            return false;
        }

        let key = entry.key.clone();
        state.index.index(&entry.tags, &key);
        if let Some((evicted, _)) = state.entries.push(key.clone(), entry)
            && evicted != key
        {
            state.index.remove_key(&evicted);
            counter!(METRIC_EVICT).increment(1);
            debug!(key = %evicted, "Evicted least recently used entry");
        }
        true
    }

    pub fn evict_keys(&self, keys: &HashSet<CacheKey>) -> usize {
        let mut state = rw_write(&self.state, SOURCE, "evict");
        keys.iter().filter(|key| state.remove(key)).count()
    }

    pub fn invalidate(&self, tags: &[Tag]) -> HashSet<CacheKey> {
        let mut state = rw_write(&self.state, SOURCE, "invalidate_tags");
        state.epoch += 1;
        let epoch = state.epoch;

        let track = !state.observers.is_empty();
        let mut evicted = HashSet::new();
        for tag in tags {
            if track {
                state.invalidated_at.insert(tag.clone(), epoch);
            }
            for key in state.index.invalidate_tag(tag) {
                state.entries.pop(&key);
                evicted.insert(key);
            }
        }
        evicted
    }

    pub fn current_epoch(&self) -> Epoch {
        rw_read(&self.state, SOURCE, "epoch").epoch
    }

    pub fn observe_epoch(&self) -> Epoch {
        let mut state = rw_write(&self.state, SOURCE, "observe");
        let epoch = state.epoch;
        *state.observers.entry(epoch).or_default() += 1;
        epoch
    }

    pub fn release_epoch(&self, observed: Epoch) {
        let mut state = rw_write(&self.state, SOURCE, "release");
        if let Some(count) = state.observers.get_mut(&observed) {
            *count -= 1;
            if *count == 0 {
                state.observers.remove(&observed);
            }
        }
        state.prune_invalidations();
    }

    pub fn clear(&self) -> usize {
        let mut state = rw_write(&self.state, SOURCE, "flush");
        let count = state.entries.len();
        state.epoch += 1;
        state.flushed_at = state.epoch;
        state.invalidated_at.clear();
        state.entries.clear();
        state.index.clear();
        count
    }

    pub fn len(&self) -> usize {
        rw_read(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_stats(&self) -> CacheStats {
        let state = rw_read(&self.state, SOURCE, "stats");
        CacheStats {
            entries: state.entries.len(),
            tags: state.index.tag_count(),
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_invalidations(&self) -> usize {
        rw_read(&self.state, SOURCE, "tracked_invalidations")
            .invalidated_at
            .len()
    }

    #[cfg(test)]
    fn index_keys_for(&self, tag: &Tag) -> HashSet<CacheKey> {
        rw_read(&self.state, SOURCE, "index_keys_for")
            .index
            .keys_for_tag(tag)
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.get_entry(key))
    }

    async fn put(&self, entry: CacheEntry, observed: Epoch) -> Result<bool, CacheError> {
        Ok(self.put_entry(entry, observed))
    }

    async fn evict(&self, keys: &HashSet<CacheKey>) -> Result<usize, CacheError> {
        Ok(self.evict_keys(keys))
    }

    async fn invalidate_tags(&self, tags: &[Tag]) -> Result<HashSet<CacheKey>, CacheError> {
        Ok(self.invalidate(tags))
    }

    async fn observe(&self) -> Result<Epoch, CacheError> {
        Ok(self.observe_epoch())
    }

    fn release(&self, observed: Epoch) {
        self.release_epoch(observed);
    }

    async fn flush(&self) -> Result<usize, CacheError> {
        Ok(self.clear())
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.current_stats())
    }
}
