//! Backing stores for cache entries.

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::entry::CacheEntry;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";
const METRIC_EVICT: &str = "reprise_cache_evict_total";

/// Key/value storage shared by all in-flight requests.
///
/// Implementations bring their own capacity bound and eviction. Expiry is
/// not their concern; the manager checks it on lookup.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Arc<CacheEntry>>;
    fn put(&self, key: String, entry: Arc<CacheEntry>);
    fn remove(&self, key: &str);
}

/// Bounded in-memory store with least-recently-used eviction.
pub struct LruStore {
    entries: RwLock<LruCache<String, Arc<CacheEntry>>>,
}

impl LruStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "clear").clear();
    }
}

impl CacheStore for LruStore {
    fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        // Promotes the entry, so this needs the write lock.
        rw_write(&self.entries, SOURCE, "get").get(key).cloned()
    }

    fn put(&self, key: String, entry: Arc<CacheEntry>) {
        let evicted = rw_write(&self.entries, SOURCE, "put").push(key.clone(), entry);
        // `push` also hands back the old value when the key was replaced.
        if let Some((evicted_key, _)) = evicted.filter(|(evicted_key, _)| *evicted_key != key) {
            debug!(cache = "response", key = %evicted_key, "evicted least recently used entry");
            counter!(METRIC_EVICT).increment(1);
        }
    }

    fn remove(&self, key: &str) {
        rw_write(&self.entries, SOURCE, "remove").pop(key);
    }
}
