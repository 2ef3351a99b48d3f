//! Per-request cache orchestration.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use super::capture::ResponseCapture;
use super::entry::{CacheEntry, ReplayError};
use super::keys::CacheKey;
use super::response::HttpResponse;
use super::store::CacheStore;

const METRIC_HIT: &str = "reprise_cache_hit_total";
const METRIC_MISS: &str = "reprise_cache_miss_total";
const METRIC_EXPIRED: &str = "reprise_cache_expired_total";
const METRIC_STORE: &str = "reprise_cache_store_total";

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Cache lookup and storage for a single request.
///
/// The lookup happens once, at construction. An expired entry found there is
/// removed from the store and the request is treated as a miss. Concurrent
/// misses on the same key are not coalesced; each stores its own entry and
/// the last `put` wins.
pub struct CacheManager {
    key: CacheKey,
    cache_age: Duration,
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    entry: Option<Arc<CacheEntry>>,
}

impl CacheManager {
    /// Look up `path?query` using the system clock.
    pub fn for_request(
        path: &str,
        query: Option<&str>,
        cache_age: Duration,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self::new(
            CacheKey::identity(path, query),
            cache_age,
            store,
            Arc::new(SystemClock),
        )
    }

    pub fn new(
        key: CacheKey,
        cache_age: Duration,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        let entry = match store.get(key.as_str()) {
            Some(entry) if entry.is_valid_at(now) => {
                debug!(cache = "response", outcome = "hit", %key);
                counter!(METRIC_HIT).increment(1);
                Some(entry)
            }
            Some(_) => {
                store.remove(key.as_str());
                debug!(cache = "response", outcome = "expired", %key);
                counter!(METRIC_EXPIRED).increment(1);
                counter!(METRIC_MISS).increment(1);
                None
            }
            None => {
                debug!(cache = "response", outcome = "miss", %key);
                counter!(METRIC_MISS).increment(1);
                None
            }
        };

        Self {
            key,
            cache_age,
            store,
            clock,
            entry,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// True when a non-expired entry was found at construction.
    pub fn is_valid(&self) -> bool {
        self.entry.is_some()
    }

    /// Replay the cached entry onto `response`.
    pub fn send<R: HttpResponse>(&self, response: &mut R) -> Result<(), ReplayError> {
        let entry = self.entry.as_ref().ok_or(ReplayError::Missing)?;
        entry.replay(response)
    }

    /// Store what `capture` recorded, unless it was abandoned.
    ///
    /// Returns the stored entry.
    pub fn save<R: HttpResponse>(
        &self,
        capture: &mut ResponseCapture<R>,
    ) -> Option<Arc<CacheEntry>> {
        if !capture.is_cacheable() {
            debug!(cache = "response", key = %self.key, "capture not cacheable, skipping store");
            return None;
        }

        let entry = Arc::new(CacheEntry::from_capture(
            capture,
            self.cache_age,
            self.clock.now(),
        ));
        debug!(
            cache = "response",
            key = %self.key,
            body_bytes = entry.body().len(),
            expires_at = %entry.expires_at(),
            "storing captured response"
        );
        self.store.put(self.key.as_str().to_string(), Arc::clone(&entry));
        counter!(METRIC_STORE).increment(1);
        Some(entry)
    }
}
