//! Cache configuration.
//!
//! Controls the response cache via the `[cache]` table of `reprise.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use super::keys::KeyStrategy;

const DEFAULT_CAPACITY: usize = 512;
const DEFAULT_MAX_AGE_SECS: u64 = 60;
const DEFAULT_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Response cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve and store cached responses.
    pub enabled: bool,
    /// Maximum entries held by the in-memory store.
    pub capacity: usize,
    /// Time-to-live of a stored entry, in seconds.
    pub max_age_seconds: u64,
    /// Responses with larger bodies are served but not stored.
    pub body_limit_bytes: usize,
    pub key_strategy: KeyStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CAPACITY,
            max_age_seconds: DEFAULT_MAX_AGE_SECS,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            key_strategy: KeyStrategy::Identity,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            capacity: settings.capacity.get(),
            max_age_seconds: settings.max_age.as_secs(),
            body_limit_bytes: settings.body_limit_bytes.get(),
            key_strategy: settings.key_strategy,
        }
    }
}

impl CacheConfig {
    /// Store capacity, clamped to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }
}
