//! Reprise response cache
//!
//! Records an outgoing HTTP response as an ordered log of mutations plus a
//! body snapshot, and replays it onto a fresh response on later requests:
//!
//! - **Operations** ([`Operation`], [`codec`]): the compact binary log format
//! - **Capture** ([`ResponseCapture`]): records a response while it is produced
//! - **Entries** ([`CacheEntry`]): immutable snapshots with an expiry
//! - **Manager** ([`CacheManager`]): per-request lookup, replay and storage
//!
//! ## Configuration
//!
//! Cache behavior is controlled via the `[cache]` table of `reprise.toml`:
//!
//! ```toml
//! [cache]
//! enabled = true
//! capacity = 512
//! max_age_seconds = 60
//! body_limit_bytes = 1048576
//! key_strategy = "identity"
//! ```

mod capture;
pub mod codec;
mod config;
mod entry;
mod keys;
mod lock;
mod manager;
mod middleware;
mod ops;
mod response;
mod sink;
mod store;

#[cfg(test)]
mod testing;

pub use capture::{CaptureError, ResponseCapture};
pub use codec::{DecodeError, EncodeError};
pub use config::CacheConfig;
pub use entry::{CacheEntry, CachedBody, ReplayError};
pub use keys::{CacheKey, KeyStrategy};
pub use manager::{CacheManager, Clock, SystemClock};
pub use middleware::{CacheState, response_cache_layer};
pub use ops::{Locale, Operation};
pub use response::{HttpResponse, ResponseBody, ResponseError, ResponseMutations};
pub use sink::{TeeStream, TeeWriter};
pub use store::{CacheStore, LruStore};
