//! Cache backend trait and error types.
//!
//! [`CacheBackend`] is the seam over the shared key-value store. Every method maps to
//! one atomic backend command or one pipeline. Implementations report failures
//! honestly; the fail-open policy lives one layer up in [`super::CacheStore`],
//! [`crate::application::services::CollectionCache`] and
//! [`crate::application::services::TallyCache`].

use std::collections::HashMap;

use async_trait::async_trait;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    Connection(String),
    #[error("Cache operation error: {0}")]
    Operation(String),
    #[error("Cache operation timed out after {0}ms")]
    Timeout(u64),
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// One field write into a hash key, used by batched multi-key writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashWrite {
    pub key: String,
    pub field: String,
    pub value: String,
}

impl HashWrite {
    pub fn new(key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Operations the cache layer needs from the shared key-value store.
///
/// # Implementations
///
/// - [`super::RedisBackend`] - Redis via `ConnectionManager`
/// - [`super::MemoryBackend`] - In-process map for tests and single-process development
/// - [`super::NullBackend`] - Stores nothing; used when caching is disabled
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Reads a string value.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Writes a string value with expiry, overwriting unconditionally.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> CacheResult<()>;

    /// Deletes every listed key in one command. Returns how many existed.
    async fn del(&self, keys: &[String]) -> CacheResult<u64>;

    /// Advances a cursor-based scan over keys starting with `prefix`.
    ///
    /// `count` is a hint for the batch size. Returns the next cursor (`0` when the
    /// scan is complete) and the keys found in this step.
    async fn scan_prefix(
        &self,
        cursor: u64,
        prefix: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)>;

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>>;

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    /// Number of fields in the hash at `key` (`0` if absent).
    async fn hlen(&self, key: &str) -> CacheResult<usize>;

    /// Reads several hashes in one round trip, in the order of `keys`.
    async fn hgetall_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>>;

    /// Applies many field writes, possibly across many keys, in one round trip.
    ///
    /// Keys that had no expiry get `ttl_seconds`; existing expiries are left alone.
    async fn hset_many(&self, writes: &[HashWrite], ttl_seconds: u64) -> CacheResult<()>;

    /// Atomically replaces the whole hash at `key` and sets its expiry.
    async fn replace_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_seconds: u64,
    ) -> CacheResult<()>;

    /// Removes every listed field of one hash in a single command.
    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<()>;

    /// Sets a field only if absent. Returns `true` if this call created it.
    ///
    /// A hash without expiry gets `ttl_seconds`, as in [`CacheBackend::hset_many`].
    async fn hsetnx(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> CacheResult<bool>;

    /// Atomically increments a hash field, but only when the hash already exists.
    ///
    /// Returns the new value, or `None` if the hash was absent and nothing was written.
    async fn hincr_existing(&self, key: &str, field: &str, delta: i64)
    -> CacheResult<Option<i64>>;

    /// Checks backend reachability.
    async fn ping(&self) -> CacheResult<()>;
}
