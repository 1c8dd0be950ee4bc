//! Fail-open read-through key/value store.

use std::sync::Arc;

use super::backend::CacheBackend;
use crate::domain::keys::{CacheKey, KeyPattern};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum number of scanned keys buffered before they are deleted in one command.
const DELETE_FLUSH_SIZE: usize = 1000;

/// Serialization contract for a type stored in the cache.
///
/// Bump [`CachedEntity::SCHEMA_VERSION`] whenever the serialized shape changes;
/// readers treat entries written under another version as misses instead of
/// deserializing them into the wrong shape.
pub trait CachedEntity: Serialize + DeserializeOwned {
    const SCHEMA_VERSION: u32;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    v: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    v: u32,
    data: T,
}

/// Serializes `value` inside a versioned envelope.
pub fn encode_entity<T: CachedEntity>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string(&EnvelopeRef {
        v: T::SCHEMA_VERSION,
        data: value,
    })
}

/// Deserializes a versioned envelope, returning `None` on any shape or version mismatch.
pub fn decode_entity<T: CachedEntity>(raw: &str) -> Option<T> {
    match serde_json::from_str::<Envelope<T>>(raw) {
        Ok(envelope) if envelope.v == T::SCHEMA_VERSION => Some(envelope.data),
        Ok(envelope) => {
            warn!(
                found = envelope.v,
                expected = T::SCHEMA_VERSION,
                "Discarding cache entry with stale schema version"
            );
            None
        }
        Err(e) => {
            warn!("Discarding undecodable cache entry: {}", e);
            None
        }
    }
}

/// Best-effort accelerator over the shared backend.
///
/// Every operation swallows backend errors: reads degrade to misses and writes to
/// no-ops, logged but never returned. Absence of an entry only ever costs latency.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    default_ttl: u64,
    scan_batch: usize,
}

impl CacheStore {
    /// Creates a store over `backend`.
    ///
    /// - `default_ttl_seconds` - TTL applied by [`CacheStore::set`] when none is given
    ///   (`CACHE_TTL_SECONDS`)
    /// - `scan_batch` - `COUNT` hint for each step of a pattern scan (`CACHE_SCAN_BATCH`)
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl_seconds: u64, scan_batch: usize) -> Self {
        Self {
            backend,
            default_ttl: default_ttl_seconds,
            scan_batch: scan_batch.max(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    /// Reads and deserializes the entry at `key`.
    ///
    /// Backend errors, undecodable payloads and schema mismatches all return `None`.
    pub async fn get<T: CachedEntity>(&self, key: &CacheKey) -> Option<T> {
        let key = key.to_string();
        match self.backend.get(&key).await {
            Ok(Some(raw)) => {
                let value = decode_entity(&raw);
                if value.is_some() {
                    counter!("cache_hits_total").increment(1);
                    debug!("Cache HIT: {}", key);
                } else {
                    counter!("cache_misses_total").increment(1);
                }
                value
            }
            Ok(None) => {
                counter!("cache_misses_total").increment(1);
                debug!("Cache MISS: {}", key);
                None
            }
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Cache GET error for {}: {}", key, e);
                None
            }
        }
    }

    /// Serializes and stores `value`, overwriting any existing entry.
    pub async fn set<T: CachedEntity>(&self, key: &CacheKey, value: &T, ttl_seconds: Option<u64>) {
        let key = key.to_string();
        let ttl = ttl_seconds.unwrap_or(self.default_ttl);

        let payload = match encode_entity(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Cache SET skipped for {}: serialization failed: {}", key, e);
                return;
            }
        };

        match self.backend.set_ex(&key, &payload, ttl).await {
            Ok(()) => debug!("Cache SET: {} (TTL: {}s)", key, ttl),
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Cache SET error for {}: {}", key, e);
            }
        }
    }

    /// Removes one entry. Removing an absent key is a no-op.
    pub async fn delete(&self, key: &str) {
        match self.backend.del(&[key.to_string()]).await {
            Ok(deleted) => {
                if deleted > 0 {
                    debug!("Cache INVALIDATE: {}", key);
                }
            }
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Cache DEL error for {}: {}", key, e);
            }
        }
    }

    /// Removes every key under `pattern`'s prefix.
    ///
    /// Walks the keyspace with a cursor scan in bounded steps and deletes matches in
    /// bulk, at most [`DELETE_FLUSH_SIZE`] keys per command. Returns how many keys were
    /// deleted; a backend failure stops the sweep and is logged.
    pub async fn delete_pattern(&self, pattern: &KeyPattern) -> u64 {
        let prefix = pattern.as_prefix();
        let mut cursor = 0;
        let mut pending: Vec<String> = Vec::new();
        let mut deleted = 0;

        loop {
            let (next, batch) = match self
                .backend
                .scan_prefix(cursor, prefix, self.scan_batch)
                .await
            {
                Ok(step) => step,
                Err(e) => {
                    counter!("cache_backend_errors_total").increment(1);
                    warn!("Cache SCAN error for {}: {}", pattern, e);
                    break;
                }
            };
            pending.extend(batch);

            if pending.len() >= DELETE_FLUSH_SIZE {
                deleted += self.flush(pattern, &mut pending).await;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        deleted += self.flush(pattern, &mut pending).await;
        debug!("Cache INVALIDATE pattern {}: {} keys", pattern, deleted);
        deleted
    }

    async fn flush(&self, pattern: &KeyPattern, pending: &mut Vec<String>) -> u64 {
        if pending.is_empty() {
            return 0;
        }
        let keys = std::mem::take(pending);
        match self.backend.del(&keys).await {
            Ok(deleted) => deleted,
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Cache DEL error for pattern {}: {}", pattern, e);
                0
            }
        }
    }

    /// Checks if the cache backend is reachable.
    pub async fn health_check(&self) -> bool {
        self.backend.ping().await.is_ok()
    }
}
