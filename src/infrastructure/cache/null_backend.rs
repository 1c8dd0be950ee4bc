//! No-op cache backend for disabled caching.

use std::collections::HashMap;

use super::backend::{CacheBackend, CacheResult, HashWrite};
use async_trait::async_trait;
use tracing::debug;

/// A cache backend that stores nothing.
///
/// Used when Redis is not configured or is unreachable at startup. Every read
/// is a miss and every write succeeds without effect, so all callers take the
/// authoritative-store path.
pub struct NullBackend;

impl NullBackend {
    /// Creates a new NullBackend instance.
    pub fn new() -> Self {
        debug!("Using NullBackend (caching disabled)");
        Self
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullBackend {
    async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn set_ex(&self, _key: &str, _value: &str, _ttl_seconds: u64) -> CacheResult<()> {
        Ok(())
    }

    async fn del(&self, _keys: &[String]) -> CacheResult<u64> {
        Ok(0)
    }

    async fn scan_prefix(
        &self,
        _cursor: u64,
        _prefix: &str,
        _count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        Ok((0, Vec::new()))
    }

    async fn hget(&self, _key: &str, _field: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn hgetall(&self, _key: &str) -> CacheResult<HashMap<String, String>> {
        Ok(HashMap::new())
    }

    async fn hlen(&self, _key: &str) -> CacheResult<usize> {
        Ok(0)
    }

    async fn hgetall_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>> {
        Ok(vec![HashMap::new(); keys.len()])
    }

    async fn hset_many(&self, _writes: &[HashWrite], _ttl_seconds: u64) -> CacheResult<()> {
        Ok(())
    }

    async fn replace_hash(
        &self,
        _key: &str,
        _fields: &[(String, String)],
        _ttl_seconds: u64,
    ) -> CacheResult<()> {
        Ok(())
    }

    async fn hdel(&self, _key: &str, _fields: &[String]) -> CacheResult<()> {
        Ok(())
    }

    /// Always reports the guard as newly created; deduplication then rests on the
    /// authoritative store's uniqueness constraint.
    async fn hsetnx(
        &self,
        _key: &str,
        _field: &str,
        _value: &str,
        _ttl_seconds: u64,
    ) -> CacheResult<bool> {
        Ok(true)
    }

    async fn hincr_existing(
        &self,
        _key: &str,
        _field: &str,
        _delta: i64,
    ) -> CacheResult<Option<i64>> {
        Ok(None)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}
