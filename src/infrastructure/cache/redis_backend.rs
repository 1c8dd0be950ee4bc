//! Redis-backed cache backend.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use super::backend::{CacheBackend, CacheError, CacheResult, HashWrite};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, RedisResult, Script, aio::ConnectionManager};
use tracing::info;

/// Increments a hash field only if the hash exists, so a cold tally is never seeded
/// with a partial count.
const HINCR_EXISTING: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return redis.call('HINCRBY', KEYS[1], ARGV[1], ARGV[2])
end
return false
";

/// Redis cache backend.
///
/// Uses connection pooling via `ConnectionManager`, which reconnects transparently
/// after a dropped connection. Every call is bounded by the configured operation
/// timeout so a stalled backend can never block a request indefinitely.
pub struct RedisBackend {
    client: ConnectionManager,
    op_timeout: Duration,
    incr_script: Script,
}

impl RedisBackend {
    /// Connects to Redis and validates the connection with a PING.
    ///
    /// # Arguments
    ///
    /// - `redis_url` - Redis connection string (e.g., `"redis://localhost:6379"`)
    /// - `op_timeout` - Upper bound for every individual backend call
    ///   (`CACHE_OP_TIMEOUT_MS`)
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Connection`] if the URL is invalid, the connection cannot
    /// be established, or the PING health check fails.
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> CacheResult<Self> {
        info!("Connecting to Redis cache backend");

        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("Failed to create Redis client: {}", e)))?;

        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        let mut test_conn = manager.clone();
        test_conn
            .ping::<()>()
            .await
            .map_err(|e| CacheError::Connection(format!("Redis PING failed: {}", e)))?;

        info!("✓ Connected to Redis cache backend");

        Ok(Self {
            client: manager,
            op_timeout,
            incr_script: Script::new(HINCR_EXISTING),
        })
    }

    async fn run<T>(&self, op: impl Future<Output = RedisResult<T>>) -> CacheResult<T> {
        match tokio::time::timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Operation(e.to_string())),
            Err(_) => Err(CacheError::Timeout(self.op_timeout.as_millis() as u64)),
        }
    }
}

/// Escapes glob metacharacters so a literal prefix can be used in `SCAN MATCH`.
pub(crate) fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.client.clone();
        self.run(conn.get::<_, Option<String>>(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> CacheResult<()> {
        let mut conn = self.client.clone();
        self.run(conn.set_ex::<_, _, ()>(key, value, ttl_seconds))
            .await
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.client.clone();
        self.run(conn.del::<_, u64>(keys)).await
    }

    async fn scan_prefix(
        &self,
        cursor: u64,
        prefix: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        let mut conn = self.client.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count);
        self.run(cmd.query_async::<(u64, Vec<String>)>(&mut conn))
            .await
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let mut conn = self.client.clone();
        self.run(conn.hget::<_, _, Option<String>>(key, field)).await
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut conn = self.client.clone();
        self.run(conn.hgetall::<_, HashMap<String, String>>(key))
            .await
    }

    async fn hlen(&self, key: &str) -> CacheResult<usize> {
        let mut conn = self.client.clone();
        self.run(conn.hlen::<_, usize>(key)).await
    }

    async fn hgetall_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.client.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.hgetall(key);
        }
        self.run(pipe.query_async::<Vec<HashMap<String, String>>>(&mut conn))
            .await
    }

    async fn hset_many(&self, writes: &[HashWrite], ttl_seconds: u64) -> CacheResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut conn = self.client.clone();
        let mut pipe = redis::pipe();
        let mut touched = HashSet::new();
        for write in writes {
            pipe.hset(&write.key, &write.field, &write.value).ignore();
            touched.insert(write.key.as_str());
        }
        for key in touched {
            pipe.cmd("EXPIRE")
                .arg(key)
                .arg(ttl_seconds)
                .arg("NX")
                .ignore();
        }
        self.run(pipe.query_async::<()>(&mut conn)).await
    }

    async fn replace_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_seconds: u64,
    ) -> CacheResult<()> {
        let mut conn = self.client.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !fields.is_empty() {
            pipe.hset_multiple(key, fields).ignore();
            pipe.cmd("EXPIRE").arg(key).arg(ttl_seconds).ignore();
        }
        self.run(pipe.query_async::<()>(&mut conn)).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.client.clone();
        self.run(conn.hdel::<_, _, ()>(key, fields)).await
    }

    async fn hsetnx(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> CacheResult<bool> {
        let mut conn = self.client.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().hset_nx(key, field, value);
        pipe.cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .arg("NX")
            .ignore();
        let (created,): (bool,) = self.run(pipe.query_async(&mut conn)).await?;
        Ok(created)
    }

    async fn hincr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> CacheResult<Option<i64>> {
        let mut conn = self.client.clone();
        let mut invocation = self.incr_script.key(key);
        invocation.arg(field).arg(delta);
        self.run(invocation.invoke_async::<Option<i64>>(&mut conn))
            .await
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.client.clone();
        self.run(conn.ping::<()>()).await
    }
}
