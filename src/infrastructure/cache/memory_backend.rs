//! In-process cache backend.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::backend::{CacheBackend, CacheError, CacheResult, HashWrite};
use async_trait::async_trait;

#[derive(Debug, Clone)]
enum SlotValue {
    Str(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: SlotValue,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Default)]
struct State {
    slots: BTreeMap<String, Slot>,
}

impl State {
    fn live(&mut self, key: &str) -> Option<&mut Slot> {
        let now = Instant::now();
        if self.slots.get(key).is_some_and(|slot| !slot.is_live(now)) {
            self.slots.remove(key);
        }
        self.slots.get_mut(key)
    }

    fn hash_mut(&mut self, key: &str) -> CacheResult<Option<&mut HashMap<String, String>>> {
        match self.live(key) {
            None => Ok(None),
            Some(Slot {
                value: SlotValue::Hash(map),
                ..
            }) => Ok(Some(map)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash_or_insert(&mut self, key: &str) -> CacheResult<&mut Slot> {
        if self.live(key).is_none() {
            self.slots.insert(
                key.to_string(),
                Slot {
                    value: SlotValue::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.slots.get_mut(key) {
            Some(slot) if matches!(slot.value, SlotValue::Hash(_)) => Ok(slot),
            _ => Err(wrong_type(key)),
        }
    }
}

fn wrong_type(key: &str) -> CacheError {
    CacheError::Operation(format!(
        "WRONGTYPE operation against key '{key}' holding the wrong kind of value"
    ))
}

/// Cache backend holding everything in process memory.
///
/// Every method runs under one lock, which gives the same per-command atomicity
/// Redis provides. Instances can be shared between several [`super::CacheStore`]s to
/// model processes that share one backend, or kept separate to model isolated ones.
///
/// [`MemoryBackend::set_available`] simulates an unreachable backend.
pub struct MemoryBackend {
    state: Mutex<State>,
    available: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::default(),
            available: AtomicBool::new(true),
        }
    }

    /// Makes every subsequent call fail with [`CacheError::Connection`] (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .slots
            .values()
            .filter(|slot| slot.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `key` exists and has not expired.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().live(key).is_some()
    }

    /// Remaining time to live of `key`, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .live(key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self) -> CacheResult<MutexGuard<'_, State>> {
        if self.available.load(Ordering::SeqCst) {
            Ok(self.lock())
        } else {
            Err(CacheError::Connection("memory backend marked unavailable".to_string()))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable scan order. Cursors are positions in this order, so a scan keeps no
/// server-side state and still visits every key that exists for its whole duration.
fn scan_position(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    // 0 is reserved for "start" and "done".
    hasher.finish().max(1)
}

fn expiry(ttl_seconds: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_secs(ttl_seconds))
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut state = self.guard()?;
        match state.live(key) {
            None => Ok(None),
            Some(Slot {
                value: SlotValue::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> CacheResult<()> {
        let mut state = self.guard()?;
        state.slots.insert(
            key.to_string(),
            Slot {
                value: SlotValue::Str(value.to_string()),
                expires_at: expiry(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> CacheResult<u64> {
        let mut state = self.guard()?;
        let mut removed = 0;
        for key in keys {
            if state.live(key).is_some() {
                state.slots.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn scan_prefix(
        &self,
        cursor: u64,
        prefix: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        let state = self.guard()?;
        let now = Instant::now();
        let mut ahead: Vec<(u64, &String)> = state
            .slots
            .iter()
            .filter(|(_, slot)| slot.is_live(now))
            .map(|(key, _)| (scan_position(key), key))
            .filter(|(position, _)| *position >= cursor)
            .collect();
        ahead.sort_unstable();

        let mut end = count.max(1).min(ahead.len());
        // Keys sharing a position are returned together so none can be skipped.
        while end < ahead.len() && ahead[end].0 == ahead[end - 1].0 {
            end += 1;
        }
        let next = match ahead.get(end) {
            Some((position, _)) => *position,
            None => 0,
        };
        let batch = ahead[..end]
            .iter()
            .filter(|(_, key)| key.starts_with(prefix))
            .map(|(_, key)| (*key).clone())
            .collect();
        Ok((next, batch))
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<Option<String>> {
        let mut state = self.guard()?;
        Ok(state
            .hash_mut(key)?
            .and_then(|map| map.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut state = self.guard()?;
        Ok(state.hash_mut(key)?.map(|map| map.clone()).unwrap_or_default())
    }

    async fn hlen(&self, key: &str) -> CacheResult<usize> {
        let mut state = self.guard()?;
        Ok(state.hash_mut(key)?.map_or(0, |map| map.len()))
    }

    async fn hgetall_many(&self, keys: &[String]) -> CacheResult<Vec<HashMap<String, String>>> {
        let mut state = self.guard()?;
        keys.iter()
            .map(|key| Ok(state.hash_mut(key)?.map(|map| map.clone()).unwrap_or_default()))
            .collect()
    }

    async fn hset_many(&self, writes: &[HashWrite], ttl_seconds: u64) -> CacheResult<()> {
        let mut state = self.guard()?;
        let mut touched = HashSet::new();
        for write in writes {
            let slot = state.hash_or_insert(&write.key)?;
            if let SlotValue::Hash(map) = &mut slot.value {
                map.insert(write.field.clone(), write.value.clone());
            }
            touched.insert(write.key.as_str());
        }
        for key in touched {
            if let Some(slot) = state.slots.get_mut(key)
                && slot.expires_at.is_none()
            {
                slot.expires_at = expiry(ttl_seconds);
            }
        }
        Ok(())
    }

    async fn replace_hash(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl_seconds: u64,
    ) -> CacheResult<()> {
        let mut state = self.guard()?;
        state.slots.remove(key);
        if !fields.is_empty() {
            state.slots.insert(
                key.to_string(),
                Slot {
                    value: SlotValue::Hash(fields.iter().cloned().collect()),
                    expires_at: expiry(ttl_seconds),
                },
            );
        }
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> CacheResult<()> {
        let mut state = self.guard()?;
        let now_empty = match state.hash_mut(key)? {
            Some(map) => {
                for field in fields {
                    map.remove(field);
                }
                map.is_empty()
            }
            None => false,
        };
        // Redis drops a hash once its last field is gone.
        if now_empty {
            state.slots.remove(key);
        }
        Ok(())
    }

    async fn hsetnx(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> CacheResult<bool> {
        let mut state = self.guard()?;
        let slot = state.hash_or_insert(key)?;
        if slot.expires_at.is_none() {
            slot.expires_at = expiry(ttl_seconds);
        }
        let SlotValue::Hash(map) = &mut slot.value else {
            return Err(wrong_type(key));
        };
        if map.contains_key(field) {
            return Ok(false);
        }
        map.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hincr_existing(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> CacheResult<Option<i64>> {
        let mut state = self.guard()?;
        let Some(map) = state.hash_mut(key)? else {
            return Ok(None);
        };
        let current = match map.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                CacheError::Operation("hash value is not an integer".to_string())
            })?,
            None => 0,
        };
        let next = current + delta;
        map.insert(field.to_string(), next.to_string());
        Ok(Some(next))
    }

    async fn ping(&self) -> CacheResult<()> {
        self.guard().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_survives_deletes_between_batches() {
        let backend = MemoryBackend::new();
        for i in 0..10 {
            backend.set_ex(&format!("k:{i}"), "v", 60).await.unwrap();
        }
        backend.set_ex("other", "v", 60).await.unwrap();

        let mut seen = Vec::new();
        let mut cursor = 0;
        let mut steps = 0;
        loop {
            let (next, batch) = backend.scan_prefix(cursor, "k:", 3).await.unwrap();
            steps += 1;
            backend.del(&batch).await.unwrap();
            seen.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        assert!(steps > 1);
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 10);
        assert!(backend.contains("other"));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_scan_does_not_accumulate_cursor_state() {
        let backend = MemoryBackend::new();
        for i in 0..20 {
            backend.set_ex(&format!("k:{i}"), "v", 60).await.unwrap();
        }

        // Abandoned scans leave nothing behind; each first step is identical.
        let (first_cursor, first_batch) = backend.scan_prefix(0, "k:", 5).await.unwrap();
        for _ in 0..50 {
            let (cursor, batch) = backend.scan_prefix(0, "k:", 5).await.unwrap();
            assert_eq!(cursor, first_cursor);
            assert_eq!(batch, first_batch);
        }
        assert_ne!(first_cursor, 0);
        assert_eq!(backend.len(), 20);
    }

    #[tokio::test]
    async fn test_hdel_removes_fields_and_empty_hash() {
        let backend = MemoryBackend::new();
        backend
            .replace_hash(
                "h",
                &[
                    ("a".to_string(), "1".to_string()),
                    ("b".to_string(), "2".to_string()),
                    ("c".to_string(), "3".to_string()),
                ],
                60,
            )
            .await
            .unwrap();

        backend
            .hdel("h", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(backend.hlen("h").await.unwrap(), 1);

        backend.hdel("h", &["c".to_string()]).await.unwrap();
        assert_eq!(backend.hlen("h").await.unwrap(), 0);
        assert!(!backend.contains("h"));
    }

    #[tokio::test]
    async fn test_hincr_existing_skips_cold_hash() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.hincr_existing("t", "a", 1).await.unwrap(), None);
        assert!(!backend.contains("t"));

        backend
            .hset_many(&[HashWrite::new("t", "a", "2")], 60)
            .await
            .unwrap();
        assert_eq!(backend.hincr_existing("t", "a", 1).await.unwrap(), Some(3));
        assert_eq!(backend.hincr_existing("t", "b", 1).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_hset_many_keeps_existing_ttl() {
        let backend = MemoryBackend::new();
        backend
            .replace_hash("h", &[("a".to_string(), "1".to_string())], 10)
            .await
            .unwrap();
        backend
            .hset_many(&[HashWrite::new("h", "b", "2")], 1000)
            .await
            .unwrap();

        let ttl = backend.ttl("h").unwrap();
        assert!(ttl <= Duration::from_secs(10));
        assert_eq!(backend.hgetall("h").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_backend_errors() {
        let backend = MemoryBackend::new();
        backend.set_available(false);
        assert!(matches!(
            backend.get("k").await,
            Err(CacheError::Connection(_))
        ));
        assert!(backend.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_type_is_an_error() {
        let backend = MemoryBackend::new();
        backend.set_ex("s", "v", 60).await.unwrap();
        assert!(backend.hget("s", "f").await.is_err());
    }
}
