//! Hash-shaped cache of named member collections.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::entities::{CollectionId, MemberRecord};
use crate::domain::repositories::MembershipRepository;
use crate::error::AppError;
use crate::infrastructure::cache::{
    CacheBackend, CachedEntity, HashWrite, decode_entity, encode_entity,
};
use metrics::counter;
use tracing::{debug, warn};

impl CachedEntity for MemberRecord {
    const SCHEMA_VERSION: u32 = 1;
}

/// Present only in hashes built from the full authoritative set.
const COMPLETE_FIELD: &str = "_complete";

/// Cache of collections such as "members of channel C", one hash per collection.
///
/// Each hash maps `member_id` to the serialized [`MemberRecord`]. Point mutations
/// touch one field and are visible to every process as soon as they return, because
/// the hash lives in the shared backend. A hash built from point mutations alone is
/// a valid subset of the collection until a full read-through or
/// [`CollectionCache::reconcile`] replaces it. Those two paths also write a
/// completeness marker field, and only a marked hash is trusted for counts.
///
/// Backend failures are logged and swallowed; reads then fall back to the
/// authoritative store.
pub struct CollectionCache<M: MembershipRepository> {
    backend: Arc<dyn CacheBackend>,
    members: Arc<M>,
    ttl_seconds: u64,
}

impl<M: MembershipRepository> CollectionCache<M> {
    /// Creates a collection cache.
    ///
    /// `ttl_seconds` (`COLLECTION_TTL_SECONDS`) bounds how long a collection hash
    /// can drift from the authoritative store.
    pub fn new(backend: Arc<dyn CacheBackend>, members: Arc<M>, ttl_seconds: u64) -> Self {
        Self {
            backend,
            members,
            ttl_seconds,
        }
    }

    /// Upserts one member.
    ///
    /// A record whose status is not the collection's tracked status (for example a
    /// request that was accepted or a member who left) is removed from the hash
    /// instead, so the hash never holds members outside the collection.
    pub async fn add_member(&self, collection: CollectionId, record: &MemberRecord) {
        self.bulk_add(&[(collection, record.clone())]).await;
    }

    /// Removes one member. Removing an absent member is a no-op.
    pub async fn remove_member(&self, collection: CollectionId, member_id: i64) {
        let key = collection.cache_key().to_string();
        if let Err(e) = self.backend.hdel(&key, &[member_id.to_string()]).await {
            counter!("cache_backend_errors_total").increment(1);
            warn!("Collection HDEL error for {} member {}: {}", key, member_id, e);
        }
    }

    /// Upserts many members of one collection in a single round trip.
    pub async fn add_members(&self, collection: CollectionId, records: &[MemberRecord]) {
        let entries: Vec<(CollectionId, MemberRecord)> = records
            .iter()
            .map(|record| (collection, record.clone()))
            .collect();
        self.bulk_add(&entries).await;
    }

    /// Upserts members across any number of collections in a single round trip.
    ///
    /// Used when one event fans out to several collections at once, e.g. joining a
    /// channel and several of its topics.
    pub async fn bulk_add(&self, entries: &[(CollectionId, MemberRecord)]) {
        self.write_members(entries, None).await;
    }

    async fn write_members(
        &self,
        entries: &[(CollectionId, MemberRecord)],
        complete: Option<CollectionId>,
    ) {
        let mut writes = Vec::with_capacity(entries.len() + 1);
        let mut removals: HashMap<String, Vec<String>> = HashMap::new();
        for (collection, record) in entries {
            let key = collection.cache_key().to_string();
            if record.status != collection.tracked_status() {
                removals.entry(key).or_default().push(record.field());
                continue;
            }
            match encode_entity(record) {
                Ok(payload) => writes.push(HashWrite::new(key, record.field(), payload)),
                Err(e) => warn!(
                    "Skipping member {} of {}: serialization failed: {}",
                    record.member_id, collection, e
                ),
            }
        }
        if let Some(collection) = complete {
            writes.push(HashWrite::new(
                collection.cache_key().to_string(),
                COMPLETE_FIELD,
                "1",
            ));
        }

        for (key, fields) in removals {
            if let Err(e) = self.backend.hdel(&key, &fields).await {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Collection HDEL error for {} ({} members): {}", key, fields.len(), e);
            }
        }

        if writes.is_empty() {
            return;
        }
        match self.backend.hset_many(&writes, self.ttl_seconds).await {
            Ok(()) => debug!("Collection HSET: {} fields", writes.len()),
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Collection HSET error for {} fields: {}", writes.len(), e);
            }
        }
    }

    /// Returns every member of the collection, ordered by member id.
    ///
    /// On a cold or unreachable hash, loads the tracked membership set from the
    /// authoritative store and backfills the hash, marked complete, with one
    /// batched write.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] only when the authoritative store fails.
    pub async fn get_all(&self, collection: CollectionId) -> Result<Vec<MemberRecord>, AppError> {
        let key = collection.cache_key().to_string();

        match self.backend.hgetall(&key).await {
            Ok(fields) if !fields.is_empty() => {
                counter!("cache_hits_total").increment(1);
                debug!("Collection HIT: {} ({} members)", key, fields.len());
                return Ok(decode_members(&key, fields));
            }
            Ok(_) => {
                counter!("cache_misses_total").increment(1);
                debug!("Collection MISS: {}", key);
            }
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Collection HGETALL error for {}: {}", key, e);
            }
        }

        let records = self
            .members
            .find_members(collection, collection.tracked_status())
            .await?;
        let entries: Vec<(CollectionId, MemberRecord)> = records
            .iter()
            .map(|record| (collection, record.clone()))
            .collect();
        self.write_members(&entries, Some(collection)).await;
        Ok(records)
    }

    /// Returns one member if it belongs to the collection.
    ///
    /// Falls back to the authoritative store on a miss and backfills the field.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] only when the authoritative store fails.
    pub async fn get_member(
        &self,
        collection: CollectionId,
        member_id: i64,
    ) -> Result<Option<MemberRecord>, AppError> {
        let key = collection.cache_key().to_string();

        match self.backend.hget(&key, &member_id.to_string()).await {
            Ok(Some(raw)) => {
                if let Some(record) = decode_entity::<MemberRecord>(&raw) {
                    counter!("cache_hits_total").increment(1);
                    return Ok(Some(record));
                }
            }
            Ok(None) => counter!("cache_misses_total").increment(1),
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Collection HGET error for {}: {}", key, e);
            }
        }

        let record = self
            .members
            .find_member(collection, member_id)
            .await?
            .filter(|record| record.status == collection.tracked_status());
        if let Some(record) = &record {
            self.add_member(collection, record).await;
        }
        Ok(record)
    }

    /// Recomputes the collection from the authoritative store and atomically
    /// replaces the cached hash.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] only when the authoritative store fails.
    pub async fn reconcile(&self, collection: CollectionId) -> Result<Vec<MemberRecord>, AppError> {
        let key = collection.cache_key().to_string();
        let records = self
            .members
            .find_members(collection, collection.tracked_status())
            .await?;

        let mut fields: Vec<(String, String)> = records
            .iter()
            .filter_map(|record| encode_entity(record).ok().map(|raw| (record.field(), raw)))
            .collect();
        fields.push((COMPLETE_FIELD.to_string(), "1".to_string()));

        if let Err(e) = self
            .backend
            .replace_hash(&key, &fields, self.ttl_seconds)
            .await
        {
            counter!("cache_backend_errors_total").increment(1);
            warn!("Collection reconcile error for {}: {}", key, e);
        }
        Ok(records)
    }

    /// Number of members in the collection.
    ///
    /// A hash marked complete answers with HLEN. Any other hash may be a subset
    /// built from point mutations, so the authoritative store counts instead,
    /// without populating the hash.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] only when the authoritative store fails.
    pub async fn count(&self, collection: CollectionId) -> Result<i64, AppError> {
        let key = collection.cache_key().to_string();
        match self.backend.hget(&key, COMPLETE_FIELD).await {
            Ok(Some(_)) => match self.backend.hlen(&key).await {
                // A concurrent delete can empty the hash between the two reads.
                Ok(len) if len > 0 => {
                    counter!("cache_hits_total").increment(1);
                    return Ok((len - 1) as i64);
                }
                Ok(_) => {}
                Err(e) => {
                    counter!("cache_backend_errors_total").increment(1);
                    warn!("Collection HLEN error for {}: {}", key, e);
                }
            },
            Ok(None) => counter!("cache_misses_total").increment(1),
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Collection HGET error for {}: {}", key, e);
            }
        }
        self.members
            .count_members(collection, collection.tracked_status())
            .await
    }

    /// Number of members currently cached for the collection, without fallback.
    pub async fn cached_len(&self, collection: CollectionId) -> usize {
        let key = collection.cache_key().to_string();
        let len = self.backend.hlen(&key).await.unwrap_or(0);
        match self.backend.hget(&key, COMPLETE_FIELD).await {
            Ok(Some(_)) => len.saturating_sub(1),
            _ => len,
        }
    }

    /// Drops the whole collection hash so the next read recomputes it.
    pub async fn drop_collection(&self, collection: CollectionId) {
        let key = collection.cache_key().to_string();
        if let Err(e) = self.backend.del(&[key.clone()]).await {
            counter!("cache_backend_errors_total").increment(1);
            warn!("Collection DEL error for {}: {}", key, e);
        }
    }
}

fn decode_members(key: &str, fields: HashMap<String, String>) -> Vec<MemberRecord> {
    let mut records: Vec<MemberRecord> = fields
        .into_iter()
        .filter(|(field, _)| field != COMPLETE_FIELD)
        .filter_map(|(field, raw)| {
            let record = decode_entity::<MemberRecord>(&raw);
            if record.is_none() {
                warn!("Skipping undecodable member {} in {}", field, key);
            }
            record
        })
        .collect();
    records.sort_by_key(|record| record.member_id);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::MembershipStatus;
    use crate::domain::repositories::MockMembershipRepository;
    use crate::infrastructure::cache::{MemoryBackend, MockCacheBackend};
    use chrono::Utc;
    use serde_json::json;

    fn active(member_id: i64) -> MemberRecord {
        MemberRecord::new(member_id, MembershipStatus::Active, "member", Utc::now())
    }

    fn cache(
        backend: Arc<MemoryBackend>,
        repo: MockMembershipRepository,
    ) -> CollectionCache<MockMembershipRepository> {
        CollectionCache::new(backend, Arc::new(repo), 3600)
    }

    #[tokio::test]
    async fn test_get_all_cold_backfills_once() {
        let backend = Arc::new(MemoryBackend::new());
        let mut repo = MockMembershipRepository::new();
        repo.expect_find_members()
            .withf(|c, s| *c == CollectionId::channel_members(7) && *s == MembershipStatus::Active)
            .times(1)
            .returning(|_, _| Ok(vec![active(1), active(2), active(3)]));
        let cache = cache(backend.clone(), repo);
        let channel = CollectionId::channel_members(7);

        let first = cache.get_all(channel).await.unwrap();
        let second = cache.get_all(channel).await.unwrap();

        assert_eq!(first.len(), 3);
        assert_eq!(second, first);
        assert!(backend.ttl("channel:7:members").is_some());
    }

    #[tokio::test]
    async fn test_add_member_visible_without_prior_population() {
        let backend = Arc::new(MemoryBackend::new());
        let mut repo = MockMembershipRepository::new();
        repo.expect_find_members().times(0);
        let cache = cache(backend, repo);
        let topic = CollectionId::topic_members(9);

        cache.add_member(topic, &active(42)).await;
        let members = cache.get_all(topic).await.unwrap();

        assert_eq!(members.len(), 1);
        assert_eq!(members[0].member_id, 42);
    }

    #[tokio::test]
    async fn test_remove_member_only_touches_one_field() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = cache(backend, MockMembershipRepository::new());
        let channel = CollectionId::channel_members(1);

        cache.add_members(channel, &[active(1), active(2)]).await;
        cache.remove_member(channel, 1).await;
        cache.remove_member(channel, 99).await;

        assert_eq!(cache.cached_len(channel).await, 1);
    }

    #[tokio::test]
    async fn test_status_change_removes_from_requests() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = cache(backend, MockMembershipRepository::new());
        let requests = CollectionId::event_requests(5);
        let pending = MemberRecord::new(8, MembershipStatus::Pending, "guest", Utc::now());

        cache.add_member(requests, &pending).await;
        assert_eq!(cache.cached_len(requests).await, 1);

        let accepted = MemberRecord {
            status: MembershipStatus::Active,
            ..pending
        };
        cache.add_member(requests, &accepted).await;
        assert_eq!(cache.cached_len(requests).await, 0);
    }

    #[tokio::test]
    async fn test_bulk_add_spans_collections() {
        let backend = Arc::new(MemoryBackend::new());
        let cache = cache(backend.clone(), MockMembershipRepository::new());
        let member = active(77);

        cache
            .bulk_add(&[
                (CollectionId::channel_members(1), member.clone()),
                (CollectionId::topic_members(10), member.clone()),
                (CollectionId::topic_members(11), member),
            ])
            .await;

        assert!(backend.contains("channel:1:members"));
        assert!(backend.contains("topic:10:members"));
        assert!(backend.contains("topic:11:members"));
    }

    #[tokio::test]
    async fn test_backend_down_falls_back_to_store() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_available(false);
        let mut repo = MockMembershipRepository::new();
        repo.expect_find_members()
            .times(2)
            .returning(|_, _| Ok(vec![active(1)]));
        let cache = cache(backend, repo);
        let channel = CollectionId::channel_members(3);

        assert_eq!(cache.get_all(channel).await.unwrap().len(), 1);
        assert_eq!(cache.get_all(channel).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let mut repo = MockMembershipRepository::new();
        repo.expect_find_members()
            .returning(|_, _| Err(AppError::internal("Database error", json!({}))));
        let cache = cache(Arc::new(MemoryBackend::new()), repo);

        let result = cache.get_all(CollectionId::channel_members(1)).await;

        assert!(matches!(result, Err(AppError::Internal { .. })));
    }

    #[tokio::test]
    async fn test_get_member_falls_back_and_filters_status() {
        let backend = Arc::new(MemoryBackend::new());
        let mut repo = MockMembershipRepository::new();
        repo.expect_find_member()
            .withf(|_, id| *id == 4)
            .times(1)
            .returning(|_, _| Ok(Some(active(4))));
        repo.expect_find_member()
            .withf(|_, id| *id == 5)
            .times(1)
            .returning(|_, _| {
                Ok(Some(MemberRecord::new(
                    5,
                    MembershipStatus::Removed,
                    "member",
                    Utc::now(),
                )))
            });
        let cache = cache(backend, repo);
        let channel = CollectionId::channel_members(2);

        assert!(cache.get_member(channel, 4).await.unwrap().is_some());
        // Second read is served from the backfilled field.
        assert!(cache.get_member(channel, 4).await.unwrap().is_some());
        assert!(cache.get_member(channel, 5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reconcile_replaces_partial_hash() {
        let backend = Arc::new(MemoryBackend::new());
        let mut repo = MockMembershipRepository::new();
        repo.expect_find_members()
            .times(1)
            .returning(|_, _| Ok(vec![active(1), active(2)]));
        let cache = cache(backend, repo);
        let channel = CollectionId::channel_members(6);

        cache.add_member(channel, &active(99)).await;
        cache.reconcile(channel).await.unwrap();

        let ids: Vec<i64> = cache
            .get_all(channel)
            .await
            .unwrap()
            .iter()
            .map(|m| m.member_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_count_prefers_complete_hash() {
        let backend = Arc::new(MemoryBackend::new());
        let mut repo = MockMembershipRepository::new();
        repo.expect_count_members()
            .withf(|c, s| *c == CollectionId::topic_members(4) && *s == MembershipStatus::Active)
            .times(1)
            .returning(|_, _| Ok(12));
        repo.expect_find_members()
            .times(1)
            .returning(|_, _| Ok(vec![active(1), active(2), active(3)]));
        let cache = cache(backend, repo);

        assert_eq!(cache.count(CollectionId::topic_members(4)).await.unwrap(), 12);

        let channel = CollectionId::channel_members(4);
        cache.get_all(channel).await.unwrap();
        cache.remove_member(channel, 3).await;
        assert_eq!(cache.count(channel).await.unwrap(), 2);
        assert_eq!(cache.cached_len(channel).await, 2);
    }

    #[tokio::test]
    async fn test_count_after_point_mutation_uses_store() {
        let backend = Arc::new(MemoryBackend::new());
        let mut repo = MockMembershipRepository::new();
        repo.expect_count_members()
            .times(1)
            .returning(|_, _| Ok(6));
        let cache = cache(backend, repo);
        let channel = CollectionId::channel_members(12);

        // One join on a cold collection leaves a one-member subset in the hash.
        cache.add_member(channel, &active(6)).await;

        assert_eq!(cache.cached_len(channel).await, 1);
        assert_eq!(cache.count(channel).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_empty_collection_is_cached() {
        let backend = Arc::new(MemoryBackend::new());
        let mut repo = MockMembershipRepository::new();
        repo.expect_find_members()
            .times(1)
            .returning(|_, _| Ok(vec![]));
        repo.expect_count_members().times(0);
        let cache = cache(backend, repo);
        let requests = CollectionId::event_requests(2);

        assert!(cache.get_all(requests).await.unwrap().is_empty());
        assert!(cache.get_all(requests).await.unwrap().is_empty());
        assert_eq!(cache.count(requests).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bulk_add_batches_removals_per_collection() {
        let mut backend = MockCacheBackend::new();
        backend
            .expect_hdel()
            .withf(|key, fields| {
                let mut fields = fields.to_vec();
                fields.sort();
                key == "channel:1:members" && fields == ["3", "4"]
            })
            .times(1)
            .returning(|_, _| Ok(()));
        backend
            .expect_hdel()
            .withf(|key, fields| key == "topic:2:members" && fields == ["5"])
            .times(1)
            .returning(|_, _| Ok(()));
        backend
            .expect_hset_many()
            .withf(|writes, _| writes.len() == 1 && writes[0].field == "6")
            .times(1)
            .returning(|_, _| Ok(()));
        let cache = CollectionCache::new(
            Arc::new(backend),
            Arc::new(MockMembershipRepository::new()),
            3600,
        );
        let channel = CollectionId::channel_members(1);
        let left = |id| MemberRecord::new(id, MembershipStatus::Removed, "member", Utc::now());

        cache
            .bulk_add(&[
                (channel, left(3)),
                (channel, left(4)),
                (CollectionId::topic_members(2), left(5)),
                (channel, active(6)),
            ])
            .await;
    }

    #[tokio::test]
    async fn test_drop_collection_forces_recompute() {
        let backend = Arc::new(MemoryBackend::new());
        let mut repo = MockMembershipRepository::new();
        repo.expect_find_members()
            .times(1)
            .returning(|_, _| Ok(vec![active(1)]));
        let cache = cache(backend, repo);
        let channel = CollectionId::channel_members(8);

        cache.add_member(channel, &active(2)).await;
        cache.drop_collection(channel).await;

        let ids: Vec<i64> = cache
            .get_all(channel)
            .await
            .unwrap()
            .iter()
            .map(|m| m.member_id)
            .collect();
        assert_eq!(ids, vec![1]);
    }
}
