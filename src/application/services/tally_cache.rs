//! Atomic per-poll vote tallies and the per-voter dedup guard.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::entities::{ChoiceCount, VoteSummary, VoterKey};
use crate::domain::keys::CacheKey;
use crate::domain::repositories::VoteRepository;
use crate::error::AppError;
use crate::infrastructure::cache::{CacheBackend, HashWrite};
use metrics::counter;
use tracing::{debug, warn};

/// Result of trying to claim a voter's dedup slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// This call created the slot; the caller is the first to vote.
    Claimed,
    /// The slot already existed; the voter has voted before.
    AlreadyVoted,
    /// The backend could not be reached. The authoritative store's uniqueness
    /// constraint is the only remaining guard.
    Unavailable,
}

/// Cache of `(poll, choice) -> count` plus a `(poll, voter) -> choice` guard.
///
/// ## Key Layout
///
/// ```text
/// poll:<id>:tally    hash  choice -> count
/// poll:<id>:voters   hash  voter  -> choice
/// ```
///
/// Counts are only ever incremented atomically in the backend, never
/// read-modify-written, so concurrent votes from any number of processes are all
/// counted. A cold tally is rebuilt from the vote rows rather than seeded by an
/// increment, so a partial count is never mistaken for the full one. The TTL bounds
/// how long a drifted tally can survive.
pub struct TallyCache<V: VoteRepository> {
    backend: Arc<dyn CacheBackend>,
    votes: Arc<V>,
    ttl_seconds: u64,
}

impl<V: VoteRepository> TallyCache<V> {
    /// Creates a tally cache; `ttl_seconds` comes from `TALLY_TTL_SECONDS`.
    pub fn new(backend: Arc<dyn CacheBackend>, votes: Arc<V>, ttl_seconds: u64) -> Self {
        Self {
            backend,
            votes,
            ttl_seconds,
        }
    }

    /// Atomically adds one vote for `choice`.
    ///
    /// Returns the new count, or `None` when the tally is cold (the next read
    /// rebuilds it from the vote rows, which already include this vote) or the
    /// backend is unreachable.
    pub async fn increment_choice(&self, poll_id: i64, choice: &str) -> Option<i64> {
        let key = CacheKey::poll_tally(poll_id).to_string();
        match self.backend.hincr_existing(&key, choice, 1).await {
            Ok(Some(count)) => {
                debug!("Tally HINCRBY: {} {} -> {}", key, choice, count);
                Some(count)
            }
            Ok(None) => {
                debug!("Tally cold, increment skipped: {}", key);
                None
            }
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Tally HINCRBY error for {}: {}", key, e);
                None
            }
        }
    }

    /// Returns the per-choice counts for one poll.
    ///
    /// On a cold tally, aggregates the vote rows and populates the hash. A poll with
    /// no votes yields an empty summary and leaves no hash behind.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] only when the authoritative store fails.
    pub async fn get_summary(&self, poll_id: i64) -> Result<VoteSummary, AppError> {
        let key = CacheKey::poll_tally(poll_id).to_string();

        match self.backend.hgetall(&key).await {
            Ok(fields) if !fields.is_empty() => {
                counter!("cache_hits_total").increment(1);
                return Ok(VoteSummary::new(poll_id, parse_counts(&key, fields)));
            }
            Ok(_) => counter!("cache_misses_total").increment(1),
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Tally HGETALL error for {}: {}", key, e);
            }
        }

        let rows = self.votes.count_by_choice(&[poll_id]).await?;
        let summary = summaries_from_rows(&[poll_id], rows)
            .remove(&poll_id)
            .unwrap_or_else(|| VoteSummary::empty(poll_id));

        let fields: Vec<(String, String)> = summary
            .counts
            .iter()
            .map(|(choice, count)| (choice.clone(), count.to_string()))
            .collect();
        if !fields.is_empty()
            && let Err(e) = self
                .backend
                .replace_hash(&key, &fields, self.ttl_seconds)
                .await
        {
            counter!("cache_backend_errors_total").increment(1);
            warn!("Tally populate error for {}: {}", key, e);
        }
        Ok(summary)
    }

    /// Returns summaries for many polls, in the order of `poll_ids`.
    ///
    /// Cached tallies are read in one round trip; every miss is recomputed with a
    /// single aggregate query and written back with a single batched write.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] only when the authoritative store fails.
    pub async fn get_summaries(&self, poll_ids: &[i64]) -> Result<Vec<VoteSummary>, AppError> {
        if poll_ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = poll_ids
            .iter()
            .map(|id| CacheKey::poll_tally(*id).to_string())
            .collect();

        let cached = match self.backend.hgetall_many(&keys).await {
            Ok(hashes) => hashes,
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Tally HGETALL batch error for {} polls: {}", keys.len(), e);
                vec![HashMap::new(); keys.len()]
            }
        };

        let mut found: HashMap<i64, VoteSummary> = HashMap::new();
        let mut misses = Vec::new();
        for ((poll_id, key), fields) in poll_ids.iter().zip(&keys).zip(cached) {
            if fields.is_empty() {
                misses.push(*poll_id);
            } else {
                found.insert(*poll_id, VoteSummary::new(*poll_id, parse_counts(key, fields)));
            }
        }
        counter!("cache_hits_total").increment(found.len() as u64);
        counter!("cache_misses_total").increment(misses.len() as u64);

        if !misses.is_empty() {
            let rows = self.votes.count_by_choice(&misses).await?;
            let recomputed = summaries_from_rows(&misses, rows);

            let writes: Vec<HashWrite> = recomputed
                .values()
                .flat_map(|summary| {
                    let key = CacheKey::poll_tally(summary.poll_id).to_string();
                    summary
                        .counts
                        .iter()
                        .map(move |(choice, count)| {
                            HashWrite::new(key.clone(), choice.clone(), count.to_string())
                        })
                })
                .collect();
            if let Err(e) = self.backend.hset_many(&writes, self.ttl_seconds).await {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Tally populate error for {} polls: {}", misses.len(), e);
            }
            found.extend(recomputed);
        }

        Ok(poll_ids
            .iter()
            .map(|id| {
                found
                    .get(id)
                    .cloned()
                    .unwrap_or_else(|| VoteSummary::empty(*id))
            })
            .collect())
    }

    /// Claims the dedup slot for `voter` on `poll_id`, recording their choice.
    pub async fn record_voter_choice(
        &self,
        poll_id: i64,
        voter: VoterKey,
        choice: &str,
    ) -> GuardOutcome {
        let key = CacheKey::poll_voters(poll_id).to_string();
        match self
            .backend
            .hsetnx(&key, &voter.to_string(), choice, self.ttl_seconds)
            .await
        {
            Ok(true) => GuardOutcome::Claimed,
            Ok(false) => GuardOutcome::AlreadyVoted,
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Voter guard HSETNX error for {}: {}", key, e);
                GuardOutcome::Unavailable
            }
        }
    }

    /// Returns the choice `voter` made on `poll_id`, if any.
    ///
    /// Falls back to the vote rows when the guard has no entry and backfills it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] only when the authoritative store fails.
    pub async fn has_voted(
        &self,
        poll_id: i64,
        voter: VoterKey,
    ) -> Result<Option<String>, AppError> {
        let key = CacheKey::poll_voters(poll_id).to_string();
        let field = voter.to_string();

        match self.backend.hget(&key, &field).await {
            Ok(Some(choice)) => return Ok(Some(choice)),
            Ok(None) => {}
            Err(e) => {
                counter!("cache_backend_errors_total").increment(1);
                warn!("Voter guard HGET error for {}: {}", key, e);
            }
        }

        let choice = self.votes.find_choice(poll_id, voter).await?;
        if let Some(choice) = &choice {
            self.record_voter_choice(poll_id, voter, choice).await;
        }
        Ok(choice)
    }

    /// Releases a claimed slot so the voter can retry after a failed persist.
    pub async fn release_voter(&self, poll_id: i64, voter: VoterKey) {
        let key = CacheKey::poll_voters(poll_id).to_string();
        if let Err(e) = self.backend.hdel(&key, &[voter.to_string()]).await {
            counter!("cache_backend_errors_total").increment(1);
            warn!("Voter guard HDEL error for {}: {}", key, e);
        }
    }
}

fn parse_counts(key: &str, fields: HashMap<String, String>) -> BTreeMap<String, i64> {
    fields
        .into_iter()
        .filter_map(|(choice, raw)| match raw.parse::<i64>() {
            Ok(count) => Some((choice, count)),
            Err(_) => {
                warn!("Skipping non-numeric tally {} in {}", choice, key);
                None
            }
        })
        .collect()
}

/// Groups aggregate rows into one summary per requested poll with at least one vote.
fn summaries_from_rows(poll_ids: &[i64], rows: Vec<ChoiceCount>) -> HashMap<i64, VoteSummary> {
    let mut summaries: HashMap<i64, VoteSummary> = HashMap::new();
    for row in rows {
        if !poll_ids.contains(&row.poll_id) || row.count <= 0 {
            continue;
        }
        summaries
            .entry(row.poll_id)
            .or_insert_with(|| VoteSummary::empty(row.poll_id))
            .counts
            .insert(row.choice, row.count);
    }
    summaries
}
