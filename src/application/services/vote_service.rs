//! Poll voting flow built on the tally cache and the invalidation bus.

use std::sync::Arc;

use super::tally_cache::{GuardOutcome, TallyCache};
use crate::domain::entities::{NewVote, Poll, Vote, VoteSummary, VoterKey};
use crate::domain::keys::{CacheKey, EntityKind};
use crate::domain::repositories::{PollRepository, VoteRepository};
use crate::error::AppError;
use crate::infrastructure::bus::InvalidationBus;
use crate::infrastructure::cache::{CacheStore, CachedEntity};
use serde_json::json;
use tracing::{info, warn};

impl CachedEntity for Poll {
    const SCHEMA_VERSION: u32 = 1;
}

/// Casts votes, closes polls and serves tallies.
///
/// The authoritative store is written first; cache updates and invalidation
/// broadcasts follow only after it has committed.
pub struct VoteService<P: PollRepository, V: VoteRepository> {
    polls: Arc<P>,
    votes: Arc<V>,
    tally: Arc<TallyCache<V>>,
    store: Arc<CacheStore>,
    bus: InvalidationBus,
}

impl<P: PollRepository, V: VoteRepository> VoteService<P, V> {
    pub fn new(
        polls: Arc<P>,
        votes: Arc<V>,
        tally: Arc<TallyCache<V>>,
        store: Arc<CacheStore>,
        bus: InvalidationBus,
    ) -> Self {
        Self {
            polls,
            votes,
            tally,
            store,
            bus,
        }
    }

    /// Loads a poll through the cache.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the poll does not exist.
    pub async fn get_poll(&self, poll_id: i64) -> Result<Poll, AppError> {
        let key = CacheKey::new(EntityKind::Poll, poll_id);
        if let Some(poll) = self.store.get::<Poll>(&key).await {
            return Ok(poll);
        }

        let poll = self
            .polls
            .find_by_id(poll_id)
            .await?
            .ok_or_else(|| AppError::not_found("Poll not found", json!({ "poll_id": poll_id })))?;
        self.store.set(&key, &poll, None).await;
        Ok(poll)
    }

    /// Records one vote.
    ///
    /// # Flow
    ///
    /// 1. Validate the poll is open and `choice` is one of its options
    /// 2. Reject voters that already voted (guard first, vote rows on a guard miss)
    /// 3. Claim the voter guard
    /// 4. Persist the vote, only while the poll is still open in the database
    /// 5. Atomically increment the cached tally
    ///
    /// The cached poll is only a fast path; the insert rechecks the poll status, so
    /// a poll closed by another process never takes a vote even when this process
    /// still holds it as open. Any persist failure releases a claimed guard. On a
    /// uniqueness conflict the guard is then resynced from the stored vote.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the poll does not exist.
    /// Returns [`AppError::Validation`] if the poll is closed or the choice is unknown.
    /// Returns [`AppError::Conflict`] if the voter already voted.
    pub async fn cast_vote(
        &self,
        poll_id: i64,
        voter: VoterKey,
        choice: &str,
    ) -> Result<Vote, AppError> {
        let poll = self.get_poll(poll_id).await?;
        if !poll.status.accepts_votes() {
            return Err(AppError::bad_request(
                "Poll is closed",
                json!({ "poll_id": poll_id }),
            ));
        }
        if !poll.has_option(choice) {
            return Err(AppError::bad_request(
                "Invalid choice",
                json!({ "poll_id": poll_id, "choice": choice, "options": poll.options }),
            ));
        }

        if self.tally.has_voted(poll_id, voter).await?.is_some() {
            return Err(already_voted(poll_id, voter));
        }

        let guard = self.tally.record_voter_choice(poll_id, voter, choice).await;
        if guard == GuardOutcome::AlreadyVoted {
            return Err(already_voted(poll_id, voter));
        }

        let new_vote = NewVote {
            poll_id,
            voter,
            choice: choice.to_string(),
        };
        let vote = match self.votes.insert_vote(new_vote).await {
            Ok(vote) => vote,
            Err(e) => {
                if guard == GuardOutcome::Claimed {
                    self.tally.release_voter(poll_id, voter).await;
                }
                match &e {
                    // The stored vote wins; point the guard at its choice.
                    AppError::Conflict { .. } => {
                        if let Err(resync) = self.tally.has_voted(poll_id, voter).await {
                            warn!(poll_id, error = %resync, "Failed to resync voter guard");
                        }
                    }
                    // The poll closed after it was read; drop the stale copy.
                    AppError::Validation { .. } => {
                        let key = CacheKey::new(EntityKind::Poll, poll_id).to_string();
                        self.store.delete(&key).await;
                    }
                    _ => {}
                }
                return Err(e);
            }
        };

        self.tally.increment_choice(poll_id, choice).await;
        Ok(vote)
    }

    /// Closes a poll.
    ///
    /// Idempotent: closing an already-closed poll returns `Ok(false)`. After the
    /// close commits, the cached poll is evicted locally and broadcast to every
    /// process. A failed broadcast is logged; the entry's TTL bounds the staleness.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the poll does not exist.
    pub async fn close_poll(&self, poll_id: i64) -> Result<bool, AppError> {
        if !self.polls.close(poll_id).await? {
            return match self.polls.find_by_id(poll_id).await? {
                Some(_) => Ok(false),
                None => Err(AppError::not_found(
                    "Poll not found",
                    json!({ "poll_id": poll_id }),
                )),
            };
        }

        let key = CacheKey::new(EntityKind::Poll, poll_id).to_string();
        self.store.delete(&key).await;
        if let Err(e) = self
            .bus
            .publish_broadcast(vec![key.clone()], EntityKind::Poll.as_str())
            .await
        {
            warn!(key = %key, error = %e, "Failed to broadcast poll invalidation");
        }
        info!(poll_id, "Poll closed");
        Ok(true)
    }

    /// Returns the tally of one poll.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] if the poll does not exist.
    pub async fn summary(&self, poll_id: i64) -> Result<VoteSummary, AppError> {
        self.get_poll(poll_id).await?;
        self.tally.get_summary(poll_id).await
    }

    /// Returns tallies for many polls at once, in the order given.
    pub async fn summaries(&self, poll_ids: &[i64]) -> Result<Vec<VoteSummary>, AppError> {
        self.tally.get_summaries(poll_ids).await
    }
}

fn already_voted(poll_id: i64, voter: VoterKey) -> AppError {
    AppError::conflict(
        "Voter already voted on this poll",
        json!({ "poll_id": poll_id, "voter": voter.to_string() }),
    )
}
