//! Repository trait for vote rows, the system of record for tallies.

use crate::domain::entities::{ChoiceCount, NewVote, Vote, VoterKey};
use crate::error::AppError;
use async_trait::async_trait;

/// Authoritative access to individual votes.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgVoteRepository`] - PostgreSQL implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoteRepository: Send + Sync {
    /// Durably persists a vote, provided the poll is open at commit time.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] if the poll is not open.
    /// Returns [`AppError::Conflict`] if the voter already voted on this poll.
    /// Returns [`AppError::Internal`] on database errors.
    async fn insert_vote(&self, new_vote: NewVote) -> Result<Vote, AppError>;

    /// Returns the choice `voter` made on `poll_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_choice(&self, poll_id: i64, voter: VoterKey)
    -> Result<Option<String>, AppError>;

    /// Aggregates raw vote rows grouped by `(poll, choice)` for every poll in `poll_ids`.
    ///
    /// Polls without votes produce no rows.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn count_by_choice(&self, poll_ids: &[i64]) -> Result<Vec<ChoiceCount>, AppError>;
}
