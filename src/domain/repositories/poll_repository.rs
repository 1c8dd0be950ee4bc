//! Repository trait for polls.

use crate::domain::entities::Poll;
use crate::error::AppError;
use async_trait::async_trait;

/// Authoritative access to poll records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PollRepository: Send + Sync {
    /// Finds a poll by id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_by_id(&self, poll_id: i64) -> Result<Option<Poll>, AppError>;

    /// Moves an open poll to `Closed`.
    ///
    /// Returns `Ok(true)` if the poll was open and is now closed, `Ok(false)` if it
    /// was already closed or does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn close(&self, poll_id: i64) -> Result<bool, AppError>;
}
