//! Repository trait for collection membership in the authoritative store.

use crate::domain::entities::{CollectionId, MemberRecord, MembershipStatus};
use crate::error::AppError;
use async_trait::async_trait;

/// Authoritative access to collection membership.
///
/// Used only for read-through recomputation; steady-state reads are served
/// from [`crate::application::services::CollectionCache`].
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgMembershipRepository`] - PostgreSQL implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Lists every member of `collection` with the given status.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_members(
        &self,
        collection: CollectionId,
        status: MembershipStatus,
    ) -> Result<Vec<MemberRecord>, AppError>;

    /// Finds one member of `collection` regardless of status.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn find_member(
        &self,
        collection: CollectionId,
        member_id: i64,
    ) -> Result<Option<MemberRecord>, AppError>;

    /// Counts members of `collection` with the given status.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Internal`] on database errors.
    async fn count_members(
        &self,
        collection: CollectionId,
        status: MembershipStatus,
    ) -> Result<i64, AppError>;
}
