//! Repository trait definitions for the authoritative store.
//!
//! The cache layer consumes these traits exclusively for read-through
//! recomputation and reconciliation. Concrete implementations live in
//! `crate::infrastructure::persistence`; mocks are generated via `mockall`.
//!
//! # Available Repositories
//!
//! - [`MembershipRepository`] - Channel, topic and event membership
//! - [`PollRepository`] - Poll records and lifecycle
//! - [`VoteRepository`] - Individual votes and per-choice aggregation

pub mod membership_repository;
pub mod poll_repository;
pub mod vote_repository;

pub use membership_repository::MembershipRepository;
pub use poll_repository::PollRepository;
pub use vote_repository::VoteRepository;

#[cfg(test)]
pub use membership_repository::MockMembershipRepository;
#[cfg(test)]
pub use poll_repository::MockPollRepository;
#[cfg(test)]
pub use vote_repository::MockVoteRepository;
