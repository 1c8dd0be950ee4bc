//! PostgreSQL repository implementations of the authoritative store.
//!
//! Queries are checked at runtime (`sqlx::query_as`) so the crate builds without
//! a live database.
//!
//! # Repositories
//!
//! - [`PgMembershipRepository`] - Channel, topic and event membership
//! - [`PgPollRepository`] - Poll records and lifecycle
//! - [`PgVoteRepository`] - Individual votes and per-choice aggregation

pub mod pg_membership_repository;
pub mod pg_poll_repository;
pub mod pg_vote_repository;

pub use pg_membership_repository::PgMembershipRepository;
pub use pg_poll_repository::PgPollRepository;
pub use pg_vote_repository::PgVoteRepository;
