//! Application layer services built on the cache primitives.
//!
//! Services consume repository traits for read-through recomputation and the
//! shared cache backend for everything else. Backend failures never surface from
//! a service; only authoritative store errors do.
//!
//! # Available Services
//!
//! - [`services::collection_cache::CollectionCache`] - Membership hashes for channels, topics and events
//! - [`services::tally_cache::TallyCache`] - Atomic vote counts and the voter dedup guard
//! - [`services::vote_service::VoteService`] - Voting flow that ties tallies to the invalidation bus

pub mod services;
