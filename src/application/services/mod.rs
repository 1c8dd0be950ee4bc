//! Cache-backed services for the application layer.

pub mod collection_cache;
pub mod tally_cache;
pub mod vote_service;

pub use collection_cache::CollectionCache;
pub use tally_cache::{GuardOutcome, TallyCache};
pub use vote_service::VoteService;
