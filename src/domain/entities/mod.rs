//! Core domain entities mirrored by the cache layer.
//!
//! Entities are plain data structures. The authoritative store owns them; the
//! cache only ever holds projections of them.
//!
//! # Entity Types
//!
//! - [`MemberRecord`] - One member of a named collection (channel, topic, event)
//! - [`Poll`] - A poll and its lifecycle state
//! - [`Vote`] - A persisted vote row
//! - [`VoteSummary`] - Per-choice tallies derived from vote rows
//!
//! Creation inputs use separate structs (`NewVote`), matching the rest of the crate.

pub mod member;
pub mod poll;
pub mod vote;

pub use member::{CollectionId, CollectionKind, MemberRecord, MembershipStatus};
pub use poll::{Poll, PollStatus, VoteSummary};
pub use vote::{ChoiceCount, NewVote, Vote, VoterKey};
