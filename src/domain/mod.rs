//! Domain layer: entities, typed cache keys and repository contracts.
//!
//! # Architecture
//!
//! - [`entities`] - Members, polls and votes
//! - [`keys`] - Typed builder for the `<entity>:<id>[:<subresource>]` key namespace
//! - [`invalidation`] - The invalidation message exchanged over the bus
//! - [`repositories`] - Authoritative-store trait definitions
//!
//! The domain layer has no dependency on Redis or PostgreSQL.

pub mod entities;
pub mod invalidation;
pub mod keys;
pub mod repositories;
