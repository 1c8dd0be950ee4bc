//! Infrastructure layer for external integrations.
//!
//! This layer implements the seams the rest of the crate depends on.
//!
//! # Modules
//!
//! - [`cache`] - Shared key-value backend (Redis, in-memory, no-op) and the fail-open store
//! - [`bus`] - Invalidation bus over the message broker
//! - [`persistence`] - PostgreSQL implementations of the authoritative-store repositories
//! - [`health`] - Liveness of the cache backend and broker channel

pub mod bus;
pub mod cache;
pub mod health;
pub mod persistence;
