//! Caching layer over the shared key-value backend.
//!
//! Provides a [`CacheBackend`] trait with three implementations:
//! - [`RedisBackend`] - Production Redis-backed backend
//! - [`MemoryBackend`] - In-process backend for tests and single-process development
//! - [`NullBackend`] - No-op implementation for disabled caching
//!
//! and the fail-open [`CacheStore`] that every caller reads and writes through.

mod backend;
mod memory_backend;
mod null_backend;
mod redis_backend;
mod store;

pub use backend::{CacheBackend, CacheError, CacheResult, HashWrite};
#[cfg(test)]
pub use backend::MockCacheBackend;
pub use memory_backend::MemoryBackend;
pub use null_backend::NullBackend;
pub use redis_backend::RedisBackend;
pub(crate) use redis_backend::escape_glob;
pub use store::{CacheStore, CachedEntity, decode_entity, encode_entity};
