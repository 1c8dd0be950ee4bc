//! Invalidation bus: cross-process "these keys are stale" propagation.
//!
//! ## How It Works
//!
//! ```text
//! Process A: authoritative write commits
//!   ↓
//! InvalidationBus::publish_broadcast(["user:42"], "user")
//!   ↓
//! Broker: fanout to every process's own queue
//!   ↓
//! Process B consumer: CacheStore::delete("user:42") → ack
//! Process C consumer: CacheStore::delete("user:42") → ack
//! ```
//!
//! Delivery is at-least-once while connected and lossy across consumer crashes;
//! eviction is idempotent, so duplicates are harmless and TTLs bound anything missed.
//!
//! - [`InvalidationBus`] - Publishing handle with bounded connect retry
//! - [`spawn_consumer`] - Per-process background consumer
//! - [`BusTransport`] - Broker seam: [`RedisPubSubTransport`] and [`MemoryBroker`]

mod consumer;
mod memory_broker;
mod publisher;
mod redis_transport;
mod transport;

pub use consumer::{ConsumerSettings, DeliveryOutcome, handle_delivery, spawn_consumer};
pub use memory_broker::MemoryBroker;
pub use publisher::{InvalidationBus, RetryPolicy, connect_with_retry};
pub use redis_transport::RedisPubSubTransport;
pub use transport::{
    BusError, BusResult, BusTransport, Delivery, Route, Settle, Settlement, Subscription,
    topic_matches,
};
