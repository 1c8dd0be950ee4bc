//! Liveness of the two shared resources this layer depends on.

use serde::Serialize;

use crate::infrastructure::bus::InvalidationBus;
use crate::infrastructure::cache::CacheStore;

/// Two independent reachability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub cache: bool,
    pub broker: bool,
}

impl CacheHealth {
    pub fn is_healthy(&self) -> bool {
        self.cache && self.broker
    }
}

/// Checks the cache backend and the broker concurrently.
pub async fn check(store: &CacheStore, bus: &InvalidationBus) -> CacheHealth {
    let (cache, broker) = tokio::join!(store.health_check(), bus.health_check());
    CacheHealth { cache, broker }
}
