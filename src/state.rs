//! Shared application state injected into HTTP handlers.

use std::sync::Arc;

use crate::infrastructure::bus::InvalidationBus;
use crate::infrastructure::cache::CacheStore;

/// State shared by all handlers.
///
/// Cloned per request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CacheStore>,
    pub bus: InvalidationBus,
}

impl AppState {
    pub fn new(store: Arc<CacheStore>, bus: InvalidationBus) -> Self {
        Self { store, bus }
    }
}
