//! Invalidation message model shared by publishers and consumers.
//!
//! Wire format (JSON payload):
//!
//! ```json
//! { "keys": ["user:42", "topic:9:*"], "type": "user" }
//! ```
//!
//! Routed publishes carry their routing key at the transport layer, never in the payload.

use serde::{Deserialize, Serialize};

use crate::domain::keys::{CacheKey, KeyPattern};

/// "These cache keys are stale" event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub keys: Vec<String>,
    /// Diagnostic tag describing what triggered the invalidation.
    #[serde(rename = "type")]
    pub kind: String,
}

impl InvalidationMessage {
    pub fn new(keys: Vec<String>, kind: impl Into<String>) -> Self {
        Self {
            keys,
            kind: kind.into(),
        }
    }

    pub fn for_keys(keys: &[CacheKey], kind: impl Into<String>) -> Self {
        Self::new(keys.iter().map(ToString::to_string).collect(), kind)
    }

    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }

    /// Classifies every key, skipping entries that can't be safely acted on.
    pub fn targets(&self) -> Vec<InvalidationTarget> {
        self.keys
            .iter()
            .filter_map(|raw| InvalidationTarget::parse(raw))
            .collect()
    }
}

/// One entry of an invalidation message, classified by how it must be evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    Literal(String),
    Prefix(KeyPattern),
}

impl InvalidationTarget {
    /// A trailing `*` marks a prefix. Returns `None` for an empty key or a bare `*`,
    /// which would otherwise wipe the entire keyspace.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.strip_suffix('*') {
            Some(prefix) => KeyPattern::prefix(prefix).map(Self::Prefix),
            None if raw.is_empty() => None,
            None => Some(Self::Literal(raw.to_string())),
        }
    }
}
