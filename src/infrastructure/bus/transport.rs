//! Broker transport seam and delivery settlement.

use async_trait::async_trait;

/// Errors raised by the invalidation bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Broker connection error: {0}")]
    Connection(String),
    #[error("Broker publish error: {0}")]
    Publish(String),
    #[error("Broker subscribe error: {0}")]
    Subscribe(String),
    #[error("Invalidation message serialization error: {0}")]
    Serialization(String),
    #[error("Broker unreachable after {attempts} connection attempts: {last_error}")]
    ConnectExhausted { attempts: usize, last_error: String },
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// How a message travels from the publisher to consumer queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Fanout: delivered to every bound queue.
    Broadcast,
    /// Topic: delivered to queues whose binding pattern matches the routing key.
    Routed(String),
}

impl Route {
    /// Whether a queue bound with `bindings` receives a message on this route.
    pub fn reaches(&self, bindings: &[String]) -> bool {
        match self {
            Self::Broadcast => true,
            Self::Routed(routing_key) => bindings.iter().any(|b| topic_matches(b, routing_key)),
        }
    }
}

/// Topic-exchange binding match.
///
/// Both sides are dot-separated words. In the pattern, `*` matches exactly one
/// word and `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.first(), key.first()) {
        (None, None) => true,
        (Some(&"#"), _) => {
            match_words(&pattern[1..], key) || (!key.is_empty() && match_words(pattern, &key[1..]))
        }
        (Some(&"*"), Some(_)) => match_words(&pattern[1..], &key[1..]),
        (Some(word), Some(part)) if word == part => match_words(&pattern[1..], &key[1..]),
        _ => false,
    }
}

/// Final disposition of a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    /// Negative acknowledgement without requeue: the message is discarded.
    Reject,
}

/// Transport-specific settlement hook attached to a [`Delivery`].
pub trait Settle: Send {
    fn settle(self: Box<Self>, outcome: Settlement);
}

/// One message received from a subscription.
pub struct Delivery {
    pub payload: Vec<u8>,
    pub route: Route,
    settle: Option<Box<dyn Settle>>,
}

impl Delivery {
    /// Creates a delivery. `settle` is `None` for transports without acknowledgements.
    pub fn new(payload: Vec<u8>, route: Route, settle: Option<Box<dyn Settle>>) -> Self {
        Self {
            payload,
            route,
            settle,
        }
    }

    pub fn ack(mut self) {
        if let Some(settle) = self.settle.take() {
            settle.settle(Settlement::Ack);
        }
    }

    pub fn reject(mut self) {
        if let Some(settle) = self.settle.take() {
            settle.settle(Settlement::Reject);
        }
    }
}

/// A process-exclusive queue bound to the invalidation exchanges.
///
/// Dropping the subscription deletes the queue.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message. `None` means the subscription was lost and the
    /// caller must subscribe again.
    async fn next_delivery(&mut self) -> Option<Delivery>;
}

/// Broker operations required by the invalidation bus.
///
/// # Implementations
///
/// - [`super::RedisPubSubTransport`] - Redis pub/sub
/// - [`super::MemoryBroker`] - In-process broker for tests
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish(&self, route: &Route, payload: &[u8]) -> BusResult<()>;

    /// Creates this process's own queue, bound to the fanout exchange and to the
    /// topic exchange with each of `bindings`.
    async fn subscribe(&self, bindings: &[String]) -> BusResult<Box<dyn Subscription>>;

    /// Checks broker reachability.
    async fn ping(&self) -> bool;
}
