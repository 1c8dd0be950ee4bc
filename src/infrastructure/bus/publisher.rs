//! Invalidation bus handle: connection lifecycle and the two publish entry points.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::redis_transport::RedisPubSubTransport;
use super::transport::{BusError, BusResult, BusTransport, Route};
use crate::domain::invalidation::InvalidationMessage;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info, warn};

/// Bounded retry budget for the initial broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts, including the first.
    pub attempts: usize,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(5),
        }
    }
}

/// Runs `connect` until it succeeds or `policy.attempts` are used up.
///
/// # Errors
///
/// Returns [`BusError::ConnectExhausted`] carrying the last failure once the budget
/// is spent.
pub async fn connect_with_retry<T, F, Fut>(policy: &RetryPolicy, mut connect: F) -> BusResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BusResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let strategy = FixedInterval::new(policy.delay).take(attempts - 1);
    let mut attempt = 0;

    Retry::spawn(strategy, || {
        attempt += 1;
        let current = attempt;
        let pending = connect();
        async move {
            pending.await.inspect_err(|e| {
                warn!(
                    attempt = current,
                    max_attempts = attempts,
                    error = %e,
                    "Broker connection attempt failed"
                );
            })
        }
    })
    .await
    .map_err(|e| BusError::ConnectExhausted {
        attempts,
        last_error: e.to_string(),
    })
}

/// Publishes "these keys are stale" events to every process.
///
/// Constructed explicitly and injected where needed; several independent instances
/// may coexist in one process. Publish only after the authoritative write has
/// committed.
#[derive(Clone)]
pub struct InvalidationBus {
    transport: Arc<dyn BusTransport>,
}

impl InvalidationBus {
    /// Wraps an already-connected transport.
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self { transport }
    }

    /// Connects to the Redis broker, retrying per `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectExhausted`] when every attempt failed. Callers treat
    /// this as fatal: without the bus, processes silently drift apart.
    pub async fn connect_redis(
        broker_url: &str,
        exchange: &str,
        policy: &RetryPolicy,
    ) -> BusResult<Self> {
        info!(exchange = %exchange, "Connecting to invalidation bus");
        let transport =
            connect_with_retry(policy, || RedisPubSubTransport::connect(broker_url, exchange))
                .await?;
        info!("✓ Connected to invalidation bus");
        Ok(Self::new(Arc::new(transport)))
    }

    pub fn transport(&self) -> Arc<dyn BusTransport> {
        self.transport.clone()
    }

    /// Fanout publish: every subscribed process receives the message.
    pub async fn publish_broadcast(&self, keys: Vec<String>, kind: &str) -> BusResult<()> {
        self.publish(&InvalidationMessage::new(keys, kind), Route::Broadcast)
            .await
    }

    /// Topic publish: delivered only to processes bound with a pattern matching
    /// `routing_key`.
    pub async fn publish_routed(
        &self,
        keys: Vec<String>,
        kind: &str,
        routing_key: &str,
    ) -> BusResult<()> {
        self.publish(
            &InvalidationMessage::new(keys, kind),
            Route::Routed(routing_key.to_string()),
        )
        .await
    }

    pub async fn publish(&self, message: &InvalidationMessage, route: Route) -> BusResult<()> {
        let payload = message
            .to_payload()
            .map_err(|e| BusError::Serialization(e.to_string()))?;
        self.transport.publish(&route, &payload).await?;
        debug!(keys = ?message.keys, kind = %message.kind, route = ?route, "Invalidation published");
        Ok(())
    }

    /// Checks if the broker channel is reachable.
    pub async fn health_check(&self) -> bool {
        self.transport.ping().await
    }
}
