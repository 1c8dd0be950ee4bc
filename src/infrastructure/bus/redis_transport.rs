//! Redis pub/sub transport for the invalidation bus.

use super::transport::{BusError, BusResult, BusTransport, Delivery, Route, Subscription};
use crate::infrastructure::cache::escape_glob;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use redis::{AsyncCommands, Client, Msg, aio::ConnectionManager};
use tracing::{debug, info};

/// Invalidation transport over Redis pub/sub.
///
/// ## Channel Layout
///
/// ```text
/// <exchange>:fanout              broadcast messages
/// <exchange>:topic:<routingKey>  routed messages
/// ```
///
/// Each subscription opens a dedicated pub/sub connection, which behaves like an
/// exclusive auto-deleted queue: every subscribed process receives every message
/// published after it subscribed, and the queue vanishes with the connection.
/// Topic bindings are evaluated locally against the routing key so the full
/// `*`/`#` semantics apply. Pub/sub has no acknowledgements, so settlement is a no-op.
pub struct RedisPubSubTransport {
    client: Client,
    publisher: ConnectionManager,
    exchange: String,
}

impl RedisPubSubTransport {
    /// Connects the publishing connection and validates it with a PING.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connection`] if the URL is invalid or the broker is unreachable.
    pub async fn connect(broker_url: &str, exchange: &str) -> BusResult<Self> {
        let client = Client::open(broker_url)
            .map_err(|e| BusError::Connection(format!("Failed to create broker client: {}", e)))?;

        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Connection(format!("Failed to connect to broker: {}", e)))?;

        let mut test_conn = publisher.clone();
        test_conn
            .ping::<()>()
            .await
            .map_err(|e| BusError::Connection(format!("Broker PING failed: {}", e)))?;

        Ok(Self {
            client,
            publisher,
            exchange: exchange.to_string(),
        })
    }

    fn fanout_channel(&self) -> String {
        format!("{}:fanout", self.exchange)
    }

    fn topic_prefix(&self) -> String {
        format!("{}:topic:", self.exchange)
    }

    fn channel_for(&self, route: &Route) -> String {
        match route {
            Route::Broadcast => self.fanout_channel(),
            Route::Routed(routing_key) => format!("{}{}", self.topic_prefix(), routing_key),
        }
    }
}

#[async_trait]
impl BusTransport for RedisPubSubTransport {
    async fn publish(&self, route: &Route, payload: &[u8]) -> BusResult<()> {
        let channel = self.channel_for(route);
        let mut conn = self.publisher.clone();
        let receivers = conn
            .publish::<_, _, i64>(&channel, payload)
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        debug!(channel = %channel, receivers, "Published invalidation");
        Ok(())
    }

    async fn subscribe(&self, bindings: &[String]) -> BusResult<Box<dyn Subscription>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BusError::Subscribe(format!("failed to get pub/sub connection: {e}")))?;

        let fanout = self.fanout_channel();
        let topic_prefix = self.topic_prefix();

        pubsub
            .subscribe(&fanout)
            .await
            .map_err(|e| BusError::Subscribe(format!("failed to subscribe: {e}")))?;
        if !bindings.is_empty() {
            pubsub
                .psubscribe(format!("{}*", escape_glob(&topic_prefix)))
                .await
                .map_err(|e| BusError::Subscribe(format!("failed to psubscribe: {e}")))?;
        }

        info!(channel = %fanout, bindings = ?bindings, "Subscribed to invalidation exchange");

        Ok(Box::new(RedisSubscription {
            stream: pubsub.into_on_message().boxed(),
            fanout,
            topic_prefix,
            bindings: bindings.to_vec(),
        }))
    }

    async fn ping(&self) -> bool {
        let mut conn = self.publisher.clone();
        conn.ping::<()>().await.is_ok()
    }
}

struct RedisSubscription {
    stream: BoxStream<'static, Msg>,
    fanout: String,
    topic_prefix: String,
    bindings: Vec<String>,
}

impl RedisSubscription {
    fn route_of(&self, channel: &str) -> Option<Route> {
        if channel == self.fanout {
            return Some(Route::Broadcast);
        }
        channel
            .strip_prefix(&self.topic_prefix)
            .map(|routing_key| Route::Routed(routing_key.to_string()))
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            let msg = self.stream.next().await?;
            let Some(route) = self.route_of(msg.get_channel_name()) else {
                continue;
            };
            if !route.reaches(&self.bindings) {
                continue;
            }
            return Some(Delivery::new(msg.get_payload_bytes().to_vec(), route, None));
        }
    }
}
