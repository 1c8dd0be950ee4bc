//! Background invalidation consumer, one per process.

use std::sync::Arc;
use std::time::Duration;

use super::transport::{BusTransport, Delivery};
use crate::domain::invalidation::{InvalidationMessage, InvalidationTarget};
use crate::infrastructure::cache::CacheStore;
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Topic binding patterns for this process's queue (`BUS_BINDINGS`).
    pub bindings: Vec<String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            bindings: vec!["#".to_string()],
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// All targets were evicted and the message acknowledged.
    Evicted { targets: usize },
    /// The payload could not be parsed; the message was rejected without requeue.
    Dropped,
}

/// Evicts every key named by one delivery, then settles it.
///
/// Literal keys go through [`CacheStore::delete`], prefixes through
/// [`CacheStore::delete_pattern`]. The message is acknowledged only after all
/// deletes have completed. An unparseable payload is rejected without requeue so
/// it can't loop forever; entry TTLs bound the resulting staleness.
pub async fn handle_delivery(store: &CacheStore, delivery: Delivery) -> DeliveryOutcome {
    let message = match InvalidationMessage::from_payload(&delivery.payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(route = ?delivery.route, error = %e, "Dropping malformed invalidation message");
            counter!("bus_messages_total", "outcome" => "dropped").increment(1);
            delivery.reject();
            return DeliveryOutcome::Dropped;
        }
    };

    let targets = message.targets();
    for target in &targets {
        match target {
            InvalidationTarget::Literal(key) => store.delete(key).await,
            InvalidationTarget::Prefix(pattern) => {
                store.delete_pattern(pattern).await;
            }
        }
    }

    debug!(kind = %message.kind, keys = ?message.keys, "Applied invalidation");
    counter!("bus_messages_total", "outcome" => "evicted").increment(1);
    delivery.ack();
    DeliveryOutcome::Evicted {
        targets: targets.len(),
    }
}

/// Spawns the long-lived consumer task.
///
/// The task subscribes this process's own queue and applies every delivery to
/// `store`. A lost subscription is re-established in the background with
/// exponential backoff; request handling elsewhere in the process is unaffected.
/// The task ends once `shutdown` changes or its sender is dropped.
pub fn spawn_consumer(
    transport: Arc<dyn BusTransport>,
    store: Arc<CacheStore>,
    settings: ConsumerSettings,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_consumer(transport, store, settings, shutdown))
}

async fn run_consumer(
    transport: Arc<dyn BusTransport>,
    store: Arc<CacheStore>,
    settings: ConsumerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = settings.initial_backoff;

    loop {
        match transport.subscribe(&settings.bindings).await {
            Ok(mut subscription) => {
                info!("Invalidation consumer started");
                backoff = settings.initial_backoff;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            info!("Invalidation consumer stopped");
                            return;
                        }
                        delivery = subscription.next_delivery() => match delivery {
                            Some(delivery) => {
                                handle_delivery(&store, delivery).await;
                            }
                            None => {
                                warn!("Invalidation subscription lost, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                error!(
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "Invalidation consumer failed to subscribe, retrying"
                );
            }
        }

        tokio::select! {
            _ = shutdown.changed() => {
                info!("Invalidation consumer stopped");
                return;
            }
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(settings.max_backoff);
    }
}
