//! In-process broker for tests and single-process development.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::transport::{
    BusError, BusResult, BusTransport, Delivery, Route, Settle, Settlement, Subscription,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

struct Queue {
    bindings: Vec<String>,
    sender: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct SettlementLog {
    acked: AtomicUsize,
    rejected: AtomicUsize,
}

struct MemorySettle(Arc<SettlementLog>);

impl Settle for MemorySettle {
    fn settle(self: Box<Self>, outcome: Settlement) {
        match outcome {
            Settlement::Ack => self.0.acked.fetch_add(1, Ordering::SeqCst),
            Settlement::Reject => self.0.rejected.fetch_add(1, Ordering::SeqCst),
        };
    }
}

/// Broker with fanout and topic exchanges held in process memory.
///
/// Share one instance between several [`super::InvalidationBus`]es to model
/// independent processes connected to the same broker. Every subscription gets its
/// own queue; a queue is deleted as soon as its subscription is dropped.
pub struct MemoryBroker {
    queues: Mutex<Vec<Queue>>,
    log: Arc<SettlementLog>,
    available: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Vec::new()),
            log: Arc::new(SettlementLog::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Makes publishes and new subscriptions fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Drops every queue, ending all live subscriptions as a lost connection would.
    pub fn disconnect_all(&self) {
        self.lock().clear();
    }

    /// Number of live queues.
    pub fn queue_count(&self) -> usize {
        let mut queues = self.lock();
        queues.retain(|q| !q.sender.is_closed());
        queues.len()
    }

    pub fn acked(&self) -> usize {
        self.log.acked.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.log.rejected.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Queue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusTransport for MemoryBroker {
    async fn publish(&self, route: &Route, payload: &[u8]) -> BusResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BusError::Publish("memory broker marked unavailable".to_string()));
        }

        let mut queues = self.lock();
        queues.retain(|q| !q.sender.is_closed());
        for queue in queues.iter().filter(|q| route.reaches(&q.bindings)) {
            let delivery = Delivery::new(
                payload.to_vec(),
                route.clone(),
                Some(Box::new(MemorySettle(self.log.clone()))),
            );
            // A queue whose consumer vanished mid-publish simply misses the message.
            let _ = queue.sender.send(delivery);
        }
        Ok(())
    }

    async fn subscribe(&self, bindings: &[String]) -> BusResult<Box<dyn Subscription>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BusError::Subscribe("memory broker marked unavailable".to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        self.lock().push(Queue {
            bindings: bindings.to_vec(),
            sender,
        });
        Ok(Box::new(MemorySubscription { receiver }))
    }

    async fn ping(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

struct MemorySubscription {
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }
}
