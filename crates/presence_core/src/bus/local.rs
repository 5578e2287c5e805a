//! In-process implementation of the message bus.

use super::{MessageBus, Subscription, SubscriptionHandler, SubscriptionId};
use crate::error::BusError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

/// Default per-subscription queue length.
const DEFAULT_SUBSCRIPTION_BUFFER: usize = 256;

struct Subscriber {
    id: SubscriptionId,
    sender: mpsc::Sender<Arc<[u8]>>,
}

/// Counters describing bus traffic since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalBusStats {
    /// Accepted publish calls
    pub published: u64,
    /// Payloads queued to a subscriber
    pub delivered: u64,
    /// Payloads dropped because a subscriber queue was full or closing
    pub dropped: u64,
    /// Topics with at least one subscriber
    pub topics: usize,
    /// Active subscriptions across all topics
    pub subscriptions: usize,
}

/// Topic bus living inside the server process.
///
/// Every subscription owns a bounded queue drained by its own task, which runs
/// the handler. Publishing never waits on a subscriber: when a queue is full the
/// payload is dropped for that subscriber only.
pub struct LocalBus {
    topics: DashMap<String, Vec<Subscriber>>,
    buffer: usize,
    closed: AtomicBool,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIPTION_BUFFER)
    }

    /// Creates a bus whose subscription queues hold `buffer` payloads.
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer: buffer.max(1),
            closed: AtomicBool::new(false),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> LocalBusStats {
        LocalBusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            topics: self.topics.len(),
            subscriptions: self.topics.iter().map(|entry| entry.value().len()).sum(),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|subs| subs.len()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rejects further publishes and subscribes and releases every queue.
    ///
    /// Delivery tasks finish handling what is already queued, then exit.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.topics.clear();
            info!("Local message bus closed");
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        let Some(subscribers) = self.topics.get(topic) else {
            return Ok(());
        };

        let payload: Arc<[u8]> = payload.into();
        for subscriber in subscribers.iter() {
            match subscriber.sender.try_send(payload.clone()) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(topic, subscription = subscriber.id.0, "Subscriber queue full, dropping payload");
                }
                Err(TrySendError::Closed(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Subscription, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let id = SubscriptionId::new();
        let (sender, mut receiver) = mpsc::channel::<Arc<[u8]>>(self.buffer);

        let task_topic = topic.to_string();
        let delivery_task = tokio::spawn(async move {
            while let Some(payload) = receiver.recv().await {
                handler.handle(&task_topic, &payload).await;
            }
        });

        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { id, sender });

        debug!(topic, subscription = id.0, "Subscribed");
        Ok(Subscription::new(id, topic, Some(delivery_task)))
    }

    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), BusError> {
        let id = subscription.id();
        let topic = subscription.topic().to_string();

        // Dropping the sender ends the delivery task once its queue is empty.
        if let Some(mut subscribers) = self.topics.get_mut(&topic) {
            subscribers.retain(|subscriber| subscriber.id != id);
        }
        self.topics.remove_if(&topic, |_, subscribers| subscribers.is_empty());

        subscription.drained().await;
        debug!(topic = %topic, subscription = id.0, "Unsubscribed");
        Ok(())
    }
}
