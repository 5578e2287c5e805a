//! # Message Bus
//!
//! Topic-addressed publish/subscribe used to fan cell snapshots out to every
//! session whose area of interest covers the cell.
//!
//! The contract is deliberately weak: delivery is at-most-once and there is no
//! ordering across topics. Subscriptions are explicit objects; handing one back
//! through [`MessageBus::unsubscribe`] stops new deliveries and only returns once
//! deliveries already queued for it have been handled, so a closing session
//! never receives traffic after it has unsubscribed.

mod local;

pub use local::{LocalBus, LocalBusStats};

use crate::error::BusError;
use crate::types::{PlayerId, Position};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Envelope carried on a cell topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorldEvent {
    /// Full snapshot of a cell's players, published once per tick
    Positions { positions: Vec<Position> },
    /// A player left the cell
    PlayerLeft { player_id: PlayerId },
}

impl WorldEvent {
    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, BusError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Encodes `event` and publishes it on `topic`.
pub async fn publish_event(
    bus: &dyn MessageBus,
    topic: &str,
    event: &WorldEvent,
) -> Result<(), BusError> {
    bus.publish(topic, event.encode()?).await
}

/// Receives payloads delivered on a subscribed topic.
///
/// Deliveries for one subscription are handled one at a time, in the order the
/// bus accepted them.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync + 'static {
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// Opaque publish/subscribe topic service.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Publishes `payload` to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Registers `handler` for deliveries on `topic`.
    async fn subscribe(
        &self,
        topic: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Subscription, BusError>;

    /// Cancels a subscription, returning once its queued deliveries have drained.
    async fn unsubscribe(&self, subscription: Subscription) -> Result<(), BusError>;
}

/// Unique identifier of a subscription within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl SubscriptionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an active subscription.
///
/// Must be returned to the bus it came from through
/// [`MessageBus::unsubscribe`]; dropping it leaves the subscription active.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    delivery_task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Builds a handle for a bus implementation.
    ///
    /// `delivery_task` is the task running the handler, if the bus uses one;
    /// [`Subscription::drained`] waits for it.
    pub fn new(id: SubscriptionId, topic: impl Into<String>, delivery_task: Option<JoinHandle<()>>) -> Self {
        Self {
            id,
            topic: topic.into(),
            delivery_task,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits until the delivery task has handled everything queued for it.
    ///
    /// Only meaningful once the bus has stopped feeding the subscription.
    pub async fn drained(mut self) {
        if let Some(task) = self.delivery_task.take() {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let left = WorldEvent::PlayerLeft {
            player_id: "bob".to_string(),
        };
        let json: serde_json::Value = serde_json::from_slice(&left.encode().unwrap()).unwrap();
        assert_eq!(json["kind"], "player_left");
        assert_eq!(json["player_id"], "bob");

        let snapshot = WorldEvent::Positions {
            positions: vec![Position::new("alice", 1.0, 2.0, 3.0)],
        };
        let decoded = WorldEvent::decode(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            WorldEvent::decode(b"not json"),
            Err(BusError::Codec(_))
        ));
        assert!(WorldEvent::decode(br#"{"kind":"teleport"}"#).is_err());
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let a = SubscriptionId::new();
        let b = SubscriptionId::new();
        assert_ne!(a, b);
    }
}
