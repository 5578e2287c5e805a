//! # Keyed Actors
//!
//! Every cell and every player is owned by exactly one actor: a tokio task that
//! holds the state and processes a mailbox one message at a time. Periodic work
//! (the cell broadcast tick) runs inside the same task, so it never interleaves
//! with a membership change. Callers only ever hold an [`ActorHandle`], a cheap
//! clonable sender.
//!
//! Actors are created on first lookup and evicted after sitting idle; see
//! [`ActorRegistry`]. A caller racing an eviction gets
//! [`ActorError::Unavailable`] when the mailbox is already closed, or
//! [`ActorError::NoReply`] when its request was queued behind the eviction.
//! Either way the request had no effect, and the next lookup activates a fresh
//! instance.

pub mod cell;
pub mod player;
mod registry;

pub use cell::{CellActor, CellHandle, CellMessage, CellStats};
pub use player::{PlayerActor, PlayerHandle, PlayerMessage};
pub use registry::ActorRegistry;

use crate::error::ActorError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Behaviour of a single-threaded, key-addressed unit of state.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Requests accepted by this actor.
    type Message: Send + 'static;

    /// Short name used in logs and errors, e.g. `"cell"`.
    const KIND: &'static str;

    /// Processes one mailbox message.
    async fn handle(&mut self, message: Self::Message);

    /// Period of [`Actor::tick`], or `None` for actors without periodic work.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic work, serialized with message handling.
    async fn tick(&mut self) {}

    /// Whether the actor may be evicted once idle.
    fn can_deactivate(&self) -> bool {
        true
    }

    async fn on_activate(&mut self) {}

    async fn on_deactivate(&mut self) {}
}

/// Mailbox item: either a request for the actor or a lifecycle command.
pub(crate) enum Envelope<M> {
    Message(M),
    /// Deactivate if no message arrived for `idle_for`; replies whether it did.
    EvictIfIdle {
        idle_for: Duration,
        reply: oneshot::Sender<bool>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Address of a running actor.
pub struct ActorHandle<A: Actor> {
    key: Arc<str>,
    sender: mpsc::Sender<Envelope<A::Message>>,
}

impl<A: Actor> Clone for ActorHandle<A> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            sender: self.sender.clone(),
        }
    }
}

impl<A: Actor> std::fmt::Debug for ActorHandle<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("kind", &A::KIND)
            .field("key", &self.key)
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl<A: Actor> ActorHandle<A> {
    /// Registry key of the actor, e.g. a cell id or player id.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether the actor behind this handle has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queues a message, waiting for mailbox capacity.
    ///
    /// A message that lands behind an eviction is dropped without notice; use
    /// [`ActorHandle::ask`] when the caller must know the request took effect.
    ///
    /// # Errors
    ///
    /// Returns [`ActorError::Unavailable`] if the actor has already stopped.
    pub async fn send(&self, message: A::Message) -> Result<(), ActorError> {
        self.sender
            .send(Envelope::Message(message))
            .await
            .map_err(|_| self.unavailable())
    }

    /// Sends a request built around a reply channel and waits for the answer.
    ///
    /// # Arguments
    ///
    /// * `build` - Wraps the reply sender into the actor's message type
    ///
    /// # Returns
    ///
    /// The actor's reply. [`ActorError::NoReply`] means the request was never
    /// handled, either because the actor was evicted with the request still
    /// queued or because it dropped the reply sender.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let players = cell.ask(|reply| CellMessage::GetPlayers { reply }).await?;
    /// ```
    pub async fn ask<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> A::Message,
    ) -> Result<R, ActorError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response.await.map_err(|_| ActorError::NoReply {
            kind: A::KIND,
            key: self.key.to_string(),
        })
    }

    /// Asks the actor to deactivate if it has been idle for `idle_for`.
    ///
    /// Returns `true` when the actor stopped (or was already gone).
    pub(crate) async fn evict_if_idle(&self, idle_for: Duration) -> bool {
        let (reply, response) = oneshot::channel();
        if self
            .sender
            .send(Envelope::EvictIfIdle { idle_for, reply })
            .await
            .is_err()
        {
            return true;
        }
        response.await.unwrap_or(true)
    }

    /// Stops the actor after it finishes the messages queued before this call.
    pub(crate) async fn stop(&self) {
        let (reply, response) = oneshot::channel();
        if self.sender.send(Envelope::Stop { reply }).await.is_ok() {
            let _ = response.await;
        }
    }

    fn unavailable(&self) -> ActorError {
        ActorError::Unavailable {
            kind: A::KIND,
            key: self.key.to_string(),
        }
    }
}

/// Starts `actor` on its own task and returns its handle.
pub(crate) fn spawn_actor<A: Actor>(key: &str, actor: A, mailbox_capacity: usize) -> ActorHandle<A> {
    let (sender, receiver) = mpsc::channel(mailbox_capacity.max(1));
    let key: Arc<str> = Arc::from(key);
    tokio::spawn(run_actor(key.clone(), actor, receiver));
    ActorHandle { key, sender }
}

async fn run_actor<A: Actor>(
    key: Arc<str>,
    mut actor: A,
    mut mailbox: mpsc::Receiver<Envelope<A::Message>>,
) {
    actor.on_activate().await;

    let period = actor.tick_interval();
    let mut ticker = period.map(|period| {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut last_activity = Instant::now();

    loop {
        let envelope = tokio::select! {
            envelope = mailbox.recv() => envelope,
            _ = next_tick(&mut ticker) => {
                actor.tick().await;
                continue;
            }
        };

        match envelope {
            Some(Envelope::Message(message)) => {
                last_activity = Instant::now();
                actor.handle(message).await;
            }
            Some(Envelope::EvictIfIdle { idle_for, reply }) => {
                let idle = last_activity.elapsed() >= idle_for && actor.can_deactivate();
                if idle {
                    // State is discarded here, so whatever queued behind the
                    // eviction is dropped unhandled. Callers see their reply
                    // channel close instead of a success for lost work.
                    mailbox.close();
                    let mut dropped = 0usize;
                    while let Some(pending) = mailbox.recv().await {
                        if let Envelope::Message(_) = pending {
                            dropped += 1;
                        }
                    }
                    if dropped > 0 {
                        debug!(kind = A::KIND, key = %key, dropped, "Dropped requests queued behind eviction");
                    }
                    actor.on_deactivate().await;
                    let _ = reply.send(true);
                    debug!(kind = A::KIND, key = %key, "Actor evicted after idling");
                    return;
                }
                let _ = reply.send(false);
            }
            Some(Envelope::Stop { reply }) => {
                actor.on_deactivate().await;
                let _ = reply.send(());
                return;
            }
            None => break,
        }
    }

    actor.on_deactivate().await;
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tally {
        entries: Vec<String>,
    }

    enum TallyMessage {
        Record(String, oneshot::Sender<()>),
        Count(oneshot::Sender<usize>),
    }

    #[async_trait]
    impl Actor for Tally {
        type Message = TallyMessage;
        const KIND: &'static str = "tally";

        async fn handle(&mut self, message: TallyMessage) {
            match message {
                TallyMessage::Record(entry, reply) => {
                    self.entries.push(entry);
                    let _ = reply.send(());
                }
                TallyMessage::Count(reply) => {
                    let _ = reply.send(self.entries.len());
                }
            }
        }
    }

    fn spawn_tally() -> ActorHandle<Tally> {
        spawn_actor("tally", Tally { entries: Vec::new() }, 8)
    }

    #[tokio::test]
    async fn test_request_queued_behind_eviction_is_not_acknowledged() {
        let handle = spawn_tally();
        assert_eq!(handle.ask(TallyMessage::Count).await.unwrap(), 0);

        // Eviction and a write are both queued before the actor runs again.
        let (evicted, evicted_rx) = oneshot::channel();
        handle
            .sender
            .try_send(Envelope::EvictIfIdle {
                idle_for: Duration::ZERO,
                reply: evicted,
            })
            .unwrap();
        let write = handle.ask(|reply| TallyMessage::Record("alice".to_string(), reply));

        let result = write.await;
        assert!(evicted_rx.await.unwrap());
        assert!(matches!(result, Err(ActorError::NoReply { .. })));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_busy_actor_refuses_eviction() {
        let handle = spawn_tally();
        handle
            .ask(|reply| TallyMessage::Record("bob".to_string(), reply))
            .await
            .unwrap();

        assert!(!handle.evict_if_idle(Duration::from_secs(60)).await);
        assert_eq!(handle.ask(TallyMessage::Count).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stop_closes_mailbox() {
        let handle = spawn_tally();
        handle.stop().await;
        assert!(handle.is_closed());
        assert!(matches!(
            handle.ask(TallyMessage::Count).await,
            Err(ActorError::Unavailable { .. })
        ));
    }
}
