//! Cell actor: the single writer of one cell's player set.
//!
//! Membership changes arrive as messages from sessions; every tick the actor
//! publishes a full snapshot of its players on the cell topic. A departure is
//! published immediately so subscribers can evict the player without waiting
//! for the next tick.

use super::{Actor, ActorHandle};
use crate::bus::{publish_event, MessageBus, WorldEvent};
use crate::error::{ActorError, BusError};
use crate::types::{CellId, PlayerId, Position};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Default broadcast period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Requests served by a [`CellActor`].
pub enum CellMessage {
    Enter {
        position: Position,
        reply: oneshot::Sender<()>,
    },
    Leave {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<bool, BusError>>,
    },
    UpdatePlayerPosition {
        position: Position,
        reply: oneshot::Sender<()>,
    },
    GetPlayers {
        reply: oneshot::Sender<Vec<Position>>,
    },
    GetStats {
        reply: oneshot::Sender<CellStats>,
    },
}

/// Counters kept by a cell actor over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellStats {
    pub players: usize,
    pub enters: u64,
    pub leaves: u64,
    pub position_updates: u64,
    pub snapshots_published: u64,
    pub publish_failures: u64,
}

/// Owner of one cell's membership.
///
/// Only this actor reads or writes the player map; sessions reach it through a
/// [`CellHandle`]. While any player is present the actor refuses eviction.
pub struct CellActor {
    cell_id: CellId,
    topic: String,
    players: HashMap<PlayerId, Position>,
    bus: Arc<dyn MessageBus>,
    tick_interval: Duration,
    stats: CellStats,
}

impl CellActor {
    /// Creates an empty cell actor.
    ///
    /// # Arguments
    ///
    /// * `cell_id` - The cell this actor owns; its topic is derived from it
    /// * `bus` - Where snapshots and departures are published
    /// * `tick_interval` - Period between snapshots, first one a full period
    ///   after activation
    pub fn new(cell_id: CellId, bus: Arc<dyn MessageBus>, tick_interval: Duration) -> Self {
        let topic = cell_id.topic();
        Self {
            cell_id,
            topic,
            players: HashMap::new(),
            bus,
            tick_interval,
            stats: CellStats::default(),
        }
    }

    fn enter(&mut self, position: Position) {
        let player_id = position.player_id.clone();
        if self.players.insert(player_id.clone(), position).is_none() {
            self.stats.enters += 1;
            info!(player = %player_id, cell = %self.cell_id, "Player entered cell");
        }
    }

    async fn leave(&mut self, player_id: &str) -> Result<bool, BusError> {
        if self.players.remove(player_id).is_none() {
            return Ok(false);
        }
        self.stats.leaves += 1;
        info!(player = %player_id, cell = %self.cell_id, "Player left cell");

        let event = WorldEvent::PlayerLeft {
            player_id: player_id.to_string(),
        };
        if let Err(e) = publish_event(self.bus.as_ref(), &self.topic, &event).await {
            self.stats.publish_failures += 1;
            error!(cell = %self.cell_id, player = %player_id, error = %e, "Failed to publish player departure");
            return Err(e);
        }
        Ok(true)
    }

    async fn broadcast(&mut self) -> Result<(), BusError> {
        if self.players.is_empty() {
            return Ok(());
        }

        let event = WorldEvent::Positions {
            positions: self.players.values().cloned().collect(),
        };
        publish_event(self.bus.as_ref(), &self.topic, &event).await?;
        self.stats.snapshots_published += 1;
        Ok(())
    }
}

#[async_trait]
impl Actor for CellActor {
    type Message = CellMessage;
    const KIND: &'static str = "cell";

    async fn handle(&mut self, message: CellMessage) {
        match message {
            CellMessage::Enter { position, reply } => {
                self.enter(position);
                let _ = reply.send(());
            }
            CellMessage::Leave { player_id, reply } => {
                let result = self.leave(&player_id).await;
                let _ = reply.send(result);
            }
            CellMessage::UpdatePlayerPosition { position, reply } => {
                self.stats.position_updates += 1;
                self.players.insert(position.player_id.clone(), position);
                let _ = reply.send(());
            }
            CellMessage::GetPlayers { reply } => {
                let _ = reply.send(self.players.values().cloned().collect());
            }
            CellMessage::GetStats { reply } => {
                let stats = CellStats {
                    players: self.players.len(),
                    ..self.stats
                };
                let _ = reply.send(stats);
            }
        }
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.tick_interval)
    }

    async fn tick(&mut self) {
        if let Err(e) = self.broadcast().await {
            self.stats.publish_failures += 1;
            error!(cell = %self.cell_id, error = %e, "Failed to publish cell snapshot");
        }
    }

    fn can_deactivate(&self) -> bool {
        self.players.is_empty()
    }

    async fn on_activate(&mut self) {
        info!(cell = %self.cell_id, "Cell actor activated");
    }

    async fn on_deactivate(&mut self) {
        if !self.players.is_empty() {
            warn!(cell = %self.cell_id, players = self.players.len(), "Cell actor deactivated while occupied");
        }
        debug!(cell = %self.cell_id, stats = ?self.stats, "Cell actor deactivated");
    }
}

/// Handle to a cell actor.
pub type CellHandle = ActorHandle<CellActor>;

impl ActorHandle<CellActor> {
    /// Adds or replaces the player's entry in the cell. Idempotent.
    pub async fn enter(&self, position: Position) -> Result<(), ActorError> {
        self.ask(|reply| CellMessage::Enter { position, reply }).await
    }

    /// Removes the player; publishes the departure if the player was present.
    ///
    /// # Returns
    ///
    /// Whether the player was a member. A second `leave` for the same player
    /// returns `false` and publishes nothing.
    ///
    /// # Errors
    ///
    /// [`ActorError::Bus`] when the departure could not be published. The
    /// player is removed from the cell regardless.
    pub async fn leave(&self, player_id: &str) -> Result<bool, ActorError> {
        let player_id = player_id.to_string();
        Ok(self
            .ask(|reply| CellMessage::Leave { player_id, reply })
            .await??)
    }

    /// Stores a new position, picked up by the next snapshot.
    pub async fn update_player_position(&self, position: Position) -> Result<(), ActorError> {
        self.ask(|reply| CellMessage::UpdatePlayerPosition { position, reply })
            .await
    }

    /// Snapshot of the cell's current members.
    pub async fn get_players(&self) -> Result<Vec<Position>, ActorError> {
        self.ask(|reply| CellMessage::GetPlayers { reply }).await
    }

    /// Lifetime counters plus the current member count.
    pub async fn stats(&self) -> Result<CellStats, ActorError> {
        self.ask(|reply| CellMessage::GetStats { reply }).await
    }
}
