//! Player actor: last reported position of one player.

use super::{Actor, ActorHandle};
use crate::error::ActorError;
use crate::spatial::QuadTreeIndexer;
use crate::types::{CellId, PlayerId, Position};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

pub enum PlayerMessage {
    UpdatePosition {
        position: Position,
        reply: oneshot::Sender<Result<(), String>>,
    },
    GetPosition {
        reply: oneshot::Sender<Position>,
    },
    GetFieldId {
        reply: oneshot::Sender<Option<CellId>>,
    },
}

/// Position cache for a player, usable before any session exists.
///
/// Whether a position was ever recorded is tracked explicitly, so a player
/// standing exactly at the origin still resolves to a cell.
pub struct PlayerActor {
    position: Position,
    has_position: bool,
    indexer: Arc<QuadTreeIndexer>,
}

impl PlayerActor {
    pub fn new(player_id: impl Into<PlayerId>, indexer: Arc<QuadTreeIndexer>) -> Self {
        Self {
            position: Position {
                player_id: player_id.into(),
                ..Default::default()
            },
            has_position: false,
            indexer,
        }
    }
}

#[async_trait]
impl Actor for PlayerActor {
    type Message = PlayerMessage;
    const KIND: &'static str = "player";

    async fn handle(&mut self, message: PlayerMessage) {
        match message {
            PlayerMessage::UpdatePosition { position, reply } => {
                if position.player_id.is_empty() {
                    let _ = reply.send(Err("player_id must not be empty".to_string()));
                    return;
                }
                self.position = position;
                self.has_position = true;
                let _ = reply.send(Ok(()));
            }
            PlayerMessage::GetPosition { reply } => {
                let _ = reply.send(self.position.clone());
            }
            PlayerMessage::GetFieldId { reply } => {
                let field = self
                    .has_position
                    .then(|| self.indexer.cell_id_for(&self.position));
                let _ = reply.send(field);
            }
        }
    }
}

pub type PlayerHandle = ActorHandle<PlayerActor>;

impl ActorHandle<PlayerActor> {
    /// Replaces the cached position.
    pub async fn update_position(&self, position: Position) -> Result<(), ActorError> {
        self.ask(|reply| PlayerMessage::UpdatePosition { position, reply })
            .await?
            .map_err(|reason| ActorError::Rejected {
                kind: PlayerActor::KIND,
                key: self.key().to_string(),
                reason,
            })
    }

    pub async fn get_position(&self) -> Result<Position, ActorError> {
        self.ask(|reply| PlayerMessage::GetPosition { reply }).await
    }

    /// Cell of the cached position, or `None` if no position was ever recorded.
    pub async fn get_field_id(&self) -> Result<Option<CellId>, ActorError> {
        self.ask(|reply| PlayerMessage::GetFieldId { reply }).await
    }
}
