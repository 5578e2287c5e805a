//! Messages exchanged with a connected client.
//!
//! Both directions are JSON objects tagged by a `type` field, e.g.
//! `{"type":"position_update","position":{...}}`.

use crate::types::{PlayerId, Position};
use serde::{Deserialize, Serialize};

/// Messages a client sends to its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Login { player_id: PlayerId },
    Logout { player_id: PlayerId },
    PositionUpdate { position: Position },
}

impl ClientMessage {
    /// Player named by the message.
    pub fn player_id(&self) -> &str {
        match self {
            ClientMessage::Login { player_id } | ClientMessage::Logout { player_id } => player_id,
            ClientMessage::PositionUpdate { position } => &position.player_id,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Messages a session pushes to its client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Latest snapshot of one cell in the area of interest, minus the receiver
    WorldUpdate { positions: Vec<Position> },
    /// A player is no longer visible
    PlayerLeft { player_id: PlayerId },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
