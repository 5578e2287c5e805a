//! Shared helpers for presence_core integration tests.

#![allow(dead_code)]

use presence_core::{PresenceConfig, PresenceRuntime, ServerMessage, WorldBounds};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Runtime over `[-100, 100]²` at depth 2 with a fast tick.
pub fn small_world(tick_interval_ms: u64) -> PresenceRuntime {
    PresenceRuntime::new(PresenceConfig {
        bounds: WorldBounds::new(-100.0, 100.0, -100.0, 100.0),
        depth: 2,
        tick_interval_ms,
        ..PresenceConfig::default()
    })
    .expect("valid test config")
}

/// Waits for the first message matching `predicate`, discarding the rest.
pub async fn wait_for<F>(
    client: &mut mpsc::Receiver<ServerMessage>,
    within: Duration,
    mut predicate: F,
) -> Option<ServerMessage>
where
    F: FnMut(&ServerMessage) -> bool,
{
    timeout(within, async {
        while let Some(message) = client.recv().await {
            if predicate(&message) {
                return Some(message);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Collects whatever arrives on `client` during `window`.
pub async fn collect_for(
    client: &mut mpsc::Receiver<ServerMessage>,
    window: Duration,
) -> Vec<ServerMessage> {
    let mut received = Vec::new();
    let _ = timeout(window, async {
        while let Some(message) = client.recv().await {
            received.push(message);
        }
    })
    .await;
    received
}

/// Whether a world update lists `player_id`.
pub fn shows_player(message: &ServerMessage, player_id: &str) -> bool {
    match message {
        ServerMessage::WorldUpdate { positions } => {
            positions.iter().any(|position| position.player_id == player_id)
        }
        ServerMessage::PlayerLeft { .. } => false,
    }
}

/// Small deterministic generator for reproducible walks.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(6364136223846793005).wrapping_add(1))
    }

    /// Uniform value in `[low, high)`.
    pub fn range(&mut self, low: f64, high: f64) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let unit = (self.0 >> 11) as f64 / (1u64 << 53) as f64;
        low + unit * (high - low)
    }
}
