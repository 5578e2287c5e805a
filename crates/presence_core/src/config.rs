//! Presence layer configuration.
//!
//! Every field has a serde default so partial tables in a TOML file work.

use crate::actor::cell::DEFAULT_TICK_INTERVAL;
use crate::spatial::{QuadTreeIndexer, MAX_QUAD_LEVEL};
use crate::types::WorldBounds;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deepest quadtree accepted by [`PresenceConfig::validate`].
pub const MAX_SUPPORTED_DEPTH: u8 = 16;

fn default_depth() -> u8 {
    MAX_QUAD_LEVEL
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL.as_millis() as u64
}

fn default_aoi_radius() -> u32 {
    1
}

fn default_cell_idle_ttl_secs() -> u64 {
    60
}

fn default_player_idle_ttl_secs() -> u64 {
    300
}

fn default_eviction_sweep_secs() -> u64 {
    10
}

fn default_mailbox_capacity() -> usize {
    1024
}

fn default_buffer() -> usize {
    256
}

/// Tunables consumed by the spatial indexer, the actors and the sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// World extent on the X/Z plane
    #[serde(default)]
    pub bounds: WorldBounds,
    /// Quadtree depth; cells are `2^depth` to a side
    #[serde(default = "default_depth")]
    pub depth: u8,
    /// Cell snapshot broadcast period in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Area of interest radius in cells
    #[serde(default = "default_aoi_radius")]
    pub aoi_radius: u32,
    /// Idle time before an empty cell actor is evicted
    #[serde(default = "default_cell_idle_ttl_secs")]
    pub cell_idle_ttl_secs: u64,
    /// Idle time before a player actor is evicted
    #[serde(default = "default_player_idle_ttl_secs")]
    pub player_idle_ttl_secs: u64,
    /// How often the registries look for idle actors
    #[serde(default = "default_eviction_sweep_secs")]
    pub eviction_sweep_secs: u64,
    /// Pending requests an actor mailbox can hold
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Pending deliveries per bus subscription
    #[serde(default = "default_buffer")]
    pub subscription_buffer: usize,
    /// Pending outbound messages per client
    #[serde(default = "default_buffer")]
    pub client_buffer: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            bounds: WorldBounds::default(),
            depth: default_depth(),
            tick_interval_ms: default_tick_interval_ms(),
            aoi_radius: default_aoi_radius(),
            cell_idle_ttl_secs: default_cell_idle_ttl_secs(),
            player_idle_ttl_secs: default_player_idle_ttl_secs(),
            eviction_sweep_secs: default_eviction_sweep_secs(),
            mailbox_capacity: default_mailbox_capacity(),
            subscription_buffer: default_buffer(),
            client_buffer: default_buffer(),
        }
    }
}

impl PresenceConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn cell_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.cell_idle_ttl_secs)
    }

    pub fn player_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.player_idle_ttl_secs)
    }

    pub fn eviction_sweep(&self) -> Duration {
        Duration::from_secs(self.eviction_sweep_secs)
    }

    /// Builds the spatial indexer for these bounds and depth.
    pub fn indexer(&self) -> QuadTreeIndexer {
        QuadTreeIndexer::new(self.bounds, self.depth)
    }

    /// Checks the configuration for values the system cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        let b = &self.bounds;
        let finite = [b.min_x, b.max_x, b.min_z, b.max_z]
            .iter()
            .all(|value| value.is_finite());
        if !finite {
            return Err("World bounds must be finite".to_string());
        }
        if b.min_x >= b.max_x {
            return Err("World min_x must be less than max_x".to_string());
        }
        if b.min_z >= b.max_z {
            return Err("World min_z must be less than max_z".to_string());
        }

        if self.depth == 0 || self.depth > MAX_SUPPORTED_DEPTH {
            return Err(format!(
                "Quadtree depth must be between 1 and {MAX_SUPPORTED_DEPTH}, got {}",
                self.depth
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err("Tick interval must be greater than zero".to_string());
        }
        if self.eviction_sweep_secs == 0 {
            return Err("Eviction sweep interval must be greater than zero".to_string());
        }
        if self.mailbox_capacity == 0 || self.subscription_buffer == 0 || self.client_buffer == 0 {
            return Err("Queue capacities must be greater than zero".to_string());
        }

        Ok(())
    }
}
