//! # Core Value Types
//!
//! Positions, cell identifiers and world bounds shared by every layer of the
//! presence system. All of these are plain values: they are replaced whole,
//! never mutated field by field once they leave the client.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a player as sent by the client.
pub type PlayerId = String;

/// Name of a message-bus topic, e.g. `"world.0-1-3.updates"`.
pub type Topic = String;

/// A player's full transform as reported by the client.
///
/// `cell_id` is derived by the server from `x`/`z` and is informational only;
/// the authoritative cell is always recomputed through the spatial indexer.
/// Fields missing from a client payload default to zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Position {
    /// Owner of this position
    pub player_id: PlayerId,
    /// X coordinate (east-west axis)
    pub x: f64,
    /// Y coordinate (vertical axis, ignored for partitioning)
    pub y: f64,
    /// Z coordinate (north-south axis)
    pub z: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
    /// Cell the server resolved this position to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<CellId>,
}

impl Position {
    /// Creates a position with zero rotation.
    pub fn new(player_id: impl Into<PlayerId>, x: f64, y: f64, z: f64) -> Self {
        Self {
            player_id: player_id.into(),
            x,
            y,
            z,
            ..Default::default()
        }
    }

    /// Returns this position with the given rotation.
    pub fn with_rotation(mut self, pitch: f64, yaw: f64, roll: f64) -> Self {
        self.pitch = pitch;
        self.yaw = yaw;
        self.roll = roll;
        self
    }

    /// Checks the invariants enforced at the session boundary.
    ///
    /// A position must name its player and carry finite coordinates. Rotation
    /// is validated too since it is forwarded verbatim to other clients.
    pub fn validate(&self) -> Result<(), String> {
        if self.player_id.trim().is_empty() {
            return Err("player_id must not be empty".to_string());
        }

        let components = [
            ("x", self.x),
            ("y", self.y),
            ("z", self.z),
            ("pitch", self.pitch),
            ("yaw", self.yaw),
            ("roll", self.roll),
        ];
        for (name, value) in components {
            if !value.is_finite() {
                return Err(format!("{name} is not a finite number: {value}"));
            }
        }

        Ok(())
    }
}

/// Path of a quadtree cell from the root, e.g. `"0-1-3-0-2"`.
///
/// The first segment is always the root marker `0`; every following segment is
/// a quadrant digit: `0` = -X-Z, `1` = +X-Z, `2` = -X+Z, `3` = +X+Z.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    /// Wraps an already formatted cell path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The message-bus topic on which this cell broadcasts.
    pub fn topic(&self) -> Topic {
        format!("world.{}.updates", self.0)
    }

    /// Number of `-` separated tokens, root included.
    pub fn token_count(&self) -> usize {
        self.0.split('-').count()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CellId {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

/// Axis-aligned rectangle on the X/Z plane.
///
/// Used both for the configured world extent and for the replayed extent of a
/// single cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_z: f64,
    pub max_z: f64,
}

impl WorldBounds {
    pub fn new(min_x: f64, max_x: f64, min_z: f64, max_z: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_z,
            max_z,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_z - self.min_z
    }

    /// Midpoint on both axes as `(mid_x, mid_z)`.
    pub fn center(&self) -> (f64, f64) {
        (
            self.min_x + self.width() / 2.0,
            self.min_z + self.height() / 2.0,
        )
    }

    /// Whether two rectangles share interior area.
    ///
    /// Touching edges do not count as overlap.
    pub fn overlaps(&self, other: &WorldBounds) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_z < other.max_z
            && other.min_z < self.max_z
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self::new(-1000.0, 1000.0, -1000.0, 1000.0)
    }
}
