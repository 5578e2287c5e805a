//! # Spatial Indexer
//!
//! Fixed-depth quadtree addressing for the world plane. A position is mapped to
//! a cell path by bisecting the world rectangle `depth` times; the area of
//! interest of a cell is found by sampling points one cell-width away from its
//! center and resolving each of them back through the same bisection.
//!
//! The indexer holds no state beyond its configuration, so a single instance is
//! shared (behind an `Arc`) by every session and actor.

use crate::types::{CellId, Position, WorldBounds};
use std::collections::BTreeSet;

/// Default quadtree depth.
pub const MAX_QUAD_LEVEL: u8 = 5;

/// Path segment naming the root cell.
const ROOT_SEGMENT: &str = "0";

/// Quadrant of a parent rectangle, numbered as in cell paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quadrant {
    /// -X -Z
    LowLow = 0,
    /// +X -Z
    HighLow = 1,
    /// -X +Z
    LowHigh = 2,
    /// +X +Z
    HighHigh = 3,
}

impl Quadrant {
    /// Chooses the quadrant of `bounds` containing `(x, z)`.
    ///
    /// A coordinate equal to the midpoint belongs to the low side. Out-of-range
    /// coordinates fall into the outermost quadrant on their side, which keeps
    /// off-map players addressable.
    fn select(bounds: &WorldBounds, x: f64, z: f64) -> Self {
        let (mid_x, mid_z) = bounds.center();
        match (x <= mid_x, z <= mid_z) {
            (true, true) => Quadrant::LowLow,
            (false, true) => Quadrant::HighLow,
            (true, false) => Quadrant::LowHigh,
            (false, false) => Quadrant::HighHigh,
        }
    }

    fn from_digit(digit: &str) -> Option<Self> {
        match digit {
            "0" => Some(Quadrant::LowLow),
            "1" => Some(Quadrant::HighLow),
            "2" => Some(Quadrant::LowHigh),
            "3" => Some(Quadrant::HighHigh),
            _ => None,
        }
    }

    /// Shrinks `bounds` to this quadrant.
    fn shrink(self, bounds: &mut WorldBounds) {
        let (mid_x, mid_z) = bounds.center();
        match self {
            Quadrant::LowLow => {
                bounds.max_x = mid_x;
                bounds.max_z = mid_z;
            }
            Quadrant::HighLow => {
                bounds.min_x = mid_x;
                bounds.max_z = mid_z;
            }
            Quadrant::LowHigh => {
                bounds.max_x = mid_x;
                bounds.min_z = mid_z;
            }
            Quadrant::HighHigh => {
                bounds.min_x = mid_x;
                bounds.min_z = mid_z;
            }
        }
    }
}

/// Deterministic position → cell mapping over a fixed-depth quadtree.
///
/// The indexer holds no state beyond the world rectangle and the depth, so it
/// is shared freely between sessions and actors. Every caller resolving the
/// same point gets the same cell id.
///
/// # Example
///
/// ```rust
/// use presence_core::{CellId, Position, QuadTreeIndexer, WorldBounds};
///
/// let indexer = QuadTreeIndexer::new(WorldBounds::new(-100.0, 100.0, -100.0, 100.0), 2);
/// let cell = indexer.cell_id_for(&Position::new("alice", 5.0, 0.0, 5.0));
/// assert_eq!(cell, CellId::from("0-3-0"));
/// assert!(indexer.neighbor_ids(&cell, 1).contains(&cell));
/// ```
#[derive(Debug, Clone)]
pub struct QuadTreeIndexer {
    bounds: WorldBounds,
    depth: u8,
}

impl QuadTreeIndexer {
    /// Creates an indexer over `bounds` that subdivides `depth` times.
    ///
    /// # Arguments
    ///
    /// * `bounds` - The whole-world rectangle on the X/Z plane
    /// * `depth` - Number of bisection levels, the digits after the root
    ///
    /// Depth is not checked here; [`crate::PresenceConfig::validate`] bounds it.
    pub fn new(bounds: WorldBounds, depth: u8) -> Self {
        Self { bounds, depth }
    }

    /// The world rectangle cell paths are resolved against.
    pub fn bounds(&self) -> WorldBounds {
        self.bounds
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Resolves a position to its cell. Only `x` and `z` are used.
    pub fn cell_id_for(&self, position: &Position) -> CellId {
        self.cell_id_at(position.x, position.z)
    }

    /// Resolves a point on the X/Z plane to its cell.
    ///
    /// At each level the point is compared against the midpoints of the
    /// current rectangle; a coordinate equal to the midpoint goes to the low
    /// side. Points outside the world fall into the nearest edge cell.
    ///
    /// # Returns
    ///
    /// A [`CellId`] of exactly `1 + depth` tokens, e.g. `0-3-0` at depth 2.
    pub fn cell_id_at(&self, x: f64, z: f64) -> CellId {
        let mut path = String::with_capacity(1 + 2 * self.depth as usize);
        path.push_str(ROOT_SEGMENT);

        let mut bounds = self.bounds;
        for _ in 0..self.depth {
            let quadrant = Quadrant::select(&bounds, x, z);
            quadrant.shrink(&mut bounds);
            path.push('-');
            path.push(char::from(b'0' + quadrant as u8));
        }

        CellId::new(path)
    }

    /// Replays a cell path from the world rectangle down to the cell's own
    /// rectangle.
    ///
    /// Returns `None` for paths that do not start at the root or contain a
    /// segment other than a quadrant digit.
    pub fn cell_bounds(&self, cell_id: &CellId) -> Option<WorldBounds> {
        let mut segments = cell_id.as_str().split('-');
        if segments.next() != Some(ROOT_SEGMENT) {
            return None;
        }

        let mut bounds = self.bounds;
        for segment in segments {
            Quadrant::from_digit(segment)?.shrink(&mut bounds);
        }
        Some(bounds)
    }

    /// Cells forming the area of interest around `cell_id`.
    ///
    /// For a radius `r`, the `(2r + 1)²` points offset from the cell center by
    /// whole cell widths/heights are resolved back to cells at the configured
    /// depth. Samples falling off the world collapse onto edge cells, so the
    /// result is deduplicated and may hold fewer entries near the boundary.
    /// The cell itself is always included; a radius of `0` yields only the cell.
    pub fn neighbor_ids(&self, cell_id: &CellId, aoi_radius: u32) -> BTreeSet<CellId> {
        let mut neighbors = BTreeSet::new();
        neighbors.insert(cell_id.clone());

        if aoi_radius == 0 {
            return neighbors;
        }

        let Some(bounds) = self.cell_bounds(cell_id) else {
            return neighbors;
        };

        let (center_x, center_z) = bounds.center();
        let (width, height) = (bounds.width(), bounds.height());
        let radius = aoi_radius as i64;

        for x_offset in -radius..=radius {
            for z_offset in -radius..=radius {
                let sample_x = center_x + x_offset as f64 * width;
                let sample_z = center_z + z_offset as f64 * height;
                neighbors.insert(self.cell_id_at(sample_x, sample_z));
            }
        }

        neighbors
    }
}

impl Default for QuadTreeIndexer {
    fn default() -> Self {
        Self::new(WorldBounds::default(), MAX_QUAD_LEVEL)
    }
}
