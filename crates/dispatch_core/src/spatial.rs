//! Planar geometry used throughout the dispatch core.
//!
//! Coordinates are metres in a projected (metric) reference frame, so plain
//! Euclidean distance is the beeline distance between two points.

use serde::{Deserialize, Serialize};

/// Two locations closer than this (metres) are treated as the same place.
pub const SAME_PLACE_TOLERANCE_M: f64 = 1e-6;

/// A point in the service area.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

impl Location {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Location) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn is_same_place(&self, other: &Location) -> bool {
        self.distance_to(other) <= SAME_PLACE_TOLERANCE_M
    }

    /// Point at fraction `t` (0..=1) of the way from `self` to `other`.
    pub fn lerp(&self, other: &Location, t: f64) -> Location {
        let t = t.clamp(0.0, 1.0);
        Location {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }

    pub fn as_array(&self) -> [f64; 2] {
        [self.x, self.y]
    }

    /// Millimetre-quantized key, stable enough for hashing cached paths.
    pub fn quantized(&self) -> (i64, i64) {
        ((self.x * 1000.0).round() as i64, (self.y * 1000.0).round() as i64)
    }
}

/// Axis-aligned rectangle `[min_x, max_x) x [min_y, max_y)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Location {
        Location::new(
            0.5 * (self.min_x + self.max_x),
            0.5 * (self.min_y + self.max_y),
        )
    }

    /// Half-open containment, so adjacent boxes never both claim a point.
    pub fn contains(&self, location: &Location) -> bool {
        location.x >= self.min_x
            && location.x < self.max_x
            && location.y >= self.min_y
            && location.y < self.max_y
    }
}
