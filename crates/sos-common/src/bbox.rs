//! Bounding box types and operations.

use serde::{Deserialize, Serialize};

/// A spatial envelope of observed features.
///
/// Coordinates are kept in the storage CRS of the observation store; the
/// cache never reprojects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Degenerate envelope covering a single point.
    pub fn from_point(x: f64, y: f64) -> Self {
        Self::new(x, y, x, y)
    }

    /// Smallest envelope covering both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Grow this envelope in place so it also covers `other`.
    pub fn extend(&mut self, other: &BoundingBox) {
        *self = self.union(other);
    }

    /// Union of an iterator of envelopes, `None` if the iterator is empty.
    pub fn union_all<'a>(boxes: impl IntoIterator<Item = &'a BoundingBox>) -> Option<BoundingBox> {
        boxes.into_iter().fold(None, |acc, b| match acc {
            None => Some(*b),
            Some(a) => Some(a.union(b)),
        })
    }
}
