//! Reconstructed hits per pad row, input of the neighbor finder.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Sentinel neighbor index meaning "no link".
pub const NO_LINK: i32 = -1;

/// Hit position within a row, in local sector coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpacePoint {
    /// Coordinate along the pad row.
    pub y: f32,
    /// Coordinate along the drift direction.
    pub z: f32,
}

impl SpacePoint {
    /// Creates a new space point.
    #[inline]
    #[must_use]
    pub fn new(y: f32, z: f32) -> Self {
        Self { y, z }
    }

    /// Computes the squared Euclidean distance to another point.
    #[inline]
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> f32 {
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dy * dy + dz * dz
    }
}

/// All hits of one pad row.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitRow {
    /// Radial position of the row.
    pub x: f32,
    /// Hits in the row.
    pub hits: Vec<SpacePoint>,
}

impl HitRow {
    /// Creates a row at radius `x`.
    #[must_use]
    pub fn new(x: f32, hits: Vec<SpacePoint>) -> Self {
        Self { x, hits }
    }

    /// Returns the number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if the row has no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Chosen neighbors of every hit of one row.
///
/// `up` points into the next row (larger index), `down` into the previous
/// row. Entries are hit indices or [`NO_LINK`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RowLinks {
    /// Link into the next row per hit.
    pub up: Vec<i32>,
    /// Link into the previous row per hit.
    pub down: Vec<i32>,
}

impl RowLinks {
    /// Creates links for `n` hits, all unlinked.
    #[must_use]
    pub fn unlinked(n: usize) -> Self {
        Self {
            up: vec![NO_LINK; n],
            down: vec![NO_LINK; n],
        }
    }

    /// Returns the number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.up.len()
    }

    /// Returns true if the row has no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.up.is_empty()
    }

    /// Number of hits linked on both sides.
    #[must_use]
    pub fn linked(&self) -> usize {
        self.up
            .iter()
            .zip(&self.down)
            .filter(|(&up, &down)| up != NO_LINK && down != NO_LINK)
            .count()
    }
}
