//! Pad geometry of one detector sector.

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Read-only pad layout provided by the detector geometry database.
///
/// Global pad indices number the pads of all rows contiguously, row by row,
/// without padding.
pub trait PadGeometry: Send + Sync {
    /// Number of pad rows.
    fn num_rows(&self) -> usize;

    /// Number of pads in `row`; zero for rows outside the geometry.
    fn num_pads(&self, row: usize) -> usize;

    /// Global index of `pad` in `row`.
    ///
    /// Only defined for pads where [`contains`](Self::contains) holds;
    /// callers check that first.
    ///
    /// # Panics
    ///
    /// Implementations may panic if `row` is outside the geometry.
    fn global_pad(&self, row: usize, pad: usize) -> usize;

    /// Total number of pads over all rows.
    fn num_global_pads(&self) -> usize {
        (0..self.num_rows()).map(|row| self.num_pads(row)).sum()
    }

    /// Largest pad count of any row.
    fn max_pads_per_row(&self) -> usize {
        (0..self.num_rows())
            .map(|row| self.num_pads(row))
            .max()
            .unwrap_or(0)
    }

    /// Returns true if `(row, pad)` is a real pad.
    #[inline]
    fn contains(&self, row: usize, pad: i64) -> bool {
        row < self.num_rows() && pad >= 0 && usize::try_from(pad).is_ok_and(|p| p < self.num_pads(row))
    }
}

/// Geometry defined by a table of pad counts per row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RowGeometryRepr"))]
pub struct RowGeometry {
    pads_per_row: Vec<usize>,
    #[cfg_attr(feature = "serde", serde(skip))]
    row_offsets: Vec<usize>,
}

/// Serialized form of [`RowGeometry`].
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct RowGeometryRepr {
    pads_per_row: Vec<usize>,
}

#[cfg(feature = "serde")]
impl TryFrom<RowGeometryRepr> for RowGeometry {
    type Error = Error;

    fn try_from(repr: RowGeometryRepr) -> Result<Self> {
        Self::new(repr.pads_per_row)
    }
}

impl RowGeometry {
    /// Creates a geometry from pad counts per row.
    ///
    /// Fails if the table is empty or a row has more pads than a grid
    /// position can address.
    pub fn new(pads_per_row: Vec<usize>) -> Result<Self> {
        if pads_per_row.is_empty() {
            return Err(Error::InvalidConfig("geometry has no rows".into()));
        }
        if pads_per_row.len() > usize::from(u16::MAX) {
            return Err(Error::InvalidConfig(format!(
                "geometry has {} rows, at most {} are addressable",
                pads_per_row.len(),
                u16::MAX
            )));
        }
        let limit = usize::try_from(i16::MAX).unwrap_or(usize::MAX) / 2;
        if let Some(row) = pads_per_row.iter().position(|&pads| pads > limit) {
            return Err(Error::InvalidConfig(format!(
                "row {row} has {} pads, at most {limit} are addressable",
                pads_per_row[row]
            )));
        }
        let row_offsets = pads_per_row
            .iter()
            .scan(0usize, |offset, &pads| {
                let current = *offset;
                *offset += pads;
                Some(current)
            })
            .collect();
        Ok(Self {
            pads_per_row,
            row_offsets,
        })
    }

    /// Creates a geometry with `rows` rows of `pads` pads each.
    pub fn uniform(rows: usize, pads: usize) -> Result<Self> {
        Self::new(vec![pads; rows])
    }

    /// Pad counts per row.
    #[must_use]
    pub fn pads_per_row(&self) -> &[usize] {
        &self.pads_per_row
    }
}

impl PadGeometry for RowGeometry {
    fn num_rows(&self) -> usize {
        self.pads_per_row.len()
    }

    fn num_pads(&self, row: usize) -> usize {
        self.pads_per_row.get(row).copied().unwrap_or(0)
    }

    #[inline]
    /// # Panics
    ///
    /// Panics if `row` is not a row of the geometry.
    fn global_pad(&self, row: usize, pad: usize) -> usize {
        debug_assert!(
            pad < self.num_pads(row),
            "pad {pad} outside row {row} of {} rows",
            self.num_rows()
        );
        self.row_offsets[row] + pad
    }

    fn num_global_pads(&self) -> usize {
        self.row_offsets.last().copied().unwrap_or(0) + self.pads_per_row.last().copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_pad_numbering() {
        let geo = RowGeometry::new(vec![3, 5, 2]).unwrap();
        assert_eq!(geo.num_rows(), 3);
        assert_eq!(geo.num_global_pads(), 10);
        assert_eq!(geo.global_pad(0, 2), 2);
        assert_eq!(geo.global_pad(1, 0), 3);
        assert_eq!(geo.global_pad(2, 1), 9);
        assert_eq!(geo.max_pads_per_row(), 5);
    }

    #[test]
    fn test_contains() {
        let geo = RowGeometry::new(vec![3, 5]).unwrap();
        assert!(geo.contains(0, 2));
        assert!(!geo.contains(0, 3));
        assert!(!geo.contains(1, -1));
        assert!(!geo.contains(2, 0));
        assert_eq!(geo.num_pads(7), 0);
    }

    #[test]
    #[should_panic]
    fn test_global_pad_outside_geometry_panics() {
        let geo = RowGeometry::new(vec![3, 5]).unwrap();
        let _ = geo.global_pad(2, 0);
    }

    #[test]
    fn test_global_pad_matches_contains() {
        let geo = RowGeometry::new(vec![3, 5, 2]).unwrap();
        let mut expected = 0;
        for row in 0..geo.num_rows() {
            for pad in 0..geo.num_pads(row) {
                assert!(geo.contains(row, i64::try_from(pad).unwrap()));
                assert_eq!(geo.global_pad(row, pad), expected);
                expected += 1;
            }
        }
        assert_eq!(expected, geo.num_global_pads());
    }

    #[test]
    fn test_uniform() {
        let geo = RowGeometry::uniform(4, 6).unwrap();
        assert_eq!(geo.num_global_pads(), 24);
        assert_eq!(geo.global_pad(3, 5), 23);
    }

    #[test]
    fn test_invalid_geometry() {
        assert!(RowGeometry::new(Vec::new()).is_err());
        assert!(RowGeometry::new(vec![4, 100_000]).is_err());
    }
}
