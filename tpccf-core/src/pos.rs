//! Charge grid positions.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Padding pads on each side of a row in the charge grid.
pub const PADDING_PAD: usize = 2;

/// Padding time bins before and after a fragment in the charge grid.
pub const PADDING_TIME: usize = 3;

/// Sentinel time bin marking a position that does not address any cell.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const INVALID_TIME_BIN: i16 = -(PADDING_TIME as i16) - 1;

/// Relative offset between two grid positions, in pads and time bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Delta2 {
    /// Pad offset.
    pub pad: i16,
    /// Time bin offset.
    pub time: i16,
}

impl Delta2 {
    /// Creates a new offset.
    #[inline]
    #[must_use]
    pub const fn new(pad: i16, time: i16) -> Self {
        Self { pad, time }
    }
}

/// A cell of the charge grid: row, pad and fragment-local time bin.
///
/// Pads and time bins are signed so that neighbor offsets may step into the
/// grid padding, where every cell reads as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChargePos {
    row: u16,
    pad: i16,
    time: i16,
}

impl ChargePos {
    /// Creates a position from row, pad and fragment-local time bin.
    #[inline]
    #[must_use]
    pub const fn new(row: u16, pad: i16, time: i16) -> Self {
        Self { row, pad, time }
    }

    /// Returns the position that addresses no cell.
    #[inline]
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            row: 0,
            pad: 0,
            time: INVALID_TIME_BIN,
        }
    }

    /// Returns true unless this is the invalid sentinel.
    #[inline]
    #[must_use]
    pub const fn valid(&self) -> bool {
        self.time != INVALID_TIME_BIN
    }

    /// Returns the row.
    #[inline]
    #[must_use]
    pub const fn row(&self) -> u16 {
        self.row
    }

    /// Returns the pad within the row.
    #[inline]
    #[must_use]
    pub const fn pad(&self) -> i16 {
        self.pad
    }

    /// Returns the fragment-local time bin.
    #[inline]
    #[must_use]
    pub const fn time(&self) -> i16 {
        self.time
    }

    /// Returns the position shifted by `d`.
    ///
    /// The invalid position stays invalid.
    #[inline]
    #[must_use]
    pub const fn delta(&self, d: Delta2) -> Self {
        if !self.valid() {
            return *self;
        }
        Self {
            row: self.row,
            pad: self.pad.saturating_add(d.pad),
            time: self.time.saturating_add(d.time),
        }
    }
}

impl Default for ChargePos {
    fn default() -> Self {
        Self::invalid()
    }
}
