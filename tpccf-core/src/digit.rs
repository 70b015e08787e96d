//! Decoded charge samples.

use crate::charge::Charge;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One decoded charge sample as delivered by the raw data decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Digit {
    /// Pad row.
    pub row: u16,
    /// Pad within the row.
    pub pad: u16,
    /// Global time bin within the event.
    pub time: u32,
    /// Charge in ADC counts, before gain correction.
    pub charge: Charge,
}

impl Digit {
    /// Creates a new digit.
    #[inline]
    #[must_use]
    pub fn new(row: u16, pad: u16, time: u32, charge: Charge) -> Self {
        Self {
            row,
            pad,
            time,
            charge,
        }
    }
}
