//! Fixed-point packed charge values.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless
)]

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Decoded charge in ADC counts.
pub type Charge = f32;

/// A charge stored as 14-bit fixed point with 4 decimal bits.
///
/// The two high bits are flags used by later clustering steps
/// (`has_3x3_peak`, `is_split`). They are only reachable through the flag
/// accessors, and packing a charge always masks its encoding to the low
/// 14 bits, so a large charge can never leak into the flags.
///
/// All code paths decode through [`PackedCharge::unpack`], which makes
/// `unpack(pack(x))` the single canonical rounding of a charge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct PackedCharge(u16);

impl PackedCharge {
    /// Number of fractional bits.
    pub const DECIMAL_BITS: u32 = 4;
    /// Number of bits holding the charge (integer and fraction).
    pub const CHARGE_BITS: u32 = 14;
    /// Mask selecting the charge bits.
    pub const CHARGE_MASK: u16 = (1 << Self::CHARGE_BITS) - 1;
    /// Flag bit: a 3x3 peak was found around this cell.
    pub const HAS_3X3_PEAK_MASK: u16 = 1 << Self::CHARGE_BITS;
    /// Flag bit: the charge is shared between clusters.
    pub const IS_SPLIT_MASK: u16 = 1 << (Self::CHARGE_BITS + 1);
    /// Largest representable charge (1023.9375).
    pub const MAX_CHARGE: Charge = Self::CHARGE_MASK as Charge / Self::SCALE;
    /// The zero charge without flags.
    pub const ZERO: Self = Self(0);

    const SCALE: Charge = (1 << Self::DECIMAL_BITS) as Charge;

    /// Packs a charge, saturating to `[0, MAX_CHARGE]` and rounding half up.
    #[inline]
    #[must_use]
    pub fn pack(q: Charge) -> Self {
        let q = q.clamp(0.0, Self::MAX_CHARGE);
        // NaN survives the clamp and converts to zero.
        let bits = (q * Self::SCALE + 0.5) as u16;
        Self(bits & Self::CHARGE_MASK)
    }

    /// Packs a charge, rejecting values outside `[0, MAX_CHARGE]`.
    pub fn try_pack(q: Charge) -> Result<Self> {
        if (0.0..=Self::MAX_CHARGE).contains(&q) {
            Ok(Self::pack(q))
        } else {
            Err(Error::ChargeOutOfRange(q))
        }
    }

    /// Rebuilds a packed charge from its raw bits, flags included.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the raw bits, flags included.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Decodes the charge, ignoring flag bits.
    #[inline]
    #[must_use]
    pub fn unpack(self) -> Charge {
        Charge::from(self.0 & Self::CHARGE_MASK) / Self::SCALE
    }

    /// Returns true if the charge bits are non-zero.
    #[inline]
    #[must_use]
    pub const fn has_charge(self) -> bool {
        self.0 & Self::CHARGE_MASK != 0
    }

    /// Returns true if the 3x3 peak flag is set.
    #[inline]
    #[must_use]
    pub const fn has_3x3_peak(self) -> bool {
        self.0 & Self::HAS_3X3_PEAK_MASK != 0
    }

    /// Returns true if the split flag is set.
    #[inline]
    #[must_use]
    pub const fn is_split(self) -> bool {
        self.0 & Self::IS_SPLIT_MASK != 0
    }

    /// Returns a copy with the given flags and the same charge bits.
    #[inline]
    #[must_use]
    pub const fn with_flags(self, has_3x3_peak: bool, is_split: bool) -> Self {
        let mut bits = self.0 & Self::CHARGE_MASK;
        if has_3x3_peak {
            bits |= Self::HAS_3X3_PEAK_MASK;
        }
        if is_split {
            bits |= Self::IS_SPLIT_MASK;
        }
        Self(bits)
    }

    /// Rounds a charge the same way a round trip through the grid does.
    #[inline]
    #[must_use]
    pub fn quantize(q: Charge) -> Charge {
        Self::pack(q).unpack()
    }
}

impl From<Charge> for PackedCharge {
    fn from(q: Charge) -> Self {
        Self::pack(q)
    }
}
