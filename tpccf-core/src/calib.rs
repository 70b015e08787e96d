//! Calibration thresholds and pad gains used by the cluster finder.
#![allow(clippy::cast_possible_truncation, clippy::cast_lossless)]

use crate::charge::Charge;
use crate::error::{Error, Result};
use crate::geometry::PadGeometry;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-detector thresholds and the pad gain table.
///
/// A threshold of zero disables the check it controls.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Calibration {
    /// Pads whose maximum charge reaches this value are never flagged noisy.
    pub noisy_pad_saturation_threshold: Charge,
    /// Non-zero time bins per 1000 core time bins that mark a pad noisy.
    pub max_time_bins_above_threshold_per_1000: u32,
    /// Consecutive non-zero time bins that mark a pad noisy.
    pub max_consecutive_time_bins_above_threshold: u32,
    /// Charges at or below this value are never peaks.
    pub min_charge_cutoff: Charge,
    /// Charge above which a cell counts for the inner clustering region.
    pub inner_threshold: Charge,
    /// Gain correction per global pad; empty means unity gain everywhere.
    pub pad_gain: Vec<f32>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            noisy_pad_saturation_threshold: 700.0,
            max_time_bins_above_threshold_per_1000: 500,
            max_consecutive_time_bins_above_threshold: 200,
            min_charge_cutoff: 3.0,
            inner_threshold: 0.0,
            pad_gain: Vec::new(),
        }
    }
}

impl Calibration {
    /// Creates a calibration with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the noisy pad saturation threshold.
    #[must_use]
    pub fn with_saturation_threshold(mut self, threshold: Charge) -> Self {
        self.noisy_pad_saturation_threshold = threshold;
        self
    }

    /// Sets the non-zero time bin count threshold (per 1000 time bins).
    #[must_use]
    pub fn with_time_bins_above_threshold_per_1000(mut self, threshold: u32) -> Self {
        self.max_time_bins_above_threshold_per_1000 = threshold;
        self
    }

    /// Sets the consecutive non-zero time bin threshold.
    #[must_use]
    pub fn with_consecutive_time_bins_above_threshold(mut self, threshold: u32) -> Self {
        self.max_consecutive_time_bins_above_threshold = threshold;
        self
    }

    /// Sets the minimum peak charge.
    #[must_use]
    pub fn with_min_charge_cutoff(mut self, cutoff: Charge) -> Self {
        self.min_charge_cutoff = cutoff;
        self
    }

    /// Sets the inner clustering threshold.
    #[must_use]
    pub fn with_inner_threshold(mut self, threshold: Charge) -> Self {
        self.inner_threshold = threshold;
        self
    }

    /// Sets the per-pad gain table.
    #[must_use]
    pub fn with_pad_gain(mut self, gain: Vec<f32>) -> Self {
        self.pad_gain = gain;
        self
    }

    /// Gain correction of a global pad.
    #[inline]
    #[must_use]
    pub fn gain_correction(&self, global_pad: usize) -> f32 {
        self.pad_gain.get(global_pad).copied().unwrap_or(1.0)
    }

    /// Returns true if at least one baseline threshold is enabled.
    #[must_use]
    pub fn baseline_check_enabled(&self) -> bool {
        self.max_time_bins_above_threshold_per_1000 > 0
            || self.max_consecutive_time_bins_above_threshold > 0
    }

    /// Non-zero sample count marking a pad noisy in a core range of
    /// `core_length` time bins.
    #[must_use]
    pub fn count_threshold(&self, core_length: u32) -> u32 {
        (u64::from(self.max_time_bins_above_threshold_per_1000) * u64::from(core_length) / 1000)
            as u32
    }

    /// Checks the calibration against a geometry.
    pub fn validate<G: PadGeometry + ?Sized>(&self, geometry: &G) -> Result<()> {
        let thresholds = [
            ("noisy_pad_saturation_threshold", self.noisy_pad_saturation_threshold),
            ("min_charge_cutoff", self.min_charge_cutoff),
            ("inner_threshold", self.inner_threshold),
        ];
        for (name, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        if !self.pad_gain.is_empty() && self.pad_gain.len() != geometry.num_global_pads() {
            return Err(Error::GeometryMismatch {
                what: "pad gain table",
                expected: geometry.num_global_pads(),
                actual: self.pad_gain.len(),
            });
        }
        if let Some(pad) = self.pad_gain.iter().position(|g| !g.is_finite() || *g < 0.0) {
            return Err(Error::InvalidConfig(format!(
                "gain of pad {pad} is {}",
                self.pad_gain[pad]
            )));
        }
        Ok(())
    }
}
