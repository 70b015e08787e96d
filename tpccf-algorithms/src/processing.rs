//! Event driver chaining the cluster finder stages over all fragments.

use log::{debug, info};
use tpccf_core::{
    Array2D, Calibration, CfFragment, Charge, Digit, Error, GridDims, PackedCharge, PadGeometry,
    PadNoiseFlags, Result, OVERLAP_TIME_BINS, PADDING_TIME,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::baseline::PadBaselineChecker;
use crate::compaction::compact_peaks;
use crate::exec::{Backend, Executor};
use crate::filler::ChargeMapFiller;
use crate::peaks::{PeakFinder, PeakMapValue};
use crate::registry::KernelRegistry;

/// Cluster finder configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClusterFinderConfig {
    /// Thresholds and pad gains.
    pub calibration: Calibration,
    /// Maximum fragment length in time bins, overlaps included.
    pub max_fragment_len: u32,
    /// Time bins of one event; digits at or past this bin are rejected.
    pub max_event_time_bins: u32,
    /// Execution backend.
    pub backend: Backend,
}

impl Default for ClusterFinderConfig {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            max_fragment_len: 4000,
            max_event_time_bins: 114_048,
            backend: Backend::default(),
        }
    }
}

impl ClusterFinderConfig {
    /// Sets the calibration.
    #[must_use]
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = calibration;
        self
    }

    /// Sets the maximum fragment length.
    #[must_use]
    pub fn with_max_fragment_len(mut self, len: u32) -> Self {
        self.max_fragment_len = len;
        self
    }

    /// Sets the event length limit.
    #[must_use]
    pub fn with_max_event_time_bins(mut self, bins: u32) -> Self {
        self.max_event_time_bins = bins;
        self
    }

    /// Sets the backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Checks the configuration against a geometry.
    pub fn validate<G: PadGeometry + ?Sized>(&self, geometry: &G) -> Result<()> {
        self.calibration.validate(geometry)?;
        let limit = u32::from(i16::MAX.unsigned_abs()) - PADDING_TIME as u32;
        if self.max_fragment_len <= 2 * OVERLAP_TIME_BINS || self.max_fragment_len > limit {
            return Err(Error::InvalidConfig(format!(
                "max_fragment_len must be in ({}, {limit}], got {}",
                2 * OVERLAP_TIME_BINS,
                self.max_fragment_len
            )));
        }
        if self.max_event_time_bins == 0 {
            return Err(Error::InvalidConfig(
                "max_event_time_bins must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Per-event state, reused across events.
#[derive(Debug, Default)]
pub struct ClusterFinderState {
    noisy: PadNoiseFlags,
    fragments_processed: usize,
    peaks_found: usize,
}

impl ClusterFinderState {
    /// Creates state for `num_pads` global pads.
    #[must_use]
    pub fn new(num_pads: usize) -> Self {
        Self {
            noisy: PadNoiseFlags::new(num_pads),
            fragments_processed: 0,
            peaks_found: 0,
        }
    }

    /// Clears all per-event state.
    pub fn reset(&mut self) {
        self.noisy.reset();
        self.fragments_processed = 0;
        self.peaks_found = 0;
    }

    /// Noisy pad flags of the current event.
    #[must_use]
    pub fn noisy(&self) -> &PadNoiseFlags {
        &self.noisy
    }

    /// Fragments processed in the current event.
    #[must_use]
    pub fn fragments_processed(&self) -> usize {
        self.fragments_processed
    }

    /// Peaks found in the current event.
    #[must_use]
    pub fn peaks_found(&self) -> usize {
        self.peaks_found
    }
}

/// One peak in event coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FoundPeak {
    /// Pad row.
    pub row: u16,
    /// Pad within the row.
    pub pad: u16,
    /// Global time bin.
    pub time: u32,
    /// Gain-corrected charge as stored in the grid.
    pub charge: Charge,
    /// True if the charge exceeds the inner threshold.
    pub above_inner_threshold: bool,
}

/// Result of one event.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventSummary {
    /// Peaks ordered by fragment, then by digit order.
    pub peaks: Vec<FoundPeak>,
    /// Global indices of noisy pads.
    pub noisy_pads: Vec<usize>,
    /// Number of fragments the event was split into.
    pub fragments: usize,
    /// Number of input digits.
    pub digits: usize,
}

/// Runs the cluster finder stages on whole events.
pub struct ClusterFinder<G: PadGeometry> {
    geometry: G,
    config: ClusterFinderConfig,
    filler: ChargeMapFiller,
    baseline: PadBaselineChecker,
    peak_finder: PeakFinder,
    state: ClusterFinderState,
    charge_map: Array2D<Vec<PackedCharge>>,
    peak_map: Array2D<Vec<u8>>,
}

impl<G: PadGeometry> ClusterFinder<G> {
    /// Builds the stages for `geometry` and registers their kernels.
    pub fn new(
        geometry: G,
        config: ClusterFinderConfig,
        registry: &mut KernelRegistry,
    ) -> Result<Self> {
        config.validate(&geometry)?;
        let executor = Executor::new(config.backend);
        let dims = GridDims::for_geometry(&geometry, config.max_fragment_len as usize);
        debug!(
            "cluster finder: {} rows, {} pads, fragments of {} time bins, {:?} backend",
            geometry.num_rows(),
            geometry.num_global_pads(),
            config.max_fragment_len,
            config.backend
        );
        Ok(Self {
            filler: ChargeMapFiller::new(registry),
            baseline: PadBaselineChecker::new(executor, registry),
            peak_finder: PeakFinder::new(executor, registry),
            state: ClusterFinderState::new(geometry.num_global_pads()),
            charge_map: Array2D::allocate(dims),
            peak_map: Array2D::allocate(dims),
            geometry,
            config,
        })
    }

    /// The pad geometry.
    #[must_use]
    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &ClusterFinderConfig {
        &self.config
    }

    /// State of the last processed event.
    #[must_use]
    pub fn state(&self) -> &ClusterFinderState {
        &self.state
    }

    /// Finds the peaks of one event.
    ///
    /// Fragments are processed in time order. Noisy flags accumulate over
    /// the event, and a peak is reported only by the fragment whose core
    /// range contains it. Fails without touching the grids if a digit lies
    /// past `max_event_time_bins`.
    pub fn process_event(&mut self, digits: &[Digit]) -> Result<EventSummary> {
        self.state.reset();
        let limit = self.config.max_event_time_bins;
        if let Some(digit) = digits.iter().find(|d| d.time >= limit) {
            return Err(Error::Inconsistent(format!(
                "digit at row {}, pad {} has time bin {}, event holds {limit}",
                digit.row, digit.pad, digit.time
            )));
        }
        let total_length = digits.iter().map(|d| d.time + 1).max().unwrap_or(0);
        let calib = &self.config.calibration;

        let mut peaks = Vec::new();
        for fragment in CfFragment::new(total_length, self.config.max_fragment_len)?.iter() {
            self.charge_map.reset();
            self.peak_map.reset();

            let positions =
                self.filler
                    .fill(&self.geometry, calib, &fragment, digits, &mut self.charge_map)?;
            self.baseline.check(
                &self.geometry,
                calib,
                &fragment,
                &self.charge_map,
                &self.state.noisy,
            )?;
            let mut predicate = vec![false; positions.len()];
            self.peak_finder.find_peaks(
                &self.geometry,
                calib,
                &self.charge_map,
                &self.state.noisy,
                &positions,
                &mut predicate,
                &mut self.peak_map,
            )?;

            let before = peaks.len();
            for pos in compact_peaks(&positions, &predicate)? {
                let local = u32::from(pos.time().unsigned_abs());
                if !fragment.is_core(local) {
                    continue;
                }
                peaks.push(FoundPeak {
                    row: pos.row(),
                    pad: pos.pad().unsigned_abs(),
                    time: fragment.to_global(local),
                    charge: self.charge_map.get(pos).unpack(),
                    above_inner_threshold: PeakMapValue::from_bits(self.peak_map.get(pos))
                        .above_inner_threshold(),
                });
            }
            debug!(
                "fragment {} [{}, {}): {} positions, {} core peaks",
                fragment.index(),
                fragment.start(),
                fragment.start() + fragment.length(),
                positions.len(),
                peaks.len() - before
            );
            self.state.fragments_processed += 1;
        }

        self.state.peaks_found = peaks.len();
        let summary = EventSummary {
            peaks,
            noisy_pads: self.state.noisy.noisy_pads(),
            fragments: self.state.fragments_processed,
            digits: digits.len(),
        };
        info!(
            "event: {} digits, {} fragments, {} peaks, {} noisy pads",
            summary.digits,
            summary.fragments,
            summary.peaks.len(),
            summary.noisy_pads.len()
        );
        Ok(summary)
    }
}
