//! Pad baseline checker.
//!
//! Scans the core time range of a fragment pad by pad and flags pads whose
//! samples look like a shifted baseline rather than signal: too many
//! non-zero time bins overall, or too long a run of consecutive ones. Pads
//! that saturate are exempt, since large clusters legitimately produce long
//! runs.
//!
//! One group covers the 8 pads of one cacheline of a row. Its 64 lanes
//! stage an 8 x 8 block of pads and time bins into shared memory, then one
//! lane per pad folds its column into the running statistics.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::debug;
use tpccf_core::{
    Array2D, Calibration, CfFragment, Charge, ChargePos, GridLayout, PackedCharge, PadGeometry,
    PadNoiseFlags, Result,
};

use crate::exec::Executor;
use crate::filler::check_grid;
use crate::registry::KernelRegistry;

/// Pads per group.
pub const PADS_PER_CACHELINE: usize = 8;

/// Time bins staged per pad and chunk.
pub const CACHED_TIME_BINS: usize = 8;

/// Lanes per group.
pub const BASELINE_GROUP_SIZE: usize = PADS_PER_CACHELINE * CACHED_TIME_BINS;

/// Sample statistics of one pad over a core range.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PadStats {
    /// Number of non-zero samples.
    pub total: u32,
    /// Length of the current run of non-zero samples.
    pub run: u32,
    /// Longest run of non-zero samples.
    pub max_run: u32,
    /// Largest decoded charge.
    pub max_charge: Charge,
}

impl PadStats {
    /// Folds the next sample in time order.
    #[inline]
    pub fn accumulate(&mut self, q: Charge) {
        if q > 0.0 {
            self.total += 1;
            self.run += 1;
            self.max_run = self.max_run.max(self.run);
        } else {
            self.run = 0;
        }
        self.max_charge = self.max_charge.max(q);
    }

    /// Statistics of a sample sequence.
    pub fn from_charges(charges: impl IntoIterator<Item = Charge>) -> Self {
        let mut stats = Self::default();
        for q in charges {
            stats.accumulate(q);
        }
        stats
    }
}

/// Noisy pad decision for statistics over `core_length` time bins.
#[must_use]
pub fn is_noisy(stats: &PadStats, calib: &Calibration, core_length: u32) -> bool {
    let saturation = calib.noisy_pad_saturation_threshold;
    let count_threshold = calib.count_threshold(core_length);
    let run_threshold = calib.max_consecutive_time_bins_above_threshold;

    let saturated = saturation > 0.0 && stats.max_charge >= saturation;
    let too_many = count_threshold > 0 && stats.total >= count_threshold;
    let too_long = run_threshold > 0 && stats.max_run >= run_threshold;
    !saturated && (too_many || too_long)
}

struct BaselineShared {
    charges: [[Charge; PADS_PER_CACHELINE]; CACHED_TIME_BINS],
    stats: [PadStats; PADS_PER_CACHELINE],
}

impl BaselineShared {
    fn new() -> Self {
        Self {
            charges: [[0.0; PADS_PER_CACHELINE]; CACHED_TIME_BINS],
            stats: [PadStats::default(); PADS_PER_CACHELINE],
        }
    }
}

/// Flags noisy pads of a fragment.
#[derive(Clone, Copy, Debug, Default)]
pub struct PadBaselineChecker {
    executor: Executor,
}

impl PadBaselineChecker {
    /// Kernel name in the registry.
    pub const KERNEL: &'static str = "check_pad_baseline";

    /// Creates the checker and registers its kernel.
    pub fn new(executor: Executor, registry: &mut KernelRegistry) -> Self {
        registry.register(Self::KERNEL, BASELINE_GROUP_SIZE);
        Self { executor }
    }

    /// Checks every pad of `geometry` over the core range of `fragment`.
    ///
    /// Flags are only ever set, so calling this for several fragments of an
    /// event accumulates. Returns the number of pads flagged by this call.
    pub fn check<G, S, L>(
        &self,
        geometry: &G,
        calib: &Calibration,
        fragment: &CfFragment,
        map: &Array2D<S, L>,
        noisy: &PadNoiseFlags,
    ) -> Result<usize>
    where
        G: PadGeometry + ?Sized,
        S: Deref<Target = [PackedCharge]> + Sync,
        L: GridLayout,
    {
        if !calib.baseline_check_enabled() {
            debug!("fragment {}: baseline check disabled", fragment.index());
            return Ok(0);
        }
        check_grid(map.dims(), geometry, fragment)?;

        let groups: Vec<(usize, usize)> = (0..geometry.num_rows())
            .flat_map(|row| {
                (0..geometry.num_pads(row))
                    .step_by(PADS_PER_CACHELINE)
                    .map(move |pad| (row, pad))
            })
            .collect();

        let first = fragment.first_non_overlap_time_bin() as usize;
        let last = fragment.last_non_overlap_time_bin() as usize;
        let core_length = fragment.length_without_overlap();
        let flagged = AtomicUsize::new(0);

        self.executor.run_indexed(
            groups.len(),
            BASELINE_GROUP_SIZE,
            BaselineShared::new,
            |scope| {
                let (row, first_pad) = groups[scope.index()];
                let num_pads = geometry.num_pads(row);

                for chunk_start in (first..last).step_by(CACHED_TIME_BINS) {
                    scope.lanes(|lane, shared| {
                        let lane_pad = lane % PADS_PER_CACHELINE;
                        let lane_time = lane / PADS_PER_CACHELINE;
                        let pad = first_pad + lane_pad;
                        let time = chunk_start + lane_time;
                        shared.charges[lane_time][lane_pad] = if time < last && pad < num_pads {
                            let pos = ChargePos::new(row as u16, pad as i16, time as i16);
                            map.get(pos).unpack()
                        } else {
                            0.0
                        };
                    });
                    scope.lanes(|lane, shared| {
                        if lane >= PADS_PER_CACHELINE {
                            return;
                        }
                        let valid = (last - chunk_start).min(CACHED_TIME_BINS);
                        for lane_time in 0..valid {
                            let q = shared.charges[lane_time][lane];
                            shared.stats[lane].accumulate(q);
                        }
                    });
                }

                scope.lanes(|lane, shared| {
                    let pad = first_pad + lane;
                    if lane >= PADS_PER_CACHELINE || pad >= num_pads {
                        return;
                    }
                    if is_noisy(&shared.stats[lane], calib, core_length)
                        && noisy.mark_noisy(geometry.global_pad(row, pad))
                    {
                        flagged.fetch_add(1, Ordering::Relaxed);
                    }
                });
            },
        );

        let flagged = flagged.into_inner();
        debug!(
            "fragment {}: {} pads newly flagged noisy ({} total)",
            fragment.index(),
            flagged,
            noisy.count()
        );
        Ok(flagged)
    }
}
