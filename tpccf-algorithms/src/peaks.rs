//! Peak finder.
//!
//! A position is a peak if its charge is above the cutoff and it is a local
//! maximum among its 8 inner neighbors. Ties are broken by direction: the
//! neighbors before the cell (lower pad, or same pad and lower time) may be
//! equal, the ones after it must be strictly smaller. On a plateau of two
//! equal cells exactly one of them is a peak.
//!
//! Each group of [`PEAK_GROUP_SIZE`] lanes handles a chunk of positions.
//! Lanes whose charge is below the cutoff drop out early; the remaining
//! ones are packed to the front of the group, and all lanes then load the
//! neighborhoods of the active positions together before comparing.

use std::ops::{Deref, DerefMut};

use log::debug;
use tpccf_core::{
    Array2D, Calibration, Charge, ChargePos, Delta2, Error, GridLayout, PackedCharge,
    PadGeometry, PadNoiseFlags, Result,
};

use crate::exec::Executor;
use crate::registry::KernelRegistry;

/// Lanes per group.
pub const PEAK_GROUP_SIZE: usize = 64;

/// The 8 inner neighbors as (pad, time) offsets.
///
/// The first [`NUM_LESS_EQUAL`] may equal the center charge, the rest must
/// be strictly smaller.
pub const INNER_NEIGHBORS: [Delta2; 8] = [
    Delta2::new(-1, -1),
    Delta2::new(-1, 0),
    Delta2::new(-1, 1),
    Delta2::new(0, -1),
    Delta2::new(1, -1),
    Delta2::new(0, 1),
    Delta2::new(1, 0),
    Delta2::new(1, 1),
];

/// Number of leading [`INNER_NEIGHBORS`] compared with `<=`.
pub const NUM_LESS_EQUAL: usize = 4;

/// Two-bit peak map entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeakMapValue(u8);

impl PeakMapValue {
    const PEAK: u8 = 0b01;
    const ABOVE_INNER: u8 = 0b10;

    /// Creates an entry.
    #[must_use]
    pub const fn new(is_peak: bool, above_inner_threshold: bool) -> Self {
        let mut bits = 0;
        if is_peak {
            bits |= Self::PEAK;
        }
        if above_inner_threshold {
            bits |= Self::ABOVE_INNER;
        }
        Self(bits)
    }

    /// Rebuilds an entry from a peak map cell.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & (Self::PEAK | Self::ABOVE_INNER))
    }

    /// Returns true if the cell is a peak.
    #[must_use]
    pub const fn is_peak(self) -> bool {
        self.0 & Self::PEAK != 0
    }

    /// Returns true if the cell charge exceeds the inner threshold.
    #[must_use]
    pub const fn above_inner_threshold(self) -> bool {
        self.0 & Self::ABOVE_INNER != 0
    }

    /// Raw bits as stored in the peak map.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

/// Local maximum test with the directional tie-break.
#[inline]
#[must_use]
pub fn is_local_maximum(q: Charge, neighbors: &[Charge; 8]) -> bool {
    let (before, after) = neighbors.split_at(NUM_LESS_EQUAL);
    before.iter().all(|&n| n <= q) && after.iter().all(|&n| n < q)
}

#[derive(Clone, Copy, Default)]
struct LaneRegs {
    q: Charge,
    below: bool,
}

struct PeakShared {
    pos: [ChargePos; PEAK_GROUP_SIZE],
    active: [bool; PEAK_GROUP_SIZE],
    slot: [usize; PEAK_GROUP_SIZE],
    slot_pos: [ChargePos; PEAK_GROUP_SIZE],
    n_active: usize,
    neighbors: [[Charge; 8]; PEAK_GROUP_SIZE],
}

impl PeakShared {
    fn new() -> Self {
        Self {
            pos: [ChargePos::invalid(); PEAK_GROUP_SIZE],
            active: [false; PEAK_GROUP_SIZE],
            slot: [0; PEAK_GROUP_SIZE],
            slot_pos: [ChargePos::invalid(); PEAK_GROUP_SIZE],
            n_active: 0,
            neighbors: [[0.0; 8]; PEAK_GROUP_SIZE],
        }
    }
}

/// Finds local charge maxima among occupied positions.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeakFinder {
    executor: Executor,
}

impl PeakFinder {
    /// Kernel name in the registry.
    pub const KERNEL: &'static str = "find_peaks";

    /// Creates the peak finder and registers its kernel.
    pub fn new(executor: Executor, registry: &mut KernelRegistry) -> Self {
        registry.register(Self::KERNEL, PEAK_GROUP_SIZE);
        Self { executor }
    }

    /// Charge of `pos` as the peak finder sees it: zero for invalid
    /// positions and noisy pads. Used for the center and its neighbors, so
    /// a noisy pad never blocks a neighboring peak.
    fn charge_at<G, S, L>(
        geometry: &G,
        map: &Array2D<S, L>,
        noisy: &PadNoiseFlags,
        pos: ChargePos,
    ) -> Charge
    where
        G: PadGeometry + ?Sized,
        S: Deref<Target = [PackedCharge]>,
        L: GridLayout,
    {
        if !pos.valid() {
            return 0.0;
        }
        let row = usize::from(pos.row());
        let is_noisy = geometry.contains(row, i64::from(pos.pad()))
            && usize::try_from(pos.pad())
                .is_ok_and(|pad| noisy.is_noisy(geometry.global_pad(row, pad)));
        if is_noisy {
            0.0
        } else {
            map.get(pos).unpack()
        }
    }

    /// Evaluates a single position without any batching.
    pub fn check_position<G, S, L>(
        geometry: &G,
        calib: &Calibration,
        map: &Array2D<S, L>,
        noisy: &PadNoiseFlags,
        pos: ChargePos,
    ) -> PeakMapValue
    where
        G: PadGeometry + ?Sized,
        S: Deref<Target = [PackedCharge]>,
        L: GridLayout,
    {
        let q = Self::charge_at(geometry, map, noisy, pos);
        let below = q <= calib.min_charge_cutoff;
        let q = PackedCharge::quantize(q);
        let neighbors =
            INNER_NEIGHBORS.map(|d| Self::charge_at(geometry, map, noisy, pos.delta(d)));
        let peak = !below && is_local_maximum(q, &neighbors);
        PeakMapValue::new(peak, q > calib.inner_threshold)
    }

    /// Runs the peak finder over `positions`.
    ///
    /// Writes `predicate[i]` for every position and the peak map entry of
    /// every valid position. `predicate` may be longer than `positions`;
    /// slots past the positions are left untouched. Returns the number of
    /// peaks.
    #[allow(clippy::too_many_arguments)]
    pub fn find_peaks<G, S, L, P, M>(
        &self,
        geometry: &G,
        calib: &Calibration,
        map: &Array2D<S, L>,
        noisy: &PadNoiseFlags,
        positions: &[ChargePos],
        predicate: &mut [bool],
        peak_map: &mut Array2D<P, M>,
    ) -> Result<usize>
    where
        G: PadGeometry + ?Sized,
        S: Deref<Target = [PackedCharge]> + Sync,
        L: GridLayout,
        P: DerefMut<Target = [u8]>,
        M: GridLayout,
    {
        let n = positions.len();
        if predicate.len() < n {
            return Err(Error::GeometryMismatch {
                what: "peak predicate",
                expected: n,
                actual: predicate.len(),
            });
        }
        if n == 0 {
            return Ok(0);
        }

        let mut values = vec![PeakMapValue::default(); n];
        self.executor.run_groups(
            &mut values,
            PEAK_GROUP_SIZE,
            PeakShared::new,
            |scope, chunk| {
                let base = scope.base();
                let mut regs = [LaneRegs::default(); PEAK_GROUP_SIZE];

                scope.lanes_with(&mut regs, |lane, regs, shared| {
                    // Padding lanes recompute the last position and are
                    // discarded on write.
                    let pos = positions[(base + lane).min(n - 1)];
                    regs.q = Self::charge_at(geometry, map, noisy, pos);
                    regs.below = regs.q <= calib.min_charge_cutoff;
                    shared.pos[lane] = pos;
                    shared.active[lane] = !regs.below;
                });

                scope.single(|shared| {
                    let mut next = 0;
                    for lane in 0..PEAK_GROUP_SIZE {
                        if shared.active[lane] {
                            shared.slot[lane] = next;
                            next += 1;
                        }
                    }
                    shared.n_active = next;
                });

                scope.lanes(|lane, shared| {
                    if shared.active[lane] {
                        shared.slot_pos[shared.slot[lane]] = shared.pos[lane];
                    }
                });

                scope.lanes(|lane, shared| {
                    let work = shared.n_active * INNER_NEIGHBORS.len();
                    for i in (lane..work).step_by(PEAK_GROUP_SIZE) {
                        let slot = i / INNER_NEIGHBORS.len();
                        let k = i % INNER_NEIGHBORS.len();
                        let neighbor = shared.slot_pos[slot].delta(INNER_NEIGHBORS[k]);
                        shared.neighbors[slot][k] =
                            Self::charge_at(geometry, map, noisy, neighbor);
                    }
                });

                scope.lanes_with(&mut regs, |lane, regs, shared| {
                    if lane >= chunk.len() {
                        return;
                    }
                    let q = PackedCharge::quantize(regs.q);
                    let peak = !regs.below
                        && is_local_maximum(q, &shared.neighbors[shared.slot[lane]]);
                    chunk[lane] = PeakMapValue::new(peak, q > calib.inner_threshold);
                });
            },
        );

        let mut peaks = 0;
        for ((pos, value), slot) in positions.iter().zip(&values).zip(predicate.iter_mut()) {
            *slot = value.is_peak();
            peaks += usize::from(value.is_peak());
            if pos.valid() {
                peak_map.set(*pos, value.bits())?;
            }
        }
        debug!("found {peaks} peaks among {n} positions");
        Ok(peaks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpccf_core::{GridDims, LinearLayout, RowGeometry};

    struct Fixture {
        geo: RowGeometry,
        map: Array2D<Vec<PackedCharge>>,
        peak_map: Array2D<Vec<u8>>,
        noisy: PadNoiseFlags,
        positions: Vec<ChargePos>,
    }

    impl Fixture {
        fn new(cells: &[(i16, i16, f32)]) -> Self {
            let geo = RowGeometry::new(vec![16]).unwrap();
            let dims = GridDims::for_geometry(&geo, 16);
            let mut map: Array2D<Vec<PackedCharge>> = Array2D::allocate(dims);
            let mut positions = Vec::new();
            for &(pad, time, q) in cells {
                let pos = ChargePos::new(0, pad, time);
                map.set(pos, PackedCharge::pack(q)).unwrap();
                positions.push(pos);
            }
            Self {
                noisy: PadNoiseFlags::new(geo.num_global_pads()),
                peak_map: Array2D::allocate(dims),
                geo,
                map,
                positions,
            }
        }

        fn run(&mut self, calib: &Calibration) -> Vec<bool> {
            let finder = PeakFinder::new(Executor::serial(), &mut KernelRegistry::new());
            let mut predicate = vec![false; self.positions.len()];
            finder
                .find_peaks(
                    &self.geo,
                    calib,
                    &self.map,
                    &self.noisy,
                    &self.positions,
                    &mut predicate,
                    &mut self.peak_map,
                )
                .unwrap();
            predicate
        }
    }

    #[test]
    fn test_peak_map_value_bits() {
        assert_eq!(PeakMapValue::new(true, false).bits(), 1);
        assert_eq!(PeakMapValue::new(false, true).bits(), 2);
        let both = PeakMapValue::from_bits(0xff);
        assert!(both.is_peak());
        assert!(both.above_inner_threshold());
        assert_eq!(both.bits(), 3);
    }

    #[test]
    fn test_tie_break_directions() {
        let mut neighbors = [1.0; 8];
        assert!(is_local_maximum(5.0, &neighbors));
        neighbors[1] = 5.0;
        assert!(is_local_maximum(5.0, &neighbors));
        neighbors[1] = 1.0;
        neighbors[6] = 5.0;
        assert!(!is_local_maximum(5.0, &neighbors));
    }

    #[test]
    fn test_single_peak() {
        let mut fx = Fixture::new(&[(4, 4, 10.0), (5, 4, 6.0), (4, 5, 8.0)]);
        let predicate = fx.run(&Calibration::new());
        assert_eq!(predicate, vec![true, false, false]);
        let value = PeakMapValue::from_bits(fx.peak_map.get(ChargePos::new(0, 4, 4)));
        assert!(value.is_peak());
        assert!(value.above_inner_threshold());
    }

    #[test]
    fn test_plateau_has_one_peak() {
        // Equal charges along the time axis and along the pad axis.
        let mut fx = Fixture::new(&[(2, 2, 9.0), (2, 3, 9.0), (8, 8, 7.0), (9, 8, 7.0)]);
        let predicate = fx.run(&Calibration::new());
        assert_eq!(predicate, vec![false, true, false, true]);
    }

    #[test]
    fn test_cutoff_and_noisy_pads() {
        let mut fx = Fixture::new(&[(3, 3, 3.0), (10, 3, 50.0)]);
        fx.noisy.mark_noisy(10);
        let predicate = fx.run(&Calibration::new());
        assert_eq!(predicate, vec![false, false]);
    }

    #[test]
    fn test_noisy_neighbor_does_not_block_peak() {
        let mut fx = Fixture::new(&[(10, 4, 50.0), (11, 4, 20.0)]);
        fx.noisy.mark_noisy(10);
        let calib = Calibration::new();
        assert_eq!(fx.run(&calib), vec![false, true]);
        let single = PeakFinder::check_position(&fx.geo, &calib, &fx.map, &fx.noisy, fx.positions[1]);
        assert!(single.is_peak());
    }

    #[test]
    fn test_requantized_charge() {
        // 3.02 packs to 3.0 and is at the cutoff; the batch path must agree
        // with the single-position check.
        let mut fx = Fixture::new(&[(3, 3, 3.02), (7, 7, 3.1)]);
        let calib = Calibration::new();
        let predicate = fx.run(&calib);
        assert_eq!(predicate, vec![false, true]);
        for (pos, &p) in fx.positions.iter().zip(&predicate) {
            let single = PeakFinder::check_position(&fx.geo, &calib, &fx.map, &fx.noisy, *pos);
            assert_eq!(single.is_peak(), p);
        }
    }

    #[test]
    fn test_padding_lanes_discarded() {
        let fx = Fixture::new(&[(1, 1, 20.0), (6, 6, 20.0), (12, 12, 1.0)]);
        let finder = PeakFinder::new(Executor::parallel(), &mut KernelRegistry::new());
        let mut predicate = vec![true; PEAK_GROUP_SIZE];
        let mut peak_map: Array2D<Vec<u8>, LinearLayout> =
            Array2D::allocate(*fx.map.dims());
        let peaks = finder
            .find_peaks(
                &fx.geo,
                &Calibration::new(),
                &fx.map,
                &fx.noisy,
                &fx.positions,
                &mut predicate,
                &mut peak_map,
            )
            .unwrap();
        assert_eq!(peaks, 2);
        assert_eq!(&predicate[..3], &[true, true, false]);
        assert!(predicate[3..].iter().all(|&p| p));
    }

    #[test]
    fn test_short_predicate_rejected() {
        let mut fx = Fixture::new(&[(1, 1, 20.0)]);
        let finder = PeakFinder::new(Executor::serial(), &mut KernelRegistry::new());
        let result = finder.find_peaks(
            &fx.geo,
            &Calibration::new(),
            &fx.map,
            &fx.noisy,
            &fx.positions,
            &mut [],
            &mut fx.peak_map,
        );
        assert!(matches!(result, Err(Error::GeometryMismatch { .. })));
    }
}
