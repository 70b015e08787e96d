#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
use tpccf_algorithms::{
    Backend, ChargeMapFiller, Executor, KernelRegistry, PadBaselineChecker, PeakFinder,
    PEAK_GROUP_SIZE,
};
use tpccf_core::{
    Array2D, Calibration, CfFragment, ChargePos, Digit, GridDims, PackedCharge, PadGeometry,
    PadNoiseFlags, RowGeometry,
};

/// Deterministic linear congruential generator.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }

    fn below(&mut self, n: u32) -> u32 {
        self.next() % n
    }
}

fn random_digits(seed: u64, geo: &RowGeometry, time_bins: u32, n: usize) -> Vec<Digit> {
    let mut rng = Lcg(seed);
    (0..n)
        .map(|_| {
            let row = rng.below(geo.num_rows() as u32);
            let pad = rng.below(geo.num_pads(row as usize) as u32);
            let time = rng.below(time_bins);
            // Coarse charges so that equal neighbors are common.
            let q = (rng.below(12) + 1) as f32 * 2.0;
            Digit::new(row as u16, pad as u16, time, q)
        })
        .collect()
}

struct Filled {
    geo: RowGeometry,
    calib: Calibration,
    map: Array2D<Vec<PackedCharge>>,
    positions: Vec<ChargePos>,
    noisy: PadNoiseFlags,
}

fn filled(seed: u64, digits: usize) -> Filled {
    let geo = RowGeometry::new(vec![20, 24, 28, 32]).unwrap();
    let fragment = CfFragment::new(64, 64).unwrap();
    let calib = Calibration::new().with_inner_threshold(10.0);
    let mut map: Array2D<Vec<PackedCharge>> = Array2D::allocate(GridDims::for_geometry(&geo, 64));
    let digits = random_digits(seed, &geo, 64, digits);
    let positions = ChargeMapFiller::new(&mut KernelRegistry::new())
        .fill(&geo, &calib, &fragment, &digits, &mut map)
        .unwrap();
    let noisy = PadNoiseFlags::new(geo.num_global_pads());
    Filled {
        geo,
        calib,
        map,
        positions,
        noisy,
    }
}

fn run_peaks(f: &Filled, backend: Backend) -> (Vec<bool>, Vec<u8>) {
    let finder = PeakFinder::new(Executor::new(backend), &mut KernelRegistry::new());
    let mut predicate = vec![false; f.positions.len()];
    let mut peak_map: Array2D<Vec<u8>> = Array2D::allocate(*f.map.dims());
    finder
        .find_peaks(
            &f.geo,
            &f.calib,
            &f.map,
            &f.noisy,
            &f.positions,
            &mut predicate,
            &mut peak_map,
        )
        .unwrap();
    let cells = f.positions.iter().map(|&pos| peak_map.get(pos)).collect();
    (predicate, cells)
}

#[test]
fn test_batched_matches_single_position_check() {
    for seed in [1, 7, 42, 1234] {
        let f = filled(seed, 1500);
        assert!(f.positions.len() > PEAK_GROUP_SIZE * 4);
        let (predicate, cells) = run_peaks(&f, Backend::Serial);
        for (i, &pos) in f.positions.iter().enumerate() {
            let expected = PeakFinder::check_position(&f.geo, &f.calib, &f.map, &f.noisy, pos);
            assert_eq!(predicate[i], expected.is_peak(), "seed {seed}, {pos:?}");
            assert_eq!(cells[i], expected.bits(), "seed {seed}, {pos:?}");
        }
    }
}

#[test]
fn test_backends_agree_on_peaks() {
    let f = filled(99, 2000);
    assert_eq!(run_peaks(&f, Backend::Serial), run_peaks(&f, Backend::Parallel));
}

#[test]
fn test_noisy_pads_never_peak() {
    let mut f = filled(5, 1500);
    for pad in (0..f.geo.num_global_pads()).step_by(3) {
        f.noisy.mark_noisy(pad);
    }
    let (predicate, _) = run_peaks(&f, Backend::Parallel);
    for (&pos, &peak) in f.positions.iter().zip(&predicate) {
        let global = f.geo.global_pad(usize::from(pos.row()), usize::from(pos.pad().unsigned_abs()));
        if f.noisy.is_noisy(global) {
            assert!(!peak, "noisy pad {global} reported a peak");
        }
    }
}

#[test]
fn test_noisy_neighbors_do_not_block_peaks() {
    let geo = RowGeometry::uniform(2, 16).unwrap();
    let fragment = CfFragment::new(32, 32).unwrap();
    let calib = Calibration::new();
    let mut map: Array2D<Vec<PackedCharge>> = Array2D::allocate(GridDims::for_geometry(&geo, 32));
    // A hot pad next to a real cluster, once on each side.
    let digits = [
        Digit::new(0, 10, 8, 50.0),
        Digit::new(0, 11, 8, 20.0),
        Digit::new(1, 4, 20, 20.0),
        Digit::new(1, 5, 21, 60.0),
    ];
    let positions = ChargeMapFiller::new(&mut KernelRegistry::new())
        .fill(&geo, &calib, &fragment, &digits, &mut map)
        .unwrap();
    let noisy = PadNoiseFlags::new(geo.num_global_pads());
    noisy.mark_noisy(geo.global_pad(0, 10));
    noisy.mark_noisy(geo.global_pad(1, 5));
    let f = Filled {
        geo,
        calib,
        map,
        positions,
        noisy,
    };

    for backend in [Backend::Serial, Backend::Parallel] {
        let (predicate, _) = run_peaks(&f, backend);
        assert_eq!(predicate, vec![false, true, true, false], "{backend:?}");
    }
    for (i, &pos) in f.positions.iter().enumerate() {
        let single = PeakFinder::check_position(&f.geo, &f.calib, &f.map, &f.noisy, pos);
        assert_eq!(single.is_peak(), i == 1 || i == 2, "{pos:?}");
    }
}

#[test]
fn test_plateau_yields_one_peak() {
    // Two equal cells in every direction of the inner neighborhood.
    let geo = RowGeometry::uniform(1, 16).unwrap();
    let fragment = CfFragment::new(32, 32).unwrap();
    let calib = Calibration::new();
    for (dp, dt) in [(1u16, 0u32), (0, 1), (1, 1)] {
        let mut map: Array2D<Vec<PackedCharge>> =
            Array2D::allocate(GridDims::for_geometry(&geo, 32));
        let digits = [Digit::new(0, 6, 10, 25.0), Digit::new(0, 6 + dp, 10 + dt, 25.0)];
        let positions = ChargeMapFiller::new(&mut KernelRegistry::new())
            .fill(&geo, &calib, &fragment, &digits, &mut map)
            .unwrap();
        let f = Filled {
            geo: geo.clone(),
            calib: calib.clone(),
            map,
            positions,
            noisy: PadNoiseFlags::new(16),
        };
        let (predicate, _) = run_peaks(&f, Backend::Serial);
        assert_eq!(
            predicate.iter().filter(|&&p| p).count(),
            1,
            "offset ({dp}, {dt})"
        );
        // The later cell wins the tie.
        assert!(predicate[1]);
    }
}

#[test]
fn test_backends_agree_on_noisy_pads() {
    let geo = RowGeometry::new(vec![20, 24, 28, 32]).unwrap();
    let fragment = CfFragment::new(64, 64).unwrap();
    let calib = Calibration::new()
        .with_time_bins_above_threshold_per_1000(150)
        .with_consecutive_time_bins_above_threshold(4);
    let mut map: Array2D<Vec<PackedCharge>> = Array2D::allocate(GridDims::for_geometry(&geo, 64));
    let digits = random_digits(3, &geo, 64, 2500);
    ChargeMapFiller::new(&mut KernelRegistry::new())
        .fill(&geo, &calib, &fragment, &digits, &mut map)
        .unwrap();

    let flags: Vec<Vec<usize>> = [Backend::Serial, Backend::Parallel]
        .into_iter()
        .map(|backend| {
            let noisy = PadNoiseFlags::new(geo.num_global_pads());
            PadBaselineChecker::new(Executor::new(backend), &mut KernelRegistry::new())
                .check(&geo, &calib, &fragment, &map, &noisy)
                .unwrap();
            noisy.noisy_pads()
        })
        .collect();
    assert!(!flags[0].is_empty());
    assert_eq!(flags[0], flags[1]);
}
