//! Charge map filler: bins decoded digits of one fragment into the grid.

use std::ops::DerefMut;

use log::{debug, trace};
use tpccf_core::{
    Array2D, Calibration, CfFragment, ChargePos, Digit, Error, GridDims, GridLayout,
    PackedCharge, PadGeometry, Result, PADDING_TIME,
};

use crate::registry::KernelRegistry;

/// Checks that a grid of `dims` covers every pad of `geometry` and every
/// time bin of `fragment`, and that fragment time bins fit a position.
pub(crate) fn check_grid<G: PadGeometry + ?Sized>(
    dims: &GridDims,
    geometry: &G,
    fragment: &CfFragment,
) -> Result<()> {
    if dims.rows() < geometry.num_rows() || dims.pads_per_row() < geometry.max_pads_per_row() {
        return Err(Error::GeometryMismatch {
            what: "charge grid pads",
            expected: geometry.num_rows() * geometry.max_pads_per_row(),
            actual: dims.rows() * dims.pads_per_row(),
        });
    }
    if dims.time_bins() < fragment.length() as usize {
        return Err(Error::GeometryMismatch {
            what: "charge grid time bins",
            expected: fragment.length() as usize,
            actual: dims.time_bins(),
        });
    }
    let limit = usize::from(i16::MAX.unsigned_abs()) - PADDING_TIME;
    if fragment.length() as usize > limit {
        return Err(Error::InvalidFragment(format!(
            "fragment of {} time bins exceeds the addressable {limit}",
            fragment.length()
        )));
    }
    Ok(())
}

/// Writes gain-corrected digits into the charge grid.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChargeMapFiller;

impl ChargeMapFiller {
    /// Kernel name in the registry.
    pub const KERNEL: &'static str = "fill_charge_map";

    /// Creates the filler and registers its kernel.
    pub fn new(registry: &mut KernelRegistry) -> Self {
        registry.register(Self::KERNEL, 1);
        Self
    }

    /// Fills `map` with the digits of `fragment` and returns the occupied
    /// positions in digit order.
    ///
    /// Digits outside the fragment or the geometry are skipped, as are
    /// digits whose corrected charge rounds to zero. Several digits on the
    /// same cell add up and the cell is listed once.
    pub fn fill<G, S, L>(
        &self,
        geometry: &G,
        calib: &Calibration,
        fragment: &CfFragment,
        digits: &[Digit],
        map: &mut Array2D<S, L>,
    ) -> Result<Vec<ChargePos>>
    where
        G: PadGeometry + ?Sized,
        S: DerefMut<Target = [PackedCharge]>,
        L: GridLayout,
    {
        check_grid(map.dims(), geometry, fragment)?;

        let mut positions = Vec::with_capacity(digits.len());
        let mut skipped = 0usize;
        for digit in digits {
            let Some(local) = fragment.to_local(digit.time) else {
                skipped += 1;
                continue;
            };
            let row = usize::from(digit.row);
            if !geometry.contains(row, i64::from(digit.pad)) {
                trace!("skipping digit outside geometry: {digit:?}");
                skipped += 1;
                continue;
            }
            let pad = i16::try_from(digit.pad)
                .map_err(|_| Error::InvalidConfig(format!("pad {} not addressable", digit.pad)))?;
            let time = i16::try_from(local).map_err(|_| {
                Error::InvalidFragment(format!("local time bin {local} not addressable"))
            })?;
            let pos = ChargePos::new(digit.row, pad, time);

            let gain = calib.gain_correction(geometry.global_pad(row, usize::from(digit.pad)));
            let q = digit.charge * gain;
            let existing = map.get(pos);
            if existing.has_charge() {
                map.set(pos, PackedCharge::pack(existing.unpack() + q))?;
                continue;
            }
            let packed = PackedCharge::pack(q);
            if !packed.has_charge() {
                skipped += 1;
                continue;
            }
            map.set(pos, packed)?;
            positions.push(pos);
        }

        debug!(
            "fragment {}: filled {} cells from {} digits ({} skipped)",
            fragment.index(),
            positions.len(),
            digits.len(),
            skipped
        );
        Ok(positions)
    }
}
