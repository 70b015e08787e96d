//! Spatial indexing of the hits of one row.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use tpccf_core::SpacePoint;

/// Upper bound on bins per axis; wider rows get wider bins.
const MAX_BINS_PER_AXIS: usize = 256;

/// Binned (y, z) index over the hits of one row.
///
/// Bins are stored densely and hits are sorted by bin with a stable
/// counting sort, so hits of one bin are contiguous and keep their input
/// order.
#[derive(Debug, Clone)]
pub struct RowGrid {
    y_min: f32,
    z_min: f32,
    inv_bin_y: f32,
    inv_bin_z: f32,
    ny: usize,
    nz: usize,
    first_hit: Vec<u32>,
    hits: Vec<u32>,
}

fn axis(values: impl Iterator<Item = f32> + Clone, bin: f32) -> (f32, f32, usize) {
    let min = values.clone().fold(f32::INFINITY, f32::min);
    let max = values.fold(f32::NEG_INFINITY, f32::max);
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0, 1);
    }
    let extent = max - min;
    let width = bin.max(extent / (MAX_BINS_PER_AXIS - 1) as f32).max(f32::MIN_POSITIVE);
    let inv = 1.0 / width;
    let n = ((extent * inv) as usize + 1).min(MAX_BINS_PER_AXIS);
    (min, inv, n)
}

impl RowGrid {
    /// Bins `points` with bins of `bin_y` x `bin_z`.
    #[must_use]
    pub fn build(points: &[SpacePoint], bin_y: f32, bin_z: f32) -> Self {
        let (y_min, inv_bin_y, ny) = axis(points.iter().map(|p| p.y), bin_y);
        let (z_min, inv_bin_z, nz) = axis(points.iter().map(|p| p.z), bin_z);
        let mut grid = Self {
            y_min,
            z_min,
            inv_bin_y,
            inv_bin_z,
            ny,
            nz,
            first_hit: vec![0; ny * nz + 1],
            hits: vec![0; points.len()],
        };

        let bins: Vec<usize> = points
            .iter()
            .map(|p| grid.bin(grid.bin_y(p.y), grid.bin_z(p.z)))
            .collect();
        for &bin in &bins {
            grid.first_hit[bin + 1] += 1;
        }
        for i in 1..grid.first_hit.len() {
            grid.first_hit[i] += grid.first_hit[i - 1];
        }
        let mut fill = grid.first_hit.clone();
        for (hit, &bin) in bins.iter().enumerate() {
            grid.hits[fill[bin] as usize] = hit as u32;
            fill[bin] += 1;
        }
        grid
    }

    #[inline]
    fn bin(&self, iy: usize, iz: usize) -> usize {
        iy * self.nz + iz
    }

    #[inline]
    fn bin_y(&self, y: f32) -> usize {
        (((y - self.y_min) * self.inv_bin_y).max(0.0) as usize).min(self.ny - 1)
    }

    #[inline]
    fn bin_z(&self, z: f32) -> usize {
        (((z - self.z_min) * self.inv_bin_z).max(0.0) as usize).min(self.nz - 1)
    }

    /// Number of indexed hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if no hits are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Hits in all bins touching the window, bin by bin.
    ///
    /// The result may contain hits outside the window; callers filter.
    pub fn query(
        &self,
        y_lo: f32,
        y_hi: f32,
        z_lo: f32,
        z_hi: f32,
    ) -> impl Iterator<Item = usize> + '_ {
        let (y0, y1) = (self.bin_y(y_lo), self.bin_y(y_hi));
        let (z0, z1) = (self.bin_z(z_lo), self.bin_z(z_hi));
        let empty = self.hits.is_empty() || y_lo > y_hi || z_lo > z_hi;
        let ys = if empty { 1..0 } else { y0..y1 + 1 };
        ys.flat_map(move |iy| {
            let first = self.first_hit[self.bin(iy, z0)] as usize;
            let last = self.first_hit[self.bin(iy, z1) + 1] as usize;
            self.hits[first..last].iter().map(|&hit| hit as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(coords: &[(f32, f32)]) -> Vec<SpacePoint> {
        coords.iter().map(|&(y, z)| SpacePoint::new(y, z)).collect()
    }

    #[test]
    fn test_query_finds_nearby() {
        let pts = points(&[(0.0, 0.0), (0.5, 0.5), (10.0, 10.0), (0.2, 9.0)]);
        let grid = RowGrid::build(&pts, 1.0, 1.0);
        let found: Vec<_> = grid.query(-0.5, 0.9, -0.5, 0.9).collect();
        assert_eq!(found, vec![0, 1]);
        let found: Vec<_> = grid.query(9.5, 10.5, 9.5, 10.5).collect();
        assert_eq!(found, vec![2]);
    }

    #[test]
    fn test_stable_within_bin() {
        let pts = points(&[(1.0, 1.0), (1.1, 1.1), (1.2, 1.2)]);
        let grid = RowGrid::build(&pts, 5.0, 5.0);
        let found: Vec<_> = grid.query(0.0, 2.0, 0.0, 2.0).collect();
        assert_eq!(found, vec![0, 1, 2]);
    }

    #[test]
    fn test_every_hit_indexed_once() {
        let pts: Vec<_> = (0..500)
            .map(|i| SpacePoint::new((i % 37) as f32 * 0.7, (i % 11) as f32 * 3.1))
            .collect();
        let grid = RowGrid::build(&pts, 1.0, 1.0);
        let mut all: Vec<_> = grid.query(-100.0, 100.0, -100.0, 100.0).collect();
        all.sort_unstable();
        assert_eq!(all, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_grid() {
        let grid = RowGrid::build(&[], 1.0, 1.0);
        assert!(grid.is_empty());
        assert_eq!(grid.query(0.0, 1.0, 0.0, 1.0).count(), 0);
    }

    #[test]
    fn test_wide_rows_cap_bins() {
        let pts = points(&[(0.0, 0.0), (1.0e6, 0.0)]);
        let grid = RowGrid::build(&pts, 0.1, 0.1);
        assert!(grid.ny <= MAX_BINS_PER_AXIS);
        let found: Vec<_> = grid.query(1.0e6 - 1.0, 1.0e6 + 1.0, -1.0, 1.0).collect();
        assert_eq!(found, vec![1]);
    }
}
