//! Neighbor finder: links every hit to its best continuation in the
//! adjacent rows.
//!
//! For a hit in an interior row the finder looks for pairs of one hit in
//! the row above and one in the row below that lie on a straight line
//! through it. The row above is searched first in a window around the
//! projection of the hit; if it has candidates, every hit in the window of
//! the row below is projected through the hit onto the row above and
//! compared against them. The pair with the smallest squared distance wins.
//!
//! The first and last rows have only one neighbor row. Their hits link to
//! the candidate closest to the projected window center and leave the other
//! side unlinked.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::float_cmp
)]

use log::debug;
use tpccf_core::{Error, HitRow, Result, RowLinks, SpacePoint, NO_LINK};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::exec::Executor;
use crate::registry::KernelRegistry;
use crate::spatial::RowGrid;

/// Neighbor search configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NeighborConfig {
    /// Half width of the search window in y.
    pub search_area_y: f32,
    /// Half width of the z window per unit of radial distance; zero
    /// switches to a window of `search_area_y` around the projected z.
    pub search_window_dzdr: f32,
    /// Maximum number of candidates kept in the row above.
    pub max_candidates: usize,
    /// Pairs farther apart than this squared distance are not linked.
    pub max_link_distance2: Option<f32>,
    /// Bin width of the row index in y.
    pub bin_y: f32,
    /// Bin width of the row index in z.
    pub bin_z: f32,
}

impl Default for NeighborConfig {
    fn default() -> Self {
        Self {
            search_area_y: 3.0,
            search_window_dzdr: 2.5,
            max_candidates: 20,
            max_link_distance2: None,
            bin_y: 1.0,
            bin_z: 1.0,
        }
    }
}

impl NeighborConfig {
    /// Sets the y search half width.
    #[must_use]
    pub fn with_search_area_y(mut self, area: f32) -> Self {
        self.search_area_y = area;
        self
    }

    /// Sets the z window slope.
    #[must_use]
    pub fn with_search_window_dzdr(mut self, dzdr: f32) -> Self {
        self.search_window_dzdr = dzdr;
        self
    }

    /// Sets the candidate limit.
    #[must_use]
    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    /// Sets the squared link distance limit.
    #[must_use]
    pub fn with_max_link_distance2(mut self, max: Option<f32>) -> Self {
        self.max_link_distance2 = max;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("search_area_y", self.search_area_y),
            ("bin_y", self.bin_y),
            ("bin_z", self.bin_z),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if !self.search_window_dzdr.is_finite() || self.search_window_dzdr < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "search_window_dzdr must be non-negative, got {}",
                self.search_window_dzdr
            )));
        }
        if self.max_candidates == 0 {
            return Err(Error::InvalidConfig("max_candidates must be positive".into()));
        }
        if let Some(max) = self.max_link_distance2 {
            if max.is_nan() || max < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "max_link_distance2 must be non-negative, got {max}"
                )));
            }
        }
        Ok(())
    }
}

/// Radial step to one adjacent row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkSide {
    /// `x_neighbor - x`.
    pub dx: f32,
    /// `x_neighbor / x`.
    pub tx: f32,
}

/// Geometric descriptors of one row towards both neighbors.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct RowLinkGeometry {
    /// Towards the next row, absent for the last row.
    pub up: Option<LinkSide>,
    /// Towards the previous row, absent for the first row.
    pub down: Option<LinkSide>,
}

impl RowLinkGeometry {
    /// Computes the descriptors of every row.
    ///
    /// Fails if a row radius is not positive or two adjacent rows share a
    /// radius.
    pub fn for_rows(rows: &[HitRow]) -> Result<Vec<Self>> {
        if let Some((row, hit_row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| !r.x.is_finite() || r.x <= 0.0)
        {
            return Err(Error::InvalidConfig(format!(
                "row {row} has radius {}",
                hit_row.x
            )));
        }
        let side = |x: f32, x_neighbor: f32, row: usize| -> Result<LinkSide> {
            let dx = x_neighbor - x;
            if dx == 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "row {row} and its neighbor share radius {x}"
                )));
            }
            Ok(LinkSide {
                dx,
                tx: x_neighbor / x,
            })
        };
        (0..rows.len())
            .map(|row| -> Result<Self> {
                let x = rows[row].x;
                let up = rows.get(row + 1).map(|next| side(x, next.x, row)).transpose()?;
                let down = row
                    .checked_sub(1)
                    .map(|prev| side(x, rows[prev].x, row))
                    .transpose()?;
                Ok(Self { up, down })
            })
            .collect()
    }
}

/// Search window in one neighbor row.
#[derive(Clone, Copy, Debug)]
struct Window {
    y_lo: f32,
    y_hi: f32,
    z_lo: f32,
    z_hi: f32,
}

impl Window {
    fn contains(&self, p: SpacePoint) -> bool {
        (self.y_lo..=self.y_hi).contains(&p.y) && (self.z_lo..=self.z_hi).contains(&p.z)
    }

    fn center(&self) -> SpacePoint {
        SpacePoint::new(0.5 * (self.y_lo + self.y_hi), 0.5 * (self.z_lo + self.z_hi))
    }
}

fn neighbor<'a>(
    rows: &'a [HitRow],
    grids: &'a [RowGrid],
    row: usize,
) -> (&'a RowGrid, &'a [SpacePoint]) {
    (&grids[row], &rows[row].hits)
}

/// Links hits of adjacent rows.
#[derive(Clone, Debug)]
pub struct NeighborFinder {
    config: NeighborConfig,
    executor: Executor,
}

impl NeighborFinder {
    /// Kernel names in the registry.
    pub const KERNELS: [&'static str; 2] = ["neighbors_build_row_grid", "neighbors_find_links"];

    /// Creates the finder and registers its kernels.
    pub fn new(
        config: NeighborConfig,
        executor: Executor,
        registry: &mut KernelRegistry,
    ) -> Result<Self> {
        config.validate()?;
        for name in Self::KERNELS {
            registry.register(name, 1);
        }
        Ok(Self { config, executor })
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &NeighborConfig {
        &self.config
    }

    fn window(&self, p: SpacePoint, side: LinkSide) -> Window {
        let y = p.y * side.tx;
        let area = self.config.search_area_y;
        let (z_lo, z_hi) = if self.config.search_window_dzdr == 0.0 {
            let z = p.z * side.tx;
            (z - area, z + area)
        } else {
            let dz = side.dx.abs() * self.config.search_window_dzdr;
            (p.z - dz, p.z + dz)
        };
        Window {
            y_lo: y - area,
            y_hi: y + area,
            z_lo,
            z_hi,
        }
    }

    fn candidates<'a>(
        &self,
        grid: &'a RowGrid,
        hits: &'a [SpacePoint],
        window: Window,
    ) -> impl Iterator<Item = usize> + 'a {
        grid.query(window.y_lo, window.y_hi, window.z_lo, window.z_hi)
            .filter(move |&i| window.contains(hits[i]))
    }

    fn within_limit(&self, distance2: f32) -> bool {
        self.config.max_link_distance2.map_or(true, |max| distance2 <= max)
    }

    /// Closest candidate to the window center, for rows with one neighbor.
    fn link_one_side(
        &self,
        p: SpacePoint,
        side: LinkSide,
        (grid, hits): (&RowGrid, &[SpacePoint]),
    ) -> i32 {
        let window = self.window(p, side);
        let center = window.center();
        let mut best = NO_LINK;
        let mut best_d2 = f32::INFINITY;
        for i in self.candidates(grid, hits, window) {
            let d2 = hits[i].distance_squared(&center);
            if d2 < best_d2 {
                best_d2 = d2;
                best = i as i32;
            }
        }
        if best != NO_LINK && self.within_limit(best_d2) {
            best
        } else {
            NO_LINK
        }
    }

    /// Best (up, down) pair on a straight line through `p`.
    fn link_both_sides(
        &self,
        p: SpacePoint,
        up: LinkSide,
        down: LinkSide,
        (up_grid, up_hits): (&RowGrid, &[SpacePoint]),
        (down_grid, down_hits): (&RowGrid, &[SpacePoint]),
    ) -> (i32, i32) {
        let up_candidates: Vec<(usize, f32, f32)> = self
            .candidates(up_grid, up_hits, self.window(p, up))
            .take(self.config.max_candidates)
            .map(|i| (i, up_hits[i].y - p.y, up_hits[i].z - p.z))
            .collect();
        if up_candidates.is_empty() {
            return (NO_LINK, NO_LINK);
        }

        let scale = up.dx / down.dx;
        let mut best = (NO_LINK, NO_LINK);
        let mut best_d2 = f32::INFINITY;
        for j in self.candidates(down_grid, down_hits, self.window(p, down)) {
            let dy = (down_hits[j].y - p.y) * scale;
            let dz = (down_hits[j].z - p.z) * scale;
            for &(i, up_dy, up_dz) in &up_candidates {
                let d2 = (up_dy - dy) * (up_dy - dy) + (up_dz - dz) * (up_dz - dz);
                if d2 < best_d2 {
                    best_d2 = d2;
                    best = (i as i32, j as i32);
                }
            }
        }
        if best.0 != NO_LINK && self.within_limit(best_d2) {
            best
        } else {
            (NO_LINK, NO_LINK)
        }
    }

    fn link_row(
        &self,
        row: usize,
        rows: &[HitRow],
        grids: &[RowGrid],
        geometry: &RowLinkGeometry,
    ) -> RowLinks {
        let hits = &rows[row].hits;
        let mut links = RowLinks::unlinked(hits.len());
        for (k, &p) in hits.iter().enumerate() {
            match (geometry.up, geometry.down) {
                (Some(up), Some(down)) => {
                    let (u, d) = self.link_both_sides(
                        p,
                        up,
                        down,
                        neighbor(rows, grids, row + 1),
                        neighbor(rows, grids, row - 1),
                    );
                    links.up[k] = u;
                    links.down[k] = d;
                }
                (Some(up), None) => {
                    links.up[k] = self.link_one_side(p, up, neighbor(rows, grids, row + 1));
                }
                (None, Some(down)) => {
                    links.down[k] = self.link_one_side(p, down, neighbor(rows, grids, row - 1));
                }
                (None, None) => {}
            }
        }
        links
    }

    /// Finds the up and down neighbor of every hit of every row.
    ///
    /// Rows must be ordered by radius; results are identical on every
    /// backend.
    pub fn find_links(&self, rows: &[HitRow]) -> Result<Vec<RowLinks>> {
        let geometry = RowLinkGeometry::for_rows(rows)?;
        for (r, row) in rows.iter().enumerate() {
            if i32::try_from(row.len()).is_err() {
                return Err(Error::CapacityOverflow {
                    what: "hits per row",
                    needed: row.len(),
                    capacity: i32::MAX as usize,
                });
            }
            if let Some(k) = row
                .hits
                .iter()
                .position(|h| !h.y.is_finite() || !h.z.is_finite())
            {
                return Err(Error::InvalidConfig(format!(
                    "hit {k} of row {r} has a non-finite coordinate"
                )));
            }
        }

        let grids = self.executor.map(rows, |_, row| {
            RowGrid::build(&row.hits, self.config.bin_y, self.config.bin_z)
        });
        let links = self
            .executor
            .map(&geometry, |r, geo| self.link_row(r, rows, &grids, geo));

        let hits: usize = rows.iter().map(HitRow::len).sum();
        let linked: usize = links.iter().map(RowLinks::linked).sum();
        debug!(
            "linked {linked} of {hits} hits on both sides over {} rows",
            rows.len()
        );
        Ok(links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finder(config: NeighborConfig) -> NeighborFinder {
        NeighborFinder::new(config, Executor::serial(), &mut KernelRegistry::new()).unwrap()
    }

    fn row(x: f32, hits: &[(f32, f32)]) -> HitRow {
        HitRow::new(x, hits.iter().map(|&(y, z)| SpacePoint::new(y, z)).collect())
    }

    #[test]
    fn test_row_geometry() {
        let rows = [row(10.0, &[]), row(11.0, &[]), row(13.0, &[])];
        let geo = RowLinkGeometry::for_rows(&rows).unwrap();
        assert!(geo[0].down.is_none());
        assert!(geo[2].up.is_none());
        let up = geo[1].up.unwrap();
        assert!((up.dx - 2.0).abs() < 1e-6);
        assert!((up.tx - 13.0 / 11.0).abs() < 1e-6);
        let down = geo[1].down.unwrap();
        assert!((down.dx + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_rows_rejected() {
        assert!(RowLinkGeometry::for_rows(&[row(0.0, &[])]).is_err());
        assert!(RowLinkGeometry::for_rows(&[row(5.0, &[]), row(5.0, &[])]).is_err());
    }

    #[test]
    fn test_straight_line_preferred() {
        // Radial track through the middle hit plus a decoy in the row above.
        let rows = [
            row(10.0, &[(1.0, 5.0)]),
            row(11.0, &[(1.1, 5.0)]),
            row(12.0, &[(2.5, 5.0), (1.2, 5.0)]),
        ];
        let links = finder(NeighborConfig::default()).find_links(&rows).unwrap();
        assert_eq!(links[1].up, vec![1]);
        assert_eq!(links[1].down, vec![0]);
    }

    #[test]
    fn test_edge_rows_link_one_side() {
        let rows = [
            row(10.0, &[(1.0, 5.0)]),
            row(11.0, &[(1.1, 5.0)]),
            row(12.0, &[(1.2, 5.0)]),
        ];
        let links = finder(NeighborConfig::default()).find_links(&rows).unwrap();
        assert_eq!(links[0].down, vec![NO_LINK]);
        assert_eq!(links[0].up, vec![0]);
        assert_eq!(links[2].up, vec![NO_LINK]);
        assert_eq!(links[2].down, vec![0]);
    }

    #[test]
    fn test_no_up_candidate_leaves_unlinked() {
        let rows = [
            row(10.0, &[(1.0, 5.0)]),
            row(11.0, &[(1.1, 5.0)]),
            row(12.0, &[(40.0, 5.0)]),
        ];
        let links = finder(NeighborConfig::default()).find_links(&rows).unwrap();
        assert_eq!(links[1].up, vec![NO_LINK]);
        assert_eq!(links[1].down, vec![NO_LINK]);
    }

    #[test]
    fn test_max_link_distance() {
        let rows = [
            row(10.0, &[(1.0, 5.0)]),
            row(11.0, &[(1.1, 5.0)]),
            row(12.0, &[(2.2, 5.0)]),
        ];
        let config = NeighborConfig::default().with_max_link_distance2(Some(0.5));
        let links = finder(config).find_links(&rows).unwrap();
        assert_eq!(links[1].up, vec![NO_LINK]);

        let config = NeighborConfig::default().with_max_link_distance2(Some(2.0));
        let links = finder(config).find_links(&rows).unwrap();
        assert_eq!(links[1].up, vec![0]);
    }

    #[test]
    fn test_projected_z_window() {
        let rows = [
            row(10.0, &[(1.0, 10.0)]),
            row(11.0, &[(1.1, 11.0)]),
            row(12.0, &[(1.2, 12.0)]),
        ];
        let config = NeighborConfig::default().with_search_window_dzdr(0.0);
        let links = finder(config).find_links(&rows).unwrap();
        assert_eq!(links[1].up, vec![0]);
        assert_eq!(links[1].down, vec![0]);
    }

    #[test]
    fn test_single_row_and_empty_rows() {
        let links = finder(NeighborConfig::default())
            .find_links(&[row(10.0, &[(0.0, 0.0)])])
            .unwrap();
        assert_eq!(links[0], RowLinks::unlinked(1));

        let rows = [row(10.0, &[]), row(11.0, &[(0.0, 0.0)]), row(12.0, &[])];
        let links = finder(NeighborConfig::default()).find_links(&rows).unwrap();
        assert!(links[0].is_empty());
        assert_eq!(links[1], RowLinks::unlinked(1));
    }

    #[test]
    fn test_invalid_config() {
        let config = NeighborConfig::default().with_max_candidates(0);
        assert!(NeighborFinder::new(config, Executor::serial(), &mut KernelRegistry::new()).is_err());
        let config = NeighborConfig::default().with_search_area_y(-1.0);
        assert!(config.validate().is_err());
    }
}
