//! Dense charge grid addressed by (row, pad, time bin).
//!
//! The grid is a view over a buffer allocated by the caller. Every row is
//! surrounded by [`PADDING_PAD`] empty pads and the fragment by
//! [`PADDING_TIME`] empty time bins, so neighbor lookups near an edge read
//! zeros instead of needing bounds checks in the kernels.
//!
//! Cells are stored either linearly or in cacheline-sized tiles
//! ([`TilingLayout`]) so that the pads around a position share a cacheline.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::ops::{Deref, DerefMut};

use crate::error::{Error, Result};
use crate::geometry::PadGeometry;
use crate::pos::{ChargePos, PADDING_PAD, PADDING_TIME};

/// Extent of a charge grid before padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridDims {
    rows: usize,
    pads_per_row: usize,
    time_bins: usize,
}

impl GridDims {
    /// Creates grid dimensions.
    #[must_use]
    pub fn new(rows: usize, pads_per_row: usize, time_bins: usize) -> Self {
        Self {
            rows,
            pads_per_row,
            time_bins,
        }
    }

    /// Dimensions large enough for every row of `geometry`.
    #[must_use]
    pub fn for_geometry<G: PadGeometry + ?Sized>(geometry: &G, time_bins: usize) -> Self {
        Self::new(geometry.num_rows(), geometry.max_pads_per_row(), time_bins)
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Pads per row, without padding.
    #[must_use]
    pub fn pads_per_row(&self) -> usize {
        self.pads_per_row
    }

    /// Time bins per fragment, without padding.
    #[must_use]
    pub fn time_bins(&self) -> usize {
        self.time_bins
    }

    /// Pads per row including the padding on both sides.
    #[must_use]
    pub fn padded_pads_per_row(&self) -> usize {
        self.pads_per_row + 2 * PADDING_PAD
    }

    /// Padded grid width: all rows laid out side by side.
    #[must_use]
    pub fn width(&self) -> usize {
        self.rows * self.padded_pads_per_row()
    }

    /// Padded grid height in time bins.
    #[must_use]
    pub fn height(&self) -> usize {
        self.time_bins + 2 * PADDING_TIME
    }

    /// Maps a position to padded (global pad, time) coordinates.
    ///
    /// Returns `None` for the invalid position and for cells outside the
    /// padded grid.
    #[inline]
    #[must_use]
    pub fn cell(&self, pos: ChargePos) -> Option<(usize, usize)> {
        if !pos.valid() || usize::from(pos.row()) >= self.rows {
            return None;
        }
        let pad = isize::from(pos.pad()) + PADDING_PAD as isize;
        let time = isize::from(pos.time()) + PADDING_TIME as isize;
        if pad < 0 || pad as usize >= self.padded_pads_per_row() {
            return None;
        }
        if time < 0 || time as usize >= self.height() {
            return None;
        }
        let gpad = usize::from(pos.row()) * self.padded_pads_per_row() + pad as usize;
        Some((gpad, time as usize))
    }
}

/// Memory layout of a padded grid.
pub trait GridLayout: Clone + Send + Sync {
    /// Builds the layout for `dims` and elements of `elem_size` bytes.
    fn for_dims(dims: &GridDims, elem_size: usize) -> Self;

    /// Flat index of the padded cell `(gpad, time)`.
    fn index(&self, gpad: usize, time: usize) -> usize;

    /// Number of elements the backing buffer must hold.
    fn len(&self) -> usize;

    /// Returns true if the layout holds no cells.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row-major layout: one padded time bin after the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearLayout {
    width: usize,
    height: usize,
}

impl GridLayout for LinearLayout {
    fn for_dims(dims: &GridDims, _elem_size: usize) -> Self {
        Self {
            width: dims.width(),
            height: dims.height(),
        }
    }

    #[inline]
    fn index(&self, gpad: usize, time: usize) -> usize {
        time * self.width + gpad
    }

    fn len(&self) -> usize {
        self.width * self.height
    }
}

/// Tiled layout where each tile fills one 64-byte cacheline.
///
/// 2-byte cells use tiles of 8 pads x 4 time bins, 1-byte cells 8 x 8.
/// Within a tile cells are stored time-major, tiles are stored row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilingLayout {
    tile_width: usize,
    tile_height: usize,
    width_in_tiles: usize,
    height_in_tiles: usize,
}

impl TilingLayout {
    const CACHELINE: usize = 64;

    /// Tile width in pads.
    #[must_use]
    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    /// Tile height in time bins.
    #[must_use]
    pub fn tile_height(&self) -> usize {
        self.tile_height
    }

    fn tile_shape(elem_size: usize) -> (usize, usize) {
        match elem_size {
            1 => (8, 8),
            2 => (8, 4),
            4 => (4, 4),
            n => (1, (Self::CACHELINE / n.max(1)).max(1)),
        }
    }
}

impl GridLayout for TilingLayout {
    fn for_dims(dims: &GridDims, elem_size: usize) -> Self {
        let (tile_width, tile_height) = Self::tile_shape(elem_size);
        Self {
            tile_width,
            tile_height,
            width_in_tiles: dims.width().div_ceil(tile_width),
            height_in_tiles: dims.height().div_ceil(tile_height),
        }
    }

    #[inline]
    fn index(&self, gpad: usize, time: usize) -> usize {
        let tile_pad = gpad / self.tile_width;
        let tile_time = time / self.tile_height;
        let in_tile_pad = gpad % self.tile_width;
        let in_tile_time = time % self.tile_height;
        (tile_time * self.width_in_tiles + tile_pad) * (self.tile_width * self.tile_height)
            + in_tile_time * self.tile_width
            + in_tile_pad
    }

    fn len(&self) -> usize {
        self.width_in_tiles * self.tile_width * self.height_in_tiles * self.tile_height
    }
}

/// Number of elements of type `T` a grid with `dims` needs in layout `L`.
#[must_use]
pub fn buffer_len<T, L: GridLayout>(dims: &GridDims) -> usize {
    L::for_dims(dims, std::mem::size_of::<T>()).len()
}

/// A 2D view over an externally owned buffer.
///
/// `S` is the storage (`&[T]`, `&mut [T]` or `Vec<T>`); the view itself
/// owns nothing beyond the addressing state.
#[derive(Debug, Clone)]
pub struct Array2D<S, L = TilingLayout> {
    data: S,
    dims: GridDims,
    layout: L,
}

impl<T, S, L> Array2D<S, L>
where
    S: Deref<Target = [T]>,
    T: Copy + Default,
    L: GridLayout,
{
    /// Wraps `data` as a grid of `dims`.
    ///
    /// Fails if the buffer is smaller than the layout requires.
    pub fn new(data: S, dims: GridDims) -> Result<Self> {
        let layout = L::for_dims(&dims, std::mem::size_of::<T>());
        if data.len() < layout.len() {
            return Err(Error::CapacityOverflow {
                what: "charge grid buffer",
                needed: layout.len(),
                capacity: data.len(),
            });
        }
        Ok(Self { data, dims, layout })
    }

    /// Grid dimensions.
    #[must_use]
    pub fn dims(&self) -> &GridDims {
        &self.dims
    }

    /// Memory layout.
    #[must_use]
    pub fn layout(&self) -> &L {
        &self.layout
    }

    #[inline]
    fn index(&self, pos: ChargePos) -> Option<usize> {
        self.dims
            .cell(pos)
            .map(|(gpad, time)| self.layout.index(gpad, time))
    }

    /// Reads a cell. Invalid positions and cells off the grid read as default.
    #[inline]
    #[must_use]
    pub fn get(&self, pos: ChargePos) -> T {
        self.index(pos)
            .map_or_else(T::default, |idx| self.data[idx])
    }

    /// Returns a read-only view of the same buffer.
    #[must_use]
    pub fn view(&self) -> Array2D<&[T], L> {
        Array2D {
            data: &*self.data,
            dims: self.dims,
            layout: self.layout.clone(),
        }
    }
}

impl<T, S, L> Array2D<S, L>
where
    S: DerefMut<Target = [T]>,
    T: Copy + Default,
    L: GridLayout,
{
    /// Writes a cell.
    pub fn set(&mut self, pos: ChargePos, value: T) -> Result<()> {
        match self.index(pos) {
            Some(idx) => {
                self.data[idx] = value;
                Ok(())
            }
            None => Err(Error::OutOfGrid {
                row: pos.row(),
                pad: pos.pad(),
                time: pos.time(),
            }),
        }
    }

    /// Clears every cell to its default value.
    pub fn reset(&mut self) {
        self.data.fill(T::default());
    }
}

impl<T: Copy + Default, L: GridLayout> Array2D<Vec<T>, L> {
    /// Allocates a zeroed grid of `dims`.
    #[must_use]
    pub fn allocate(dims: GridDims) -> Self {
        let layout = L::for_dims(&dims, std::mem::size_of::<T>());
        Self {
            data: vec![T::default(); layout.len()],
            dims,
            layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charge::PackedCharge;
    use crate::pos::Delta2;
    use std::collections::HashSet;

    #[test]
    fn test_padded_dims() {
        let dims = GridDims::new(3, 10, 20);
        assert_eq!(dims.padded_pads_per_row(), 14);
        assert_eq!(dims.width(), 42);
        assert_eq!(dims.height(), 26);
    }

    #[test]
    fn test_tiling_is_a_bijection() {
        let dims = GridDims::new(2, 5, 7);
        let layout = TilingLayout::for_dims(&dims, 2);
        let mut seen = HashSet::new();
        for time in 0..dims.height() {
            for gpad in 0..dims.width() {
                let idx = layout.index(gpad, time);
                assert!(idx < layout.len());
                assert!(seen.insert(idx), "index {idx} used twice");
            }
        }
    }

    #[test]
    fn test_tile_neighbors_share_cacheline() {
        let dims = GridDims::new(1, 32, 32);
        let layout = TilingLayout::for_dims(&dims, 2);
        // Pads 8..16 at time 4 live in one 32-element tile.
        let first = layout.index(8, 4);
        for gpad in 8..16 {
            assert_eq!(layout.index(gpad, 4) / 32, first / 32);
        }
    }

    #[test]
    fn test_get_set() {
        let dims = GridDims::new(2, 8, 16);
        let mut grid: Array2D<Vec<PackedCharge>> = Array2D::allocate(dims);
        let pos = ChargePos::new(1, 3, 5);
        grid.set(pos, PackedCharge::pack(12.5)).unwrap();
        assert_eq!(grid.get(pos), PackedCharge::pack(12.5));
        assert_eq!(grid.get(pos.delta(Delta2::new(1, 0))), PackedCharge::ZERO);
        assert_eq!(grid.get(ChargePos::new(0, 3, 5)), PackedCharge::ZERO);
    }

    #[test]
    fn test_padding_reads_zero() {
        let dims = GridDims::new(1, 4, 4);
        let grid: Array2D<Vec<PackedCharge>> = Array2D::allocate(dims);
        assert_eq!(grid.get(ChargePos::new(0, -2, -3)), PackedCharge::ZERO);
        assert_eq!(grid.get(ChargePos::new(0, -50, 0)), PackedCharge::ZERO);
        assert_eq!(grid.get(ChargePos::invalid()), PackedCharge::ZERO);
        assert_eq!(grid.get(ChargePos::new(9, 0, 0)), PackedCharge::ZERO);
    }

    #[test]
    fn test_set_out_of_grid_fails() {
        let dims = GridDims::new(1, 4, 4);
        let mut grid: Array2D<Vec<u8>, LinearLayout> = Array2D::allocate(dims);
        assert!(matches!(
            grid.set(ChargePos::new(2, 0, 0), 1),
            Err(Error::OutOfGrid { row: 2, .. })
        ));
        assert!(grid.set(ChargePos::invalid(), 1).is_err());
    }

    #[test]
    fn test_view_over_external_buffer() {
        let dims = GridDims::new(1, 4, 4);
        let mut buffer = vec![0u8; buffer_len::<u8, TilingLayout>(&dims)];
        {
            let mut grid: Array2D<&mut [u8]> = Array2D::new(&mut buffer[..], dims).unwrap();
            grid.set(ChargePos::new(0, 1, 1), 3).unwrap();
        }
        let grid: Array2D<&[u8]> = Array2D::new(&buffer[..], dims).unwrap();
        assert_eq!(grid.get(ChargePos::new(0, 1, 1)), 3);
        assert_eq!(buffer.iter().filter(|&&v| v != 0).count(), 1);
    }

    #[test]
    fn test_undersized_buffer_rejected() {
        let dims = GridDims::new(1, 4, 4);
        let buffer = vec![0u8; 3];
        let grid: Result<Array2D<&[u8]>> = Array2D::new(&buffer[..], dims);
        assert!(matches!(grid, Err(Error::CapacityOverflow { .. })));
    }

    #[test]
    fn test_reset() {
        let dims = GridDims::new(1, 4, 4);
        let mut grid: Array2D<Vec<u8>> = Array2D::allocate(dims);
        grid.set(ChargePos::new(0, 0, 0), 7).unwrap();
        grid.reset();
        assert_eq!(grid.get(ChargePos::new(0, 0, 0)), 0);
    }
}
