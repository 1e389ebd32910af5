// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Storage for UV grids.
//!
//! Grids are indexed `(channel, polarisation, y, x)`. Small grids live in
//! memory ([`ArrayGrid`]); grids larger than the memory budget are split into
//! square tiles kept in a scratch file, with only the most recently used
//! tiles held in memory ([`TiledGrid`]).

use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::trace;
use marlu::{c32, c64};
use ndarray::prelude::*;
use num_complex::Complex;
use num_traits::Float;

use super::{
    inner::{get_window, put_window, Footprint, KernelPlane, Window},
    GridError,
};

/// The floating-point types that grids can accumulate in.
pub trait GridFloat: Float + Send + Sync + std::fmt::Debug + 'static {
    fn from_f32(x: f32) -> Self;
    fn from_f64(x: f64) -> Self;
    fn widen(self) -> f64;
}

impl GridFloat for f32 {
    #[inline]
    fn from_f32(x: f32) -> Self {
        x
    }

    #[inline]
    fn from_f64(x: f64) -> Self {
        x as f32
    }

    #[inline]
    fn widen(self) -> f64 {
        self as f64
    }
}

impl GridFloat for f64 {
    #[inline]
    fn from_f32(x: f32) -> Self {
        x as f64
    }

    #[inline]
    fn from_f64(x: f64) -> Self {
        x
    }

    #[inline]
    fn widen(self) -> f64 {
        self
    }
}

#[inline]
fn narrow<F: GridFloat>(v: c64) -> Complex<F> {
    Complex::new(F::from_f64(v.re), F::from_f64(v.im))
}

#[inline]
fn widen<F: GridFloat>(v: Complex<F>) -> c64 {
    c64::new(v.re.widen(), v.im.widen())
}

/// Somewhere to keep a UV grid.
pub(crate) trait GridStorage: Send {
    /// `(nchan, npol, ny, nx)`.
    fn shape(&self) -> [usize; 4];

    /// Grid `value` through a footprint. Returns the sum of the real parts of
    /// the kernel samples used.
    fn put(
        &mut self,
        chan: usize,
        pol: usize,
        footprint: &Footprint,
        kernel: &KernelPlane,
        value: c64,
    ) -> Result<f64, GridError>;

    /// Degrid through a footprint. Returns the kernel-weighted sum of the
    /// grid and the sum of the real parts of the kernel samples used.
    fn get(
        &mut self,
        chan: usize,
        pol: usize,
        footprint: &Footprint,
        kernel: &KernelPlane,
    ) -> Result<(c64, f64), GridError>;

    /// A copy of a whole grid plane.
    fn plane(&mut self, chan: usize, pol: usize) -> Result<Array2<c64>, GridError>;

    /// Overwrite a whole grid plane.
    fn set_plane(&mut self, chan: usize, pol: usize, plane: ArrayView2<c64>)
        -> Result<(), GridError>;

    /// Convert to single-precision storage.
    fn into_single(self: Box<Self>) -> Result<Box<dyn GridStorage>, GridError>;

    fn is_tiled(&self) -> bool {
        false
    }

    fn check_plane(&self, chan: usize, pol: usize) -> Result<(), GridError> {
        let [nchan, npol, _, _] = self.shape();
        if chan >= nchan || pol >= npol {
            Err(GridError::ShapeMismatch {
                expected: vec![nchan, npol],
                actual: vec![chan, pol],
            })
        } else {
            Ok(())
        }
    }
}

/// A grid held entirely in memory.
pub(crate) struct ArrayGrid<F: GridFloat> {
    shape: [usize; 4],
    data: Vec<Complex<F>>,
}

impl<F: GridFloat> ArrayGrid<F> {
    pub(crate) fn new(shape: [usize; 4]) -> ArrayGrid<F> {
        ArrayGrid {
            shape,
            data: vec![Complex::new(F::zero(), F::zero()); shape.iter().product()],
        }
    }

    fn window(&mut self, chan: usize, pol: usize) -> Window<Complex<F>> {
        let [_, npol, ny, nx] = self.shape;
        let start = (chan * npol + pol) * ny * nx;
        Window {
            data: &mut self.data[start..start + ny * nx],
            dim: (ny, nx),
            origin: (0, 0),
        }
    }
}

impl<F: GridFloat> GridStorage for ArrayGrid<F> {
    fn shape(&self) -> [usize; 4] {
        self.shape
    }

    fn put(
        &mut self,
        chan: usize,
        pol: usize,
        footprint: &Footprint,
        kernel: &KernelPlane,
        value: c64,
    ) -> Result<f64, GridError> {
        self.check_plane(chan, pol)?;
        let mut window = self.window(chan, pol);
        Ok(put_window(&mut window, footprint, kernel, narrow(value)).widen())
    }

    fn get(
        &mut self,
        chan: usize,
        pol: usize,
        footprint: &Footprint,
        kernel: &KernelPlane,
    ) -> Result<(c64, f64), GridError> {
        self.check_plane(chan, pol)?;
        let window = self.window(chan, pol);
        let (sum, norm) = get_window(&window, footprint, kernel);
        Ok((widen(sum), norm.widen()))
    }

    fn plane(&mut self, chan: usize, pol: usize) -> Result<Array2<c64>, GridError> {
        self.check_plane(chan, pol)?;
        let window = self.window(chan, pol);
        let dim = window.dim;
        let data = window.data.iter().copied().map(widen).collect();
        Array2::from_shape_vec(dim, data).map_err(|_| GridError::ShapeMismatch {
            expected: vec![dim.0, dim.1],
            actual: vec![],
        })
    }

    fn set_plane(
        &mut self,
        chan: usize,
        pol: usize,
        plane: ArrayView2<c64>,
    ) -> Result<(), GridError> {
        self.check_plane(chan, pol)?;
        let window = self.window(chan, pol);
        if plane.dim() != window.dim {
            return Err(GridError::ShapeMismatch {
                expected: vec![window.dim.0, window.dim.1],
                actual: plane.shape().to_vec(),
            });
        }
        for (g, &v) in window.data.iter_mut().zip(plane.iter()) {
            *g = narrow(v);
        }
        Ok(())
    }

    fn into_single(self: Box<Self>) -> Result<Box<dyn GridStorage>, GridError> {
        let data = self
            .data
            .into_iter()
            .map(|v| Complex::new(v.re.widen() as f32, v.im.widen() as f32))
            .collect();
        Ok(Box::new(ArrayGrid::<f32> {
            shape: self.shape,
            data,
        }))
    }
}

struct Tile {
    data: Vec<c32>,
    last_used: u64,
    dirty: bool,
}

/// A single-precision grid split into square tiles that are paged between a
/// scratch file and a bounded in-memory cache. Tiles that have never been
/// written read as zeros.
pub(crate) struct TiledGrid {
    shape: [usize; 4],
    tile_size: usize,
    tiles_x: usize,
    tiles_y: usize,
    file: File,
    on_disk: Vec<bool>,
    tiles: HashMap<usize, Tile>,
    max_tiles: usize,
    clock: u64,
}

impl TiledGrid {
    /// Make a new tiled grid. At most `budget` complex elements are kept in
    /// memory.
    pub(crate) fn new(
        shape: [usize; 4],
        tile_size: usize,
        budget: usize,
    ) -> Result<TiledGrid, GridError> {
        let [nchan, npol, ny, nx] = shape;
        let tiles_x = (nx + tile_size - 1) / tile_size;
        let tiles_y = (ny + tile_size - 1) / tile_size;
        let num_tiles = nchan * npol * tiles_x * tiles_y;
        let max_tiles = (budget / (tile_size * tile_size)).max(1);
        trace!("Tiled grid with {num_tiles} tiles, at most {max_tiles} in memory");
        Ok(TiledGrid {
            shape,
            tile_size,
            tiles_x,
            tiles_y,
            file: tempfile::tempfile()?,
            on_disk: vec![false; num_tiles],
            tiles: HashMap::new(),
            max_tiles,
            clock: 0,
        })
    }

    fn tile_len(&self) -> usize {
        self.tile_size * self.tile_size
    }

    fn tile_index(&self, chan: usize, pol: usize, ty: usize, tx: usize) -> usize {
        let [_, npol, _, _] = self.shape;
        ((chan * npol + pol) * self.tiles_y + ty) * self.tiles_x + tx
    }

    fn tile_offset(&self, index: usize) -> u64 {
        // Two f32s per element.
        (index * self.tile_len() * 8) as u64
    }

    fn read_tile(&mut self, index: usize) -> Result<Vec<c32>, GridError> {
        let mut floats = vec![0.0; 2 * self.tile_len()];
        let offset = self.tile_offset(index);
        self.file.seek(SeekFrom::Start(offset))?;
        let mut bytes = vec![0; floats.len() * 4];
        self.file.read_exact(&mut bytes)?;
        bytes.as_slice().read_f32_into::<LittleEndian>(&mut floats)?;
        Ok(floats
            .chunks_exact(2)
            .map(|pair| c32::new(pair[0], pair[1]))
            .collect())
    }

    fn write_tile(&mut self, index: usize, data: &[c32]) -> Result<(), GridError> {
        let mut bytes = Vec::with_capacity(data.len() * 8);
        for v in data {
            bytes.write_f32::<LittleEndian>(v.re)?;
            bytes.write_f32::<LittleEndian>(v.im)?;
        }
        let offset = self.tile_offset(index);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&bytes)?;
        self.on_disk[index] = true;
        Ok(())
    }

    /// Write the least recently used tile to disk (if it has changed) and
    /// drop it from memory.
    fn evict(&mut self) -> Result<(), GridError> {
        let oldest = self
            .tiles
            .iter()
            .min_by_key(|(_, tile)| tile.last_used)
            .map(|(&index, _)| index);
        if let Some(index) = oldest {
            if let Some(tile) = self.tiles.remove(&index) {
                if tile.dirty {
                    self.write_tile(index, &tile.data)?;
                }
            }
        }
        Ok(())
    }

    /// Get a tile into memory.
    fn load(&mut self, index: usize) -> Result<&mut Tile, GridError> {
        self.clock += 1;
        if !self.tiles.contains_key(&index) {
            if self.tiles.len() >= self.max_tiles {
                self.evict()?;
            }
            let data = if self.on_disk[index] {
                self.read_tile(index)?
            } else {
                vec![c32::default(); self.tile_len()]
            };
            self.tiles.insert(
                index,
                Tile {
                    data,
                    last_used: 0,
                    dirty: false,
                },
            );
        }
        let clock = self.clock;
        let len = self.tile_len();
        let tile = self.tiles.entry(index).or_insert_with(|| Tile {
            data: vec![c32::default(); len],
            last_used: 0,
            dirty: false,
        });
        tile.last_used = clock;
        Ok(tile)
    }

    /// The tiles overlapping a footprint, as `(ty, tx)` ranges.
    fn tiles_under(
        &self,
        footprint: &Footprint,
    ) -> (std::ops::RangeInclusive<usize>, std::ops::RangeInclusive<usize>) {
        let ((x0, x1), (y0, y1)) = footprint.extent();
        let t = self.tile_size;
        (y0 / t..=y1 / t, x0 / t..=x1 / t)
    }

    /// How many tiles are currently in memory?
    #[cfg(test)]
    pub(crate) fn num_cached_tiles(&self) -> usize {
        self.tiles.len()
    }
}

impl GridStorage for TiledGrid {
    fn shape(&self) -> [usize; 4] {
        self.shape
    }

    fn put(
        &mut self,
        chan: usize,
        pol: usize,
        footprint: &Footprint,
        kernel: &KernelPlane,
        value: c64,
    ) -> Result<f64, GridError> {
        self.check_plane(chan, pol)?;
        let value = narrow::<f32>(value);
        let t = self.tile_size;
        let (ty_range, tx_range) = self.tiles_under(footprint);
        let mut norm = 0.0;
        for ty in ty_range {
            for tx in tx_range.clone() {
                let index = self.tile_index(chan, pol, ty, tx);
                let tile = self.load(index)?;
                tile.dirty = true;
                let mut window = Window {
                    data: &mut tile.data,
                    dim: (t, t),
                    origin: (ty * t, tx * t),
                };
                norm += put_window(&mut window, footprint, kernel, value) as f64;
            }
        }
        Ok(norm)
    }

    fn get(
        &mut self,
        chan: usize,
        pol: usize,
        footprint: &Footprint,
        kernel: &KernelPlane,
    ) -> Result<(c64, f64), GridError> {
        self.check_plane(chan, pol)?;
        let t = self.tile_size;
        let (ty_range, tx_range) = self.tiles_under(footprint);
        let mut sum = c64::default();
        let mut norm = 0.0;
        for ty in ty_range {
            for tx in tx_range.clone() {
                let index = self.tile_index(chan, pol, ty, tx);
                let tile = self.load(index)?;
                let window = Window {
                    data: &mut tile.data,
                    dim: (t, t),
                    origin: (ty * t, tx * t),
                };
                let (s, n) = get_window(&window, footprint, kernel);
                sum += widen(s);
                norm += n as f64;
            }
        }
        Ok((sum, norm))
    }

    fn plane(&mut self, chan: usize, pol: usize) -> Result<Array2<c64>, GridError> {
        self.check_plane(chan, pol)?;
        let [_, _, ny, nx] = self.shape;
        let t = self.tile_size;
        let mut plane = Array2::zeros((ny, nx));
        for ty in 0..self.tiles_y {
            for tx in 0..self.tiles_x {
                let index = self.tile_index(chan, pol, ty, tx);
                if !self.on_disk[index] && !self.tiles.contains_key(&index) {
                    continue;
                }
                let tile = self.load(index)?;
                let (y0, x0) = (ty * t, tx * t);
                let mut region = plane.slice_mut(s![y0..(y0 + t).min(ny), x0..(x0 + t).min(nx)]);
                for ((y, x), v) in region.indexed_iter_mut() {
                    *v = widen(tile.data[y * t + x]);
                }
            }
        }
        Ok(plane)
    }

    fn set_plane(
        &mut self,
        chan: usize,
        pol: usize,
        plane: ArrayView2<c64>,
    ) -> Result<(), GridError> {
        self.check_plane(chan, pol)?;
        let [_, _, ny, nx] = self.shape;
        if plane.dim() != (ny, nx) {
            return Err(GridError::ShapeMismatch {
                expected: vec![ny, nx],
                actual: plane.shape().to_vec(),
            });
        }
        let t = self.tile_size;
        for ty in 0..self.tiles_y {
            for tx in 0..self.tiles_x {
                let index = self.tile_index(chan, pol, ty, tx);
                let tile = self.load(index)?;
                tile.dirty = true;
                let (y0, x0) = (ty * t, tx * t);
                let region = plane.slice(s![y0..(y0 + t).min(ny), x0..(x0 + t).min(nx)]);
                for ((y, x), &v) in region.indexed_iter() {
                    tile.data[y * t + x] = narrow(v);
                }
            }
        }
        Ok(())
    }

    fn into_single(self: Box<Self>) -> Result<Box<dyn GridStorage>, GridError> {
        Ok(self)
    }

    fn is_tiled(&self) -> bool {
        true
    }
}
