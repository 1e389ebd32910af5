// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The innermost gridding and degridding loops.
//!
//! Nothing here allocates. Grids are handled as row-major windows so that the
//! same code serves whole in-memory grid planes and the tiles of disk-tiled
//! grids.

use marlu::c32;
use num_complex::Complex;

use super::GridFloat;
use crate::math::nint;

/// How kernel samples are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Orientation {
    /// Conjugate kernel samples?
    pub(crate) conj: bool,

    /// Read the kernel at negated offsets?
    pub(crate) flip: bool,
}

impl Orientation {
    /// The orientation for gridding a sample with this w. Kernels are stored
    /// for non-negative w; negative w uses the conjugated, mirrored kernel.
    pub(crate) fn put(w: f64) -> Orientation {
        if w >= 0.0 {
            Orientation {
                conj: false,
                flip: false,
            }
        } else {
            Orientation {
                conj: true,
                flip: true,
            }
        }
    }

    /// The orientation for degridding a sample with this w; the adjoint of
    /// [`Orientation::put`].
    pub(crate) fn get(w: f64) -> Orientation {
        if w >= 0.0 {
            Orientation {
                conj: true,
                flip: false,
            }
        } else {
            Orientation {
                conj: false,
                flip: true,
            }
        }
    }
}

/// A borrowed w-plane of a convolution function. The plane is square, has an
/// odd edge length and is centred on its middle sample.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KernelPlane<'a> {
    pub(crate) data: &'a [c32],
    pub(crate) size: usize,
    pub(crate) sampling: usize,
}

impl KernelPlane<'_> {
    #[inline]
    fn at(&self, ky: isize, kx: isize, orientation: Orientation) -> c32 {
        let half = (self.size / 2) as isize;
        let (ky, kx) = if orientation.flip {
            (-ky, -kx)
        } else {
            (ky, kx)
        };
        let v = self.data[(half + ky) as usize * self.size + (half + kx) as usize];
        if orientation.conj {
            v.conj()
        } else {
            v
        }
    }
}

/// Where a sample lands on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footprint {
    /// The grid pixel nearest to the sample, `(x, y)`.
    pub(crate) loc: (isize, isize),

    /// The kernel offset of the sample from `loc`, in oversampled kernel
    /// pixels, `(x, y)`.
    pub(crate) off: (isize, isize),

    /// The half-width of the footprint \[grid pixels\].
    pub(crate) support: usize,

    pub(crate) orientation: Orientation,
}

impl Footprint {
    /// Locate a sample at (fractional) grid position `pos` = `(x, y)` on a grid
    /// with `dim` = `(ny, nx)` pixels. `None` is returned when any part of
    /// the footprint would fall off the grid.
    pub(crate) fn locate(
        pos: (f64, f64),
        support: usize,
        sampling: usize,
        dim: (usize, usize),
        orientation: Orientation,
    ) -> Option<Footprint> {
        let loc = (nint(pos.0), nint(pos.1));
        let s = support as isize;
        let (ny, nx) = (dim.0 as isize, dim.1 as isize);
        if loc.0 - s < 0 || loc.1 - s < 0 || loc.0 + s >= nx || loc.1 + s >= ny {
            return None;
        }
        let sampling = sampling as f64;
        let off = (
            nint((loc.0 as f64 - pos.0) * sampling),
            nint((loc.1 as f64 - pos.1) * sampling),
        );
        Some(Footprint {
            loc,
            off,
            support,
            orientation,
        })
    }

    /// The grid pixels covered by the footprint, as inclusive `(first, last)`
    /// pairs for `(x, y)`.
    pub(crate) fn extent(&self) -> ((usize, usize), (usize, usize)) {
        let s = self.support as isize;
        (
            ((self.loc.0 - s) as usize, (self.loc.0 + s) as usize),
            ((self.loc.1 - s) as usize, (self.loc.1 + s) as usize),
        )
    }

    /// The footprint offsets (inclusive) that land inside `[start, start +
    /// len)` on an axis where the footprint is centred at `loc`.
    #[inline]
    fn clip(&self, loc: isize, start: usize, len: usize) -> (isize, isize) {
        let s = self.support as isize;
        let start = start as isize;
        (
            (-s).max(start - loc),
            s.min(start + len as isize - 1 - loc),
        )
    }
}

/// A row-major window of a grid plane. The first pixel of the window is grid
/// pixel `origin` = `(y0, x0)`, and the window is `dim` = `(rows, cols)`
/// pixels.
pub(crate) struct Window<'a, T> {
    pub(crate) data: &'a mut [T],
    pub(crate) dim: (usize, usize),
    pub(crate) origin: (usize, usize),
}

/// Add `value` times the kernel into the part of the footprint falling in
/// the window. Returns the sum of the real parts of the kernel samples used,
/// so summing the returns over windows that tile the grid gives the full
/// kernel norm.
pub(crate) fn put_window<F: GridFloat>(
    window: &mut Window<Complex<F>>,
    footprint: &Footprint,
    kernel: &KernelPlane,
    value: Complex<F>,
) -> F {
    let sampling = kernel.sampling as isize;
    let (ys, ye) = footprint.clip(footprint.loc.1, window.origin.0, window.dim.0);
    let (xs, xe) = footprint.clip(footprint.loc.0, window.origin.1, window.dim.1);
    let mut norm = F::zero();
    for iy in ys..=ye {
        let ky = iy * sampling + footprint.off.1;
        let row = ((footprint.loc.1 + iy) as usize - window.origin.0) * window.dim.1;
        for ix in xs..=xe {
            let kx = ix * sampling + footprint.off.0;
            let cwt = kernel.at(ky, kx, footprint.orientation);
            let cwt = Complex::new(F::from_f32(cwt.re), F::from_f32(cwt.im));
            let g = &mut window.data[row + (footprint.loc.0 + ix) as usize - window.origin.1];
            *g = *g + value * cwt;
            norm = norm + cwt.re;
        }
    }
    norm
}

/// Sum the kernel-weighted grid over the part of the footprint falling in the
/// window. Returns the sum and the sum of the real parts of the kernel
/// samples used.
pub(crate) fn get_window<F: GridFloat>(
    window: &Window<Complex<F>>,
    footprint: &Footprint,
    kernel: &KernelPlane,
) -> (Complex<F>, F) {
    let sampling = kernel.sampling as isize;
    let (ys, ye) = footprint.clip(footprint.loc.1, window.origin.0, window.dim.0);
    let (xs, xe) = footprint.clip(footprint.loc.0, window.origin.1, window.dim.1);
    let mut sum = Complex::new(F::zero(), F::zero());
    let mut norm = F::zero();
    for iy in ys..=ye {
        let ky = iy * sampling + footprint.off.1;
        let row = ((footprint.loc.1 + iy) as usize - window.origin.0) * window.dim.1;
        for ix in xs..=xe {
            let kx = ix * sampling + footprint.off.0;
            let cwt = kernel.at(ky, kx, footprint.orientation);
            let cwt = Complex::new(F::from_f32(cwt.re), F::from_f32(cwt.im));
            let g = window.data[row + (footprint.loc.0 + ix) as usize - window.origin.1];
            sum = sum + cwt * g;
            norm = norm + cwt.re;
        }
    }
    (sum, norm)
}
