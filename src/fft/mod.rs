// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Centred 2-D FFTs.
//!
//! Both grids and images keep their origin at pixel `(n / 2, n / 2)`, so every
//! transform here is wrapped in quadrant swaps. All axes must have an even
//! length.


use ndarray::prelude::*;
use rayon::prelude::*;
use rustfft::{FftDirection, FftPlanner};

use marlu::c64;

/// Swap the quadrants of an array so that pixel `(n / 2, n / 2)` moves to
/// `(0, 0)` and vice versa. For even axis lengths this is its own inverse.
pub(crate) fn swap_quadrants(mut a: ArrayViewMut2<c64>) {
    let (ny, nx) = a.dim();
    debug_assert!(nx % 2 == 0 && ny % 2 == 0);
    let (hy, hx) = (ny / 2, nx / 2);
    for y in 0..hy {
        for x in 0..nx {
            let x2 = (x + hx) % nx;
            a.swap((y, x), (y + hy, x2));
        }
    }
}

/// Transform every row of `a` in place.
fn fft_rows(mut a: ArrayViewMut2<c64>, direction: FftDirection) {
    let nx = a.len_of(Axis(1));
    let fft = FftPlanner::<f64>::new().plan_fft(nx, direction);
    a.axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(|mut row| match row.as_slice_mut() {
            Some(s) => fft.process(s),
            None => {
                let mut buf = row.to_vec();
                fft.process(&mut buf);
                row.assign(&ArrayView1::from(&buf));
            }
        });
}

/// Do a 2-D FFT of `a` about its centre pixel. The forward transform uses
/// `exp(-i...)`; the backward transform uses `exp(+i...)` and, when
/// `normalise` is set, divides by the number of pixels.
pub(crate) fn fft2_centred(a: &mut Array2<c64>, direction: FftDirection, normalise: bool) {
    swap_quadrants(a.view_mut());

    fft_rows(a.view_mut(), direction);
    // Transpose into standard layout so the columns are contiguous.
    let mut t = a.t().as_standard_layout().into_owned();
    fft_rows(t.view_mut(), direction);
    a.assign(&t.t());

    swap_quadrants(a.view_mut());

    if normalise {
        let n = a.len() as f64;
        a.par_mapv_inplace(|v| v / n);
    }
}
