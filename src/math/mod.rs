// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Some helper mathematics.


use marlu::c64;

use crate::constants::PI;

// Rational approximation coefficients of the prolate spheroidal wave function
// (alpha = 1, m = 6) from Schwab's "Optimal gridding of visibility data in
// radio interferometry". The first set covers |nu| < 0.75, the second the
// rest of [0, 1].
const SPHEROIDAL_P: [[f64; 5]; 2] = [
    [8.203343e-2, -3.644705e-1, 6.278660e-1, -5.335581e-1, 2.312756e-1],
    [4.028559e-3, -3.697768e-2, 1.021332e-1, -1.201436e-1, 6.412774e-2],
];
const SPHEROIDAL_Q: [[f64; 3]; 2] = [[1.0, 8.212018e-1, 2.078043e-1], [1.0, 9.599102e-1, 2.918724e-1]];

/// The prolate spheroidal taper evaluated at `nu`, a coordinate normalised so
/// that the taper is 1 at the centre and 0 at `|nu| = 1`. Beyond that, the
/// taper is 0.
pub(crate) fn spheroidal(nu: f64) -> f64 {
    let nu = nu.abs();
    let (part, nu_end) = if nu < 0.75 {
        (0, 0.75)
    } else if nu <= 1.0 {
        (1, 1.0)
    } else {
        return 0.0;
    };

    let del_nu_sq = nu * nu - nu_end * nu_end;
    let p = &SPHEROIDAL_P[part];
    let q = &SPHEROIDAL_Q[part];
    let top = p
        .iter()
        .rev()
        .fold(0.0, |acc, &coeff| acc * del_nu_sq + coeff);
    let bot = q
        .iter()
        .rev()
        .fold(0.0, |acc, &coeff| acc * del_nu_sq + coeff);
    if bot == 0.0 {
        0.0
    } else {
        (1.0 - nu * nu) * top / bot
    }
}

/// The spheroidal taper for pixel `i` of an axis with `n` pixels, with the
/// taper centred on pixel `n / 2`.
pub(crate) fn spheroidal_pixel(i: usize, n: usize) -> f64 {
    let half = (n / 2) as f64;
    spheroidal((i as f64 - half) / half)
}

/// The image-plane response of linearly stepping through an oversampled
/// kernel, for pixel `i` of an axis with `n` pixels.
pub(crate) fn sinc_correction(i: usize, n: usize, sampling: usize) -> f64 {
    let x = PI * (i as f64 - (n / 2) as f64) / (n as f64 * sampling as f64);
    if x == 0.0 {
        1.0
    } else {
        x.sin() / x
    }
}

/// Round to the nearest integer, with halves rounded away from zero.
#[inline]
pub(crate) fn nint(x: f64) -> isize {
    x.round() as isize
}

/// Complex exponential. The argument is assumed to be purely imaginary.
#[inline]
pub(crate) fn cexp(x: f64) -> c64 {
    let (im, re) = x.sin_cos();
    c64::new(re, im)
}

/// Is the supplied number only made of the prime factors 2, 3 and 5? FFTs of
/// such sizes are fast.
fn is_smooth(mut n: usize) -> bool {
    if n == 0 {
        return false;
    }
    for p in [2, 3, 5] {
        while n % p == 0 {
            n /= p;
        }
    }
    n == 1
}

/// Get the smallest even number at least as large as `x` that only has the
/// prime factors 2, 3 and 5.
pub(crate) fn next_composite_even(x: f64) -> usize {
    let mut n = x.ceil().max(2.0) as usize;
    if n % 2 == 1 {
        n += 1;
    }
    while !is_smooth(n) {
        n += 2;
    }
    n
}
