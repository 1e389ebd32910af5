// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All constants *must* be double precision. `hyperimage` should do as many
calculations as possible in double precision before converting to a lower
precision, if it is ever required.
 */

pub use marlu::constants::VEL_C;
pub use std::f64::consts::{PI, TAU};

/// The oversampling factor of convolution functions, i.e. how many kernel
/// pixels there are per grid pixel.
pub const CONV_SAMPLING: usize = 4;

/// The largest kernel screen that will be Fourier transformed when building a
/// convolution function.
pub const MAX_CONV_SIZE: usize = 1024;

/// The largest kernel screen when many w-planes are requested and low-memory
/// kernels are enabled.
pub const MAX_CONV_SIZE_LOW_MEMORY: usize = 512;

/// Kernel pixels with magnitudes below this fraction of the peak don't count
/// towards the support.
pub const SUPPORT_THRESHOLD: f64 = 1e-3;

/// If more than this many w-planes have their support clamped, a warning is
/// emitted.
pub const TRUNCATION_WARNING_LIMIT: usize = 5;

/// The largest tile edge for disk-tiled grids \[pixels\].
pub const MAX_TILE_SIZE: usize = 256;

/// The default grid padding factor.
pub const DEFAULT_PADDING: f64 = 1.2;

/// The default budget for an in-memory grid \[number of complex elements\].
/// Grids larger than this are tiled on disk.
pub const DEFAULT_CACHE_SIZE: usize = 1 << 28;

/// The default edge length of grid tiles \[pixels\].
pub const DEFAULT_TILE_SIZE: usize = 64;

/// The default dish diameter used by primary-beam aware kernels \[metres\].
pub const DEFAULT_DISH_DIAMETER_M: f64 = 12.0;

/// Relates the full width at half maximum of a primary beam to lambda / D.
pub const FWHM_LAMBDA_ON_D: f64 = 1.13;

/// Converts a full width at half maximum into a Gaussian standard deviation.
pub const FWHM_FACTOR: f64 = 2.35482004503;
