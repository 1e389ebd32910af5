// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility gridding, degridding and major-cycle imaging for radio
//! interferometers.
//!
//! The interesting parts are in [`gridding`] (convolution functions, grids and
//! the gridder/degridder), [`imager`] (mappers and the major-cycle driver) and
//! [`vis`] (the visibility-source contract).

pub mod constants;
pub(crate) mod fft;
pub mod gridding;
pub mod image;
pub mod imager;
pub(crate) mod math;
pub mod vis;

mod cli;
mod params;

use crossbeam_utils::atomic::AtomicCell;
use lazy_static::lazy_static;

lazy_static! {
    /// Are progress bars being drawn? This should only ever be enabled by CLI
    /// code.
    static ref PROGRESS_BARS: AtomicCell<bool> = AtomicCell::new(false);
}

// Re-exports.
pub use cli::{HyperimageError, Hyperimage};
pub use gridding::{
    ConvFuncCache, ConvolutionFunction, DataColumn, FtMachine, FtOptions, GridError,
    GridKernelKind, ImageNormaliser, TangentKey,
};
pub use image::{ImageGeometry, ImageStore, SpectralAxis, Stokes};
pub use imager::{Deconvolver, Imager, ImagerError, ImagingOptions};
pub use vis::{DataMode, MemoryVisSource, VisError, VisSelection, VisSource, VisibilityBuffer};

// External re-exports.
pub use marlu::{c32, c64, RADec, UVW};
