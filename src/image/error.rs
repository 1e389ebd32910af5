// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with images.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Image dimensions must be positive and even; got {nx}x{ny}")]
    BadDimensions { nx: usize, ny: usize },

    #[error("The image cell size must be positive; got {0} radians")]
    BadCellSize(f64),

    #[error("'{0}' is not a recognised Stokes selection; use e.g. I, IV, QU or IQUV")]
    InvalidStokes(String),

    #[error("An image must have at least one channel")]
    NoChannels,

    #[error("Cannot split an image with {total} {thing} into {parts} parts")]
    BadSplit {
        thing: &'static str,
        total: usize,
        parts: usize,
    },

    #[error("Array shape {actual:?} doesn't match the image shape {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: Vec<usize>,
    },

    #[error("FITS file {file} has unexpected dimensions {actual:?}; expected {expected:?}")]
    FitsDimensions {
        file: PathBuf,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("cfitsio error: {0}")]
    Fitsio(#[from] fitsio::errors::Error),

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
