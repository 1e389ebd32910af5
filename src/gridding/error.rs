// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with gridding and degridding.

use thiserror::Error;

use crate::image::ImageError;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Invalid FTMachine name '{0}'; use one of gridft, wprojectft, mosaicft or awprojectft")]
    InvalidFtMachine(String),

    #[error("The number of w-projection planes must be at least 1")]
    NoWPlanes,

    #[error("The grid padding factor must be at least 1; got {0}")]
    BadPadding(f64),

    #[error("The tile size must be between 1 and {max}; got {got}")]
    BadTileSize { got: usize, max: usize },

    #[error("The convolution function is degenerate: {0}")]
    DegenerateKernel(String),

    #[error("{planes} w-planes of the convolution function had their support truncated; use more padding or fewer w-planes")]
    TruncatedKernel { planes: usize },

    #[error("A grid is already open on this FT machine; it must be finalised first")]
    GridAlreadyOpen,

    #[error("No grid is open on this FT machine")]
    GridNotOpen,

    #[error("The FT machine's grid is open for {expected}, not for {actual}")]
    WrongDirection {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Row {row} is out of range for a buffer with {num_rows} rows")]
    BadRow { row: usize, num_rows: usize },

    #[error("Expected an image with shape {expected:?}, but got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("The buffer has no corrected visibilities")]
    NoCorrectedData,

    #[error("The convolution function cache lock was poisoned")]
    CachePoisoned,

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("Error with a grid tile file: {0}")]
    IO(#[from] std::io::Error),
}
