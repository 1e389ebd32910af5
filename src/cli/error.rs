// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all hyperimage-related errors. This should be the *only*
//! error enum that is publicly visible.

use thiserror::Error;

use super::image::ImageArgsError;
use crate::{
    gridding::GridError, image::ImageError, imager::ImagerError, params::ImageParamsError,
    vis::VisError,
};

const URL: &str = "https://MWATelescope.github.io/mwa_hyperimage";

/// The *only* publicly visible error from hyperimage. Each error message should
/// include the URL, unless it's "generic".
#[derive(Error, Debug)]
pub enum HyperimageError {
    /// An error related to the image subcommand's arguments.
    #[error("{0}\n\nSee for more info: {URL}/user/image.html")]
    ImageArgs(String),

    /// An error with FT machine or gridding options.
    #[error("{0}\n\nSee for more info: {URL}/defs/ft_machines.html")]
    FtMachine(String),

    /// An error with how images are defined (facets, channel chunks, Stokes).
    #[error("{0}\n\nSee for more info: {URL}/defs/images.html")]
    ImageDefinition(String),

    /// An error related to selecting or reading visibilities.
    #[error("{0}\n\nSee for more info: {URL}/defs/vis_selection.html")]
    VisSelection(String),

    /// An error related to argument files.
    #[error("{0}\n\nSee for more info: {URL}/defs/arg_file.html")]
    ArgFile(String),

    /// A cfitsio error. Because these are usually quite spartan, some
    /// suggestions are provided here.
    #[error("cfitsio error: {0}\n\nIf you don't know what this means, try turning up verbosity (-v or -vv) and maybe disabling progress bars.")]
    Cfitsio(String),

    /// A generic error that can't be clarified further with documentation, e.g.
    /// IO errors.
    #[error("{0}")]
    Generic(String),
}

// When changing the error propagation below, ensure `Self::from(e)` uses the
// correct `e`!

impl From<ImageArgsError> for HyperimageError {
    fn from(e: ImageArgsError) -> Self {
        match e {
            ImageArgsError::Image(e) => Self::from(e),
            ImageArgsError::Imager(e) => Self::from(e),
            _ => Self::ImageArgs(e.to_string()),
        }
    }
}

impl From<ImageParamsError> for HyperimageError {
    fn from(e: ImageParamsError) -> Self {
        match e {
            ImageParamsError::Imager(e) => Self::from(e),
            ImageParamsError::Image(e) => Self::from(e),
            ImageParamsError::Vis(e) => Self::from(e),
        }
    }
}

impl From<ImagerError> for HyperimageError {
    fn from(e: ImagerError) -> Self {
        let s = e.to_string();
        match e {
            ImagerError::Grid(e) => Self::from(e),
            ImagerError::Image(e) => Self::from(e),
            ImagerError::Vis(e) => Self::from(e),
            ImagerError::Mapper { .. } => Self::FtMachine(s),
            ImagerError::ConfigFacetNotFirst
            | ImagerError::ConfigTooManyChunks { .. }
            | ImagerError::ConfigChunksWithMultipleFields
            | ImagerError::ConfigFacetsAndChunks
            | ImagerError::ConfigZero(_)
            | ImagerError::ConfigCycleOrder => Self::ImageDefinition(s),
            ImagerError::ConfigDataColumn(_) | ImagerError::ConfigDataMode { .. } => {
                Self::VisSelection(s)
            }
            ImagerError::InvalidState { .. } | ImagerError::NoImages => Self::Generic(s),
        }
    }
}

impl From<GridError> for HyperimageError {
    fn from(e: GridError) -> Self {
        let s = e.to_string();
        match e {
            GridError::Image(e) => Self::from(e),
            GridError::NoCorrectedData => Self::VisSelection(s),
            GridError::IO(_) | GridError::CachePoisoned => Self::Generic(s),
            _ => Self::FtMachine(s),
        }
    }
}

impl From<ImageError> for HyperimageError {
    fn from(e: ImageError) -> Self {
        let s = e.to_string();
        match e {
            ImageError::Fitsio(_) => Self::Cfitsio(s),
            ImageError::IO(_) => Self::Generic(s),
            _ => Self::ImageDefinition(s),
        }
    }
}

impl From<VisError> for HyperimageError {
    fn from(e: VisError) -> Self {
        Self::VisSelection(e.to_string())
    }
}

impl From<std::io::Error> for HyperimageError {
    fn from(e: std::io::Error) -> Self {
        Self::Generic(e.to_string())
    }
}
