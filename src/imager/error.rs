// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors associated with defining images and running major cycles.

use thiserror::Error;

use crate::{
    gridding::GridError,
    image::ImageError,
    vis::{DataMode, VisError},
};

#[derive(Error, Debug)]
pub enum ImagerError {
    #[error("Cannot {action} while the imager is {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    #[error("No images have been defined")]
    NoImages,

    #[error("Facetted image has to be the first of multifields")]
    ConfigFacetNotFirst,

    #[error("Cannot split {nchan} channels into {chanchunks} chunks")]
    ConfigTooManyChunks { chanchunks: usize, nchan: usize },

    #[error("Channel chunking is not allowed with multiple fields")]
    ConfigChunksWithMultipleFields,

    #[error("Facets and channel chunks cannot be used together")]
    ConfigFacetsAndChunks,

    #[error("The number of {0} must be at least 1")]
    ConfigZero(&'static str),

    #[error("Cannot image the '{0}' data column; use 'observed' or 'corrected'")]
    ConfigDataColumn(String),

    #[error("The visibility source was opened {opened}, but {requested} was requested")]
    ConfigDataMode {
        opened: DataMode,
        requested: DataMode,
    },

    #[error("Ordering the major cycle by mapper needs a single image, or the channel chunks of one image")]
    ConfigCycleOrder,

    #[error("Mapper {mapper} (tangent {ra_deg:.4}°, {dec_deg:.4}°; {wprojplanes} w-planes): {source}")]
    Mapper {
        mapper: usize,
        ra_deg: f64,
        dec_deg: f64,
        wprojplanes: usize,
        #[source]
        source: GridError,
    },

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Vis(#[from] VisError),
}
