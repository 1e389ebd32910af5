// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Visibility buffers and the contract that visibility sources fulfil.
//!
//! Reading visibilities from disk is not the business of this crate; anything
//! that can hand out [`VisibilityBuffer`]s in chunks can be imaged by
//! implementing [`VisSource`]. [`MemoryVisSource`] is the implementation used
//! by the simulator and by tests.

mod error;
mod memory;
mod selection;
pub mod simulate;
#[cfg(test)]
mod tests;

pub use error::VisError;
pub use memory::MemoryVisSource;
pub use selection::VisSelection;

use hifitime::Epoch;
use marlu::{c32, RADec, UVW};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// A correlation product of linearly-polarised feeds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
pub enum Correlation {
    XX,
    XY,
    YX,
    YY,
}

/// How a visibility source may be written to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DataMode {
    /// Nothing is ever written back.
    ReadOnly,

    /// Predicted visibilities may be written into a model column.
    ScratchModelColumn,

    /// Instead of predicted visibilities, a description of the model is saved
    /// so that it can be predicted on the fly later.
    VirtualModel,
}

/// A description of a sky model that a visibility source can store instead of
/// model visibilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualModelRecord {
    /// The name of the kernel family that predicts from the model.
    pub kernel: String,

    /// The name of the model image.
    pub image: String,

    /// The image centre \[degrees\].
    pub ra_deg: f64,
    pub dec_deg: f64,

    pub nx: usize,
    pub ny: usize,

    /// The image cell size \[arcseconds\].
    pub cell_arcsec: f64,

    /// The image's channel frequencies \[Hz\].
    pub freqs_hz: Vec<f64>,

    /// The image's Stokes planes, e.g. "IV".
    pub stokes: String,
}

/// A batch of visibilities sharing a spectral window. Cubes are indexed by
/// `(row, channel, correlation)`.
#[derive(Debug, Clone)]
pub struct VisibilityBuffer {
    /// The spectral window these visibilities belong to.
    pub spw: usize,

    /// The field (pointing) these visibilities belong to.
    pub field: usize,

    /// The phase centre of the visibilities. For mosaics, this is also the
    /// pointing centre.
    pub phase_centre: RADec,

    /// The timestamp of each row.
    pub timestamps: Vec<Epoch>,

    /// The UVW of each row \[metres\].
    pub uvws: Vec<UVW>,

    /// The first antenna of each row.
    pub ant1: Vec<usize>,

    /// The second antenna of each row.
    pub ant2: Vec<usize>,

    /// Whole-row flags.
    pub flag_row: Vec<bool>,

    /// The frequency of each channel \[Hz\].
    pub freqs_hz: Vec<f64>,

    /// The correlations held on the last axis of the cubes.
    pub correlations: Vec<Correlation>,

    /// Per-sample flags.
    pub flags: Array3<bool>,

    /// Imaging weights, indexed by `(row, channel)`.
    pub weights: Array2<f32>,

    /// The observed visibilities.
    pub data: Array3<c32>,

    /// Calibrated visibilities, if the source has them.
    pub corrected: Option<Array3<c32>>,

    /// Model visibilities. These are overwritten by degridding.
    pub model: Array3<c32>,
}

impl VisibilityBuffer {
    /// Make a buffer with unit weights, no flags and zeroed visibilities.
    pub fn new(
        phase_centre: RADec,
        timestamps: Vec<Epoch>,
        uvws: Vec<UVW>,
        antenna_pairs: &[(usize, usize)],
        freqs_hz: Vec<f64>,
        correlations: Vec<Correlation>,
    ) -> VisibilityBuffer {
        let num_rows = uvws.len();
        let shape = (num_rows, freqs_hz.len(), correlations.len());
        VisibilityBuffer {
            spw: 0,
            field: 0,
            phase_centre,
            timestamps,
            uvws,
            ant1: antenna_pairs.iter().map(|&(a, _)| a).collect(),
            ant2: antenna_pairs.iter().map(|&(_, b)| b).collect(),
            flag_row: vec![false; num_rows],
            freqs_hz,
            correlations,
            flags: Array3::from_elem(shape, false),
            weights: Array2::ones((shape.0, shape.1)),
            data: Array3::zeros(shape),
            corrected: None,
            model: Array3::zeros(shape),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.uvws.len()
    }

    pub fn num_chans(&self) -> usize {
        self.freqs_hz.len()
    }

    pub fn num_correlations(&self) -> usize {
        self.correlations.len()
    }

    /// Is this row an autocorrelation?
    pub fn is_auto(&self, row: usize) -> bool {
        self.ant1[row] == self.ant2[row]
    }

    /// Where is this correlation on the last axis of the cubes?
    pub fn correlation_index(&self, corr: Correlation) -> Option<usize> {
        self.correlations.iter().position(|&c| c == corr)
    }

    /// Check that all of the per-row and per-sample members agree on their
    /// shapes.
    pub fn validate(&self) -> Result<(), VisError> {
        let num_rows = self.num_rows();
        let shape = [num_rows, self.num_chans(), self.num_correlations()];
        let check = |name: &str, len: usize| {
            if len == num_rows {
                Ok(())
            } else {
                Err(VisError::BadShape(format!(
                    "{name} has {len} rows, but there are {num_rows} UVWs"
                )))
            }
        };
        check("timestamps", self.timestamps.len())?;
        check("ant1", self.ant1.len())?;
        check("ant2", self.ant2.len())?;
        check("flag_row", self.flag_row.len())?;

        let check_cube = |name: &str, cube_shape: &[usize]| {
            if cube_shape == shape {
                Ok(())
            } else {
                Err(VisError::BadShape(format!(
                    "{name} has shape {cube_shape:?}, expected {shape:?}"
                )))
            }
        };
        check_cube("flags", self.flags.shape())?;
        check_cube("data", self.data.shape())?;
        check_cube("model", self.model.shape())?;
        if let Some(corrected) = self.corrected.as_ref() {
            check_cube("corrected", corrected.shape())?;
        }
        if self.weights.shape() != &shape[..2] {
            return Err(VisError::BadShape(format!(
                "weights has shape {:?}, expected {:?}",
                self.weights.shape(),
                &shape[..2]
            )));
        }
        Ok(())
    }
}

/// The primitives needed to iterate over visibilities in chunks of buffers.
///
/// Iteration follows the pattern
///
/// ```text
/// origin_chunks(); while more_chunks() {
///     origin(); while more() { buffer(); next_buffer(); }
///     next_chunk();
/// }
/// ```
pub trait VisSource: Send {
    /// How this source may be written to.
    fn mode(&self) -> DataMode;

    /// Apply a data selection, returning the number of selected rows. A
    /// selection matching no rows is an error.
    fn select(&mut self, selection: &VisSelection) -> Result<usize, VisError>;

    /// The number of rows in the current selection.
    fn num_selected_rows(&self) -> usize;

    /// Does this source carry calibrated visibilities?
    fn has_corrected(&self) -> bool;

    /// Take a lock on the underlying data. Locks nest.
    fn lock(&mut self) -> Result<(), VisError>;

    /// Release one level of locking.
    fn unlock(&mut self);

    fn is_locked(&self) -> bool;

    fn origin_chunks(&mut self);
    fn more_chunks(&self) -> bool;
    fn next_chunk(&mut self);

    fn origin(&mut self);
    fn more(&self) -> bool;
    fn next_buffer(&mut self);

    /// The current buffer, if the iterator isn't exhausted.
    fn buffer(&self) -> Option<&VisibilityBuffer>;
    fn buffer_mut(&mut self) -> Option<&mut VisibilityBuffer>;

    /// Write the current buffer's model visibilities into the model column.
    fn write_model_column(&mut self) -> Result<(), VisError>;

    /// Store a virtual model for a field. The source must be locked.
    fn save_virtual_model(
        &mut self,
        field: usize,
        record: &VirtualModelRecord,
    ) -> Result<(), VisError>;
}
