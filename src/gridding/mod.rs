// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Gridding and degridding of visibilities.
//!
//! An [`FtMachine`] grids visibilities onto a UV grid with convolution
//! functions obtained from a shared [`ConvFuncCache`] and turns the grid into
//! an image with an [`ImageNormaliser`]. Running the other way, it
//! Fourier-transforms a model image onto a grid and degrids it to predict
//! visibilities.

mod cache;
mod error;
mod ft_machine;
pub(crate) mod inner;
mod kernel;
mod normalise;
mod storage;

pub use cache::{ConvFuncCache, TangentKey};
pub use error::GridError;
pub use ft_machine::FtMachine;
pub use kernel::ConvolutionFunction;
pub(crate) use kernel::KernelRequest;
pub use normalise::ImageNormaliser;
pub(crate) use storage::{ArrayGrid, GridFloat, GridStorage, TiledGrid};

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::constants::{
    DEFAULT_CACHE_SIZE, DEFAULT_PADDING, DEFAULT_TILE_SIZE, FWHM_FACTOR, FWHM_LAMBDA_ON_D,
    MAX_TILE_SIZE, VEL_C,
};

/// A circularly-symmetric Gaussian primary beam of a dish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryBeam {
    pub dish_diameter_m: f64,
}

impl PrimaryBeam {
    /// The beam's power response `offset_rad` away from the pointing centre.
    pub fn power(&self, offset_rad: f64, freq_hz: f64) -> f64 {
        let fwhm = FWHM_LAMBDA_ON_D * VEL_C / freq_hz / self.dish_diameter_m;
        let sigma = fwhm / FWHM_FACTOR;
        (-offset_rad * offset_rad / (2.0 * sigma * sigma)).exp()
    }
}

/// Parameters of A-W projection kernels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AwParams {
    pub beam: PrimaryBeam,

    /// Put the primary beam into the kernels? Without it, these kernels are
    /// the same as w-projection kernels.
    pub aterm: bool,
}

/// The families of convolution functions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GridKernelKind {
    /// A prolate spheroidal kernel without w-term correction.
    Plain,

    /// Spheroidal kernels with w-term phase screens.
    WProjection,

    /// Spheroidal kernels multiplied by the primary beam of each pointing.
    Mosaic(PrimaryBeam),

    /// W-projection kernels that can also carry the primary beam.
    AwProjection(AwParams),
}

impl GridKernelKind {
    /// Get a kernel kind from the name of an FT machine.
    pub fn from_name(
        name: &str,
        dish_diameter_m: f64,
        aterm: bool,
    ) -> Result<GridKernelKind, GridError> {
        let beam = PrimaryBeam { dish_diameter_m };
        match name.trim().to_lowercase().as_str() {
            "gridft" => Ok(GridKernelKind::Plain),
            "wprojectft" | "wproject" => Ok(GridKernelKind::WProjection),
            "mosaic" | "mosft" | "mosaicft" => Ok(GridKernelKind::Mosaic(beam)),
            "awprojectft" | "mawprojectft" | "protoft" => {
                Ok(GridKernelKind::AwProjection(AwParams { beam, aterm }))
            }
            _ => Err(GridError::InvalidFtMachine(name.to_string())),
        }
    }

    /// The canonical FT machine name of this kind.
    pub fn name(&self) -> &'static str {
        match self {
            GridKernelKind::Plain => "gridft",
            GridKernelKind::WProjection => "wprojectft",
            GridKernelKind::Mosaic(_) => "mosaicft",
            GridKernelKind::AwProjection(_) => "awprojectft",
        }
    }

    /// Does this kind correct for the w-term?
    pub fn uses_w_planes(&self) -> bool {
        matches!(
            self,
            GridKernelKind::WProjection | GridKernelKind::AwProjection(_)
        )
    }

    /// The primary beam folded into the kernels, if any.
    pub fn primary_beam(&self) -> Option<&PrimaryBeam> {
        match self {
            GridKernelKind::Mosaic(beam) => Some(beam),
            GridKernelKind::AwProjection(AwParams { beam, aterm: true }) => Some(beam),
            _ => None,
        }
    }

    pub(crate) fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
        if let Some(beam) = self.primary_beam() {
            beam.dish_diameter_m.to_bits().hash(state);
        }
    }
}

/// Which visibilities get gridded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataColumn {
    /// The observed visibilities.
    Observed,

    /// Calibrated visibilities.
    Corrected,

    /// Model visibilities.
    Model,

    /// Observed minus model visibilities.
    Residual,

    /// Calibrated minus model visibilities.
    #[strum(serialize = "corrected-residual")]
    #[serde(rename = "corrected-residual")]
    CorrectedResidual,

    /// The imaging weights only; this makes a PSF.
    Psf,
}

/// Options of an [`FtMachine`].
#[derive(Debug, Clone, PartialEq)]
pub struct FtOptions {
    /// The number of w-planes of the convolution functions.
    pub wprojplanes: usize,

    /// The factor by which the grid is larger than the image.
    pub padding: f64,

    /// Accumulate the grid in double precision? This is only honoured by
    /// in-memory grids.
    pub use_double_precision: bool,

    /// Grids with more complex elements than this are tiled on disk.
    pub cache_size: usize,

    /// The edge length of tiles of disk-tiled grids \[pixels\].
    pub tile_size: usize,

    /// Grid autocorrelations (zero spacings)?
    pub use_zero: bool,

    /// Fail instead of clamping the support of kernels that don't fit their
    /// array.
    pub strict_support: bool,

    /// Use smaller kernel screens when many w-planes are requested.
    pub low_memory_kernels: bool,
}

impl Default for FtOptions {
    fn default() -> Self {
        FtOptions {
            wprojplanes: 1,
            padding: DEFAULT_PADDING,
            use_double_precision: false,
            cache_size: DEFAULT_CACHE_SIZE,
            tile_size: DEFAULT_TILE_SIZE,
            use_zero: false,
            strict_support: false,
            low_memory_kernels: false,
        }
    }
}

impl FtOptions {
    pub fn validate(&self) -> Result<(), GridError> {
        if self.wprojplanes == 0 {
            return Err(GridError::NoWPlanes);
        }
        if !(self.padding >= 1.0) {
            return Err(GridError::BadPadding(self.padding));
        }
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(GridError::BadTileSize {
                got: self.tile_size,
                max: MAX_TILE_SIZE,
            });
        }
        Ok(())
    }
}
