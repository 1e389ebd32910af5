// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Image coordinate systems and the stores that hold images across major
//! cycles.
//!
//! Image arrays are indexed `(channel, polarisation, y, x)`. Pixel `(nx / 2,
//! ny / 2)` is the image centre, and x increases towards the west (decreasing
//! RA), as usual for sky images.

mod error;
pub mod fits;
#[cfg(test)]
mod tests;

pub use error::ImageError;

use itertools::Itertools;
use marlu::RADec;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::constants::TAU;

/// A Stokes parameter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
pub enum Stokes {
    I,
    Q,
    U,
    V,
}

/// Parse a Stokes selection like "IV". The parameters must be given in IQUV
/// order and without duplicates.
pub fn parse_stokes(s: &str) -> Result<Vec<Stokes>, ImageError> {
    let stokes: Vec<Stokes> = s
        .trim()
        .chars()
        .map(|c| c.to_string().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| ImageError::InvalidStokes(s.to_string()))?;
    let ordered = stokes
        .iter()
        .tuple_windows()
        .all(|(a, b)| (*a as u8) < (*b as u8));
    if stokes.is_empty() || !ordered {
        return Err(ImageError::InvalidStokes(s.to_string()));
    }
    Ok(stokes)
}

/// The spectral axis of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpectralAxis {
    /// Multi-frequency synthesis: a single channel that every visibility
    /// frequency contributes to.
    Mfs { ref_freq_hz: f64 },

    /// A spectral cube with equally wide channels.
    Cube { freqs_hz: Vec<f64>, width_hz: f64 },
}

impl SpectralAxis {
    pub fn num_chans(&self) -> usize {
        match self {
            SpectralAxis::Mfs { .. } => 1,
            SpectralAxis::Cube { freqs_hz, .. } => freqs_hz.len(),
        }
    }

    /// The frequency used for frequency-dependent kernels \[Hz\].
    pub fn ref_freq_hz(&self) -> f64 {
        match self {
            SpectralAxis::Mfs { ref_freq_hz } => *ref_freq_hz,
            SpectralAxis::Cube { freqs_hz, .. } => {
                freqs_hz.iter().sum::<f64>() / freqs_hz.len().max(1) as f64
            }
        }
    }

    /// The image channel that a visibility frequency belongs to, if any.
    pub fn channel_for(&self, freq_hz: f64) -> Option<usize> {
        match self {
            SpectralAxis::Mfs { .. } => Some(0),
            SpectralAxis::Cube { freqs_hz, width_hz } => freqs_hz
                .iter()
                .map(|f| (f - freq_hz).abs())
                .position_min_by(|a, b| a.total_cmp(b))
                .filter(|&i| (freqs_hz[i] - freq_hz).abs() <= width_hz.abs() / 2.0 * (1.0 + 1e-9)),
        }
    }

    /// The frequencies of the image channels \[Hz\].
    pub fn freqs_hz(&self) -> Vec<f64> {
        match self {
            SpectralAxis::Mfs { ref_freq_hz } => vec![*ref_freq_hz],
            SpectralAxis::Cube { freqs_hz, .. } => freqs_hz.clone(),
        }
    }

    /// The width of a channel \[Hz\]. MFS images report zero.
    pub fn width_hz(&self) -> f64 {
        match self {
            SpectralAxis::Mfs { .. } => 0.0,
            SpectralAxis::Cube { width_hz, .. } => *width_hz,
        }
    }

    fn sub_axis(&self, start: usize, num: usize) -> SpectralAxis {
        match self {
            SpectralAxis::Mfs { .. } => self.clone(),
            SpectralAxis::Cube { freqs_hz, width_hz } => SpectralAxis::Cube {
                freqs_hz: freqs_hz[start..start + num].to_vec(),
                width_hz: *width_hz,
            },
        }
    }
}

/// Where a sub-image sits inside its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRegion {
    pub x0: usize,
    pub y0: usize,
    pub chan0: usize,
    pub nx: usize,
    pub ny: usize,
    pub nchan: usize,
}

/// The coordinate system of an image. Only SIN projections are supported.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGeometry {
    /// The tangent point of the projection.
    pub tangent: RADec,

    /// Direction cosines of the image centre relative to the tangent point.
    /// These are only non-zero for facets, which share their parent's tangent
    /// plane.
    pub centre_lm: (f64, f64),

    pub nx: usize,
    pub ny: usize,

    /// The (square) pixel size \[radians\].
    pub cell_rad: f64,

    pub spectral: SpectralAxis,

    pub stokes: Vec<Stokes>,
}

impl ImageGeometry {
    pub fn new(
        phase_centre: RADec,
        nx: usize,
        ny: usize,
        cell_rad: f64,
        spectral: SpectralAxis,
        stokes: Vec<Stokes>,
    ) -> Result<ImageGeometry, ImageError> {
        if nx == 0 || ny == 0 || nx % 2 == 1 || ny % 2 == 1 {
            return Err(ImageError::BadDimensions { nx, ny });
        }
        if !(cell_rad > 0.0) {
            return Err(ImageError::BadCellSize(cell_rad));
        }
        if spectral.num_chans() == 0 {
            return Err(ImageError::NoChannels);
        }
        if stokes.is_empty() {
            return Err(ImageError::InvalidStokes(String::new()));
        }
        Ok(ImageGeometry {
            tangent: phase_centre,
            centre_lm: (0.0, 0.0),
            nx,
            ny,
            cell_rad,
            spectral,
            stokes,
        })
    }

    /// The sky direction of the centre pixel.
    pub fn centre(&self) -> RADec {
        lm_to_radec(self.centre_lm.0, self.centre_lm.1, self.tangent)
    }

    /// Pixel increments along x and y \[radians\]. RA decreases with x.
    pub fn increments(&self) -> (f64, f64) {
        (-self.cell_rad, self.cell_rad)
    }

    pub fn num_chans(&self) -> usize {
        self.spectral.num_chans()
    }

    pub fn num_pols(&self) -> usize {
        self.stokes.len()
    }

    /// The shape of arrays holding this image.
    pub fn shape(&self) -> [usize; 4] {
        [self.num_chans(), self.num_pols(), self.ny, self.nx]
    }

    /// The Stokes planes as a string, e.g. "IQUV".
    pub fn stokes_string(&self) -> String {
        self.stokes.iter().map(|s| s.to_string()).join("")
    }

    /// The sky direction of a pixel.
    pub fn pixel_to_radec(&self, x: f64, y: f64) -> RADec {
        let (dx, dy) = self.increments();
        let l = self.centre_lm.0 + (x - (self.nx / 2) as f64) * dx;
        let m = self.centre_lm.1 + (y - (self.ny / 2) as f64) * dy;
        lm_to_radec(l, m, self.tangent)
    }

    /// The geometry of facet `(fx, fy)` when this image is split into
    /// `facets` by `facets` pieces.
    pub fn facet(
        &self,
        facets: usize,
        fx: usize,
        fy: usize,
    ) -> Result<(ImageGeometry, SubRegion), ImageError> {
        if facets == 0 || self.nx % facets != 0 || self.ny % facets != 0 {
            return Err(ImageError::BadSplit {
                thing: "pixels per side",
                total: self.nx.min(self.ny),
                parts: facets,
            });
        }
        let (snx, sny) = (self.nx / facets, self.ny / facets);
        if snx % 2 == 1 || sny % 2 == 1 {
            return Err(ImageError::BadDimensions { nx: snx, ny: sny });
        }
        let (x0, y0) = (fx * snx, fy * sny);
        let (dx, dy) = self.increments();
        let pixel_offset_x = (x0 + snx / 2) as f64 - (self.nx / 2) as f64;
        let pixel_offset_y = (y0 + sny / 2) as f64 - (self.ny / 2) as f64;
        let geometry = ImageGeometry {
            centre_lm: (
                self.centre_lm.0 + pixel_offset_x * dx,
                self.centre_lm.1 + pixel_offset_y * dy,
            ),
            nx: snx,
            ny: sny,
            ..self.clone()
        };
        let region = SubRegion {
            x0,
            y0,
            chan0: 0,
            nx: snx,
            ny: sny,
            nchan: self.num_chans(),
        };
        Ok((geometry, region))
    }

    /// The geometry of channel chunk `i` when this image is split into
    /// `chunks` contiguous groups of channels.
    pub fn chunk(
        &self,
        chunks: usize,
        i: usize,
    ) -> Result<(ImageGeometry, SubRegion), ImageError> {
        let nchan = self.num_chans();
        if chunks == 0 || chunks > nchan || i >= chunks {
            return Err(ImageError::BadSplit {
                thing: "channels",
                total: nchan,
                parts: chunks,
            });
        }
        // Spread any remainder over the first chunks.
        let base = nchan / chunks;
        let extra = nchan % chunks;
        let start = i * base + i.min(extra);
        let num = base + usize::from(i < extra);
        let geometry = ImageGeometry {
            spectral: self.spectral.sub_axis(start, num),
            ..self.clone()
        };
        let region = SubRegion {
            x0: 0,
            y0: 0,
            chan0: start,
            nx: self.nx,
            ny: self.ny,
            nchan: num,
        };
        Ok((geometry, region))
    }
}

/// Get the sky direction of direction cosines `(l, m)` about a tangent point.
pub(crate) fn lm_to_radec(l: f64, m: f64, tangent: RADec) -> RADec {
    let n = (1.0 - l * l - m * m).max(0.0).sqrt();
    let (s_dec0, c_dec0) = tangent.dec.sin_cos();
    let dec = (m * c_dec0 + n * s_dec0).clamp(-1.0, 1.0).asin();
    let ra = tangent.ra + l.atan2(n * c_dec0 - m * s_dec0);
    RADec::from_radians(ra.rem_euclid(TAU), dec)
}

/// The images belonging to one mapper (or to a whole logical image, once its
/// facets or chunks have been put back together). These live for the whole
/// imaging run.
#[derive(Debug, Clone)]
pub struct ImageStore {
    pub geometry: ImageGeometry,

    /// The residual (or dirty) image.
    pub residual: Array4<f32>,

    pub psf: Array4<f32>,

    /// The model that gets degridded each major cycle.
    pub model: Array4<f32>,

    /// Sum of weights, indexed by `(polarisation, channel)`.
    pub sumwt: Array2<f64>,

    /// The sky coverage of primary-beam aware gridding, normalised to a peak
    /// of 1.
    pub sensitivity: Option<Array4<f32>>,
}

impl ImageStore {
    pub fn new(geometry: ImageGeometry) -> ImageStore {
        let shape = geometry.shape();
        let sumwt = Array2::zeros((geometry.num_pols(), geometry.num_chans()));
        ImageStore {
            residual: Array4::zeros(shape),
            psf: Array4::zeros(shape),
            model: Array4::zeros(shape),
            sumwt,
            sensitivity: None,
            geometry,
        }
    }

    /// Add to the model image.
    pub fn add_to_model(&mut self, delta: ArrayView4<f32>) -> Result<(), ImageError> {
        if delta.shape() != self.model.shape() {
            return Err(ImageError::ShapeMismatch {
                expected: self.geometry.shape(),
                actual: delta.shape().to_vec(),
            });
        }
        self.model += &delta;
        Ok(())
    }

    /// Copy a region of this store into a new store with the given geometry.
    pub fn sub_store(&self, geometry: ImageGeometry, region: &SubRegion) -> ImageStore {
        let slice = s![
            region.chan0..region.chan0 + region.nchan,
            ..,
            region.y0..region.y0 + region.ny,
            region.x0..region.x0 + region.nx
        ];
        ImageStore {
            residual: self.residual.slice(slice).to_owned(),
            psf: self.psf.slice(slice).to_owned(),
            model: self.model.slice(slice).to_owned(),
            sumwt: self
                .sumwt
                .slice(s![.., region.chan0..region.chan0 + region.nchan])
                .to_owned(),
            sensitivity: self
                .sensitivity
                .as_ref()
                .map(|s| s.slice(slice).to_owned()),
            geometry,
        }
    }

    /// Put a sub-store's images back into this store. This is the inverse of
    /// [`ImageStore::sub_store`].
    pub fn paste(&mut self, part: &ImageStore, region: &SubRegion) {
        let slice = s![
            region.chan0..region.chan0 + region.nchan,
            ..,
            region.y0..region.y0 + region.ny,
            region.x0..region.x0 + region.nx
        ];
        self.residual.slice_mut(slice).assign(&part.residual);
        self.psf.slice_mut(slice).assign(&part.psf);
        self.model.slice_mut(slice).assign(&part.model);
        self.sumwt
            .slice_mut(s![.., region.chan0..region.chan0 + region.nchan])
            .assign(&part.sumwt);
        if let Some(part_sens) = part.sensitivity.as_ref() {
            let shape = self.geometry.shape();
            self.sensitivity
                .get_or_insert_with(|| Array4::zeros(shape))
                .slice_mut(slice)
                .assign(part_sens);
        }
    }

    /// Replace the PSF with a facet's PSF, centred on this image's centre and
    /// zero elsewhere. Every facet samples the uv plane identically, so one
    /// facet's PSF stands in for the whole image.
    pub fn centre_psf_from(&mut self, facet: &ImageStore, region: &SubRegion) {
        let x0 = self.geometry.nx / 2 - region.nx / 2;
        let y0 = self.geometry.ny / 2 - region.ny / 2;
        self.psf.fill(0.0);
        self.psf
            .slice_mut(s![
                region.chan0..region.chan0 + region.nchan,
                ..,
                y0..y0 + region.ny,
                x0..x0 + region.nx
            ])
            .assign(&facet.psf);
    }
}
