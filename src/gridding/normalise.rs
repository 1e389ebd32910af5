// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Conversion between UV grids and images.

use log::{error, warn};
use marlu::c64;
use ndarray::prelude::*;
use rustfft::FftDirection;

use super::{GridError, GridStorage};
use crate::{
    fft::fft2_centred,
    math::{sinc_correction, spheroidal_pixel},
};

/// Turns grids into images and images into grids, undoing the image-plane
/// effect of the gridding kernels.
#[derive(Debug, Clone)]
pub struct ImageNormaliser {
    nx: usize,
    ny: usize,

    /// The gridding correction over the padded image.
    correction: Array2<f64>,
}

impl ImageNormaliser {
    /// `nx` and `ny` are the image size, `nx_pad` and `ny_pad` the grid size;
    /// all must be even.
    pub fn new(nx: usize, ny: usize, nx_pad: usize, ny_pad: usize, sampling: usize) -> Self {
        let correction = Array2::from_shape_fn((ny_pad, nx_pad), |(y, x)| {
            spheroidal_pixel(x, nx_pad)
                * spheroidal_pixel(y, ny_pad)
                * sinc_correction(x, nx_pad, sampling)
                * sinc_correction(y, ny_pad, sampling)
        });
        ImageNormaliser { nx, ny, correction }
    }

    fn padded_dim(&self) -> (usize, usize) {
        self.correction.dim()
    }

    /// The bottom-left corner of the image within the padded image.
    fn blc(&self) -> (usize, usize) {
        let (ny_pad, nx_pad) = self.padded_dim();
        ((ny_pad - self.ny) / 2, (nx_pad - self.nx) / 2)
    }

    /// Make an image from a grid. `sumwt` is indexed `(pol, chan)`. When
    /// `normalise` is set, each plane is divided by its sum of weights;
    /// otherwise it is scaled as a plain sum. Planes without weight are
    /// zeroed, unless no plane has any weight, in which case the raw
    /// transform is returned.
    pub(crate) fn get_image(
        &self,
        grid: &mut dyn GridStorage,
        sumwt: ArrayView2<f64>,
        normalise: bool,
    ) -> Result<(Array4<f32>, Array2<f64>), GridError> {
        let [nchan, npol, gny, gnx] = grid.shape();
        if (gny, gnx) != self.padded_dim() || sumwt.dim() != (npol, nchan) {
            return Err(GridError::ShapeMismatch {
                expected: vec![self.padded_dim().0, self.padded_dim().1, npol, nchan],
                actual: vec![gny, gnx, sumwt.nrows(), sumwt.ncols()],
            });
        }
        let num_pixels = (gnx * gny) as f64;
        let no_weight = sumwt.iter().all(|&w| w == 0.0);
        if no_weight {
            if normalise {
                error!("The sum of weights is zero for every plane; the image cannot be normalised");
            } else {
                warn!("The sum of weights is zero for every plane");
            }
        }

        let (y0, x0) = self.blc();
        let mut image = Array4::zeros((nchan, npol, self.ny, self.nx));
        for chan in 0..nchan {
            for pol in 0..npol {
                let weight = sumwt[(pol, chan)];
                let factor = if no_weight {
                    1.0
                } else if weight == 0.0 {
                    continue;
                } else if normalise {
                    num_pixels / weight
                } else {
                    num_pixels
                };

                let mut plane = grid.plane(chan, pol)?;
                fft2_centred(&mut plane, FftDirection::Inverse, true);
                let mut out = image.slice_mut(s![chan, pol, .., ..]);
                for ((y, x), v) in out.indexed_iter_mut() {
                    let c = self.correction[(y + y0, x + x0)];
                    if c != 0.0 {
                        *v = (plane[(y + y0, x + x0)].re / c * factor) as f32;
                    }
                }
            }
        }
        Ok((image, sumwt.to_owned()))
    }

    /// Turn one model image plane into a grid plane. The image is placed in
    /// the centre of the padded image and divided by the gridding correction
    /// before being Fourier transformed.
    pub fn to_grid(&self, model: ArrayView2<f32>) -> Result<Array2<c64>, GridError> {
        if model.dim() != (self.ny, self.nx) {
            return Err(GridError::ShapeMismatch {
                expected: vec![self.ny, self.nx],
                actual: model.shape().to_vec(),
            });
        }
        let (y0, x0) = self.blc();
        let mut plane = Array2::<c64>::zeros(self.padded_dim());
        for ((y, x), &v) in model.indexed_iter() {
            let c = self.correction[(y + y0, x + x0)];
            if c != 0.0 && v != 0.0 {
                plane[(y + y0, x + x0)] = c64::new(v as f64 / c, 0.0);
            }
        }
        fft2_centred(&mut plane, FftDirection::Forward, false);
        Ok(plane)
    }
}
