// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The gridder/degridder.
//!
//! An [`FtMachine`] owns at most one grid at a time. Gridding goes
//! `initialise_to_sky` -> `put`... -> `finalise_to_sky` -> `get_image`;
//! degridding goes `initialise_to_vis` -> `get`/`predict`... ->
//! `finalise_to_vis`.

use std::sync::Arc;

use log::{debug, info, trace, warn};
use marlu::{c32, c64, RADec, UVW};
use ndarray::prelude::*;

use super::{
    inner::{Footprint, Orientation},
    ArrayGrid, ConvFuncCache, ConvolutionFunction, DataColumn, FtOptions, GridError,
    GridKernelKind, GridStorage, ImageNormaliser, KernelRequest, TangentKey, TiledGrid,
};
use crate::{
    constants::{TAU, VEL_C},
    image::{ImageGeometry, Stokes},
    math::{cexp, next_composite_even},
    vis::{Correlation, VisibilityBuffer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GridState {
    /// No grid.
    Closed,

    /// A grid is open for gridding.
    ToSky,

    /// A grid is open for degridding.
    ToVis,

    /// Gridding has finished; the grid is kept until it is turned into an
    /// image.
    Finished,
}

impl GridState {
    fn describe(self) -> &'static str {
        match self {
            GridState::Closed => "nothing",
            GridState::ToSky => "gridding",
            GridState::ToVis => "degridding",
            GridState::Finished => "imaging",
        }
    }
}

/// Grids visibilities into images of one [`ImageGeometry`], and degrids model
/// images into visibilities.
pub struct FtMachine {
    kind: GridKernelKind,
    geometry: ImageGeometry,
    options: FtOptions,
    nx_pad: usize,
    ny_pad: usize,
    cache: Arc<ConvFuncCache>,
    normaliser: ImageNormaliser,
    state: GridState,
    grid: Option<Box<dyn GridStorage>>,

    /// Indexed `(pol, chan)`.
    sumwt: Array2<f64>,

    /// The gridded weight of each pointing, for the sensitivity of
    /// primary-beam kernels.
    pointing_weights: Vec<(RADec, f64)>,

    /// The keys of every convolution function this machine has used.
    keys: Vec<TangentKey>,

    /// Samples skipped during the current pass because they fell off the grid
    /// or beyond the last w-plane.
    num_skipped: usize,
}

impl FtMachine {
    pub fn new(
        kind: GridKernelKind,
        geometry: ImageGeometry,
        options: FtOptions,
        cache: Arc<ConvFuncCache>,
    ) -> Result<FtMachine, GridError> {
        options.validate()?;
        let nx_pad = next_composite_even(geometry.nx as f64 * options.padding);
        let ny_pad = next_composite_even(geometry.ny as f64 * options.padding);
        let normaliser = ImageNormaliser::new(
            geometry.nx,
            geometry.ny,
            nx_pad,
            ny_pad,
            crate::constants::CONV_SAMPLING,
        );
        let sumwt = Array2::zeros((geometry.num_pols(), geometry.num_chans()));
        Ok(FtMachine {
            kind,
            geometry,
            options,
            nx_pad,
            ny_pad,
            cache,
            normaliser,
            state: GridState::Closed,
            grid: None,
            sumwt,
            pointing_weights: vec![],
            keys: vec![],
            num_skipped: 0,
        })
    }

    pub fn kind(&self) -> &GridKernelKind {
        &self.kind
    }

    pub fn geometry(&self) -> &ImageGeometry {
        &self.geometry
    }

    /// The size of the grid, `(nx, ny)`.
    pub fn padded_shape(&self) -> (usize, usize) {
        (self.nx_pad, self.ny_pad)
    }

    /// The keys of every convolution function this machine has used.
    pub fn kernel_keys(&self) -> &[TangentKey] {
        &self.keys
    }

    /// Is the current grid tiled on disk?
    pub fn is_tiled(&self) -> bool {
        self.grid.as_ref().map(|g| g.is_tiled()).unwrap_or(false)
    }

    /// The number of samples skipped during the last pass.
    pub fn num_skipped(&self) -> usize {
        self.num_skipped
    }

    fn num_planes(&self) -> usize {
        if self.kind.uses_w_planes() {
            self.options.wprojplanes
        } else {
            1
        }
    }

    fn require(&self, state: GridState) -> Result<(), GridError> {
        match self.state {
            s if s == state => Ok(()),
            GridState::Closed | GridState::Finished => Err(GridError::GridNotOpen),
            s => Err(GridError::WrongDirection {
                expected: s.describe(),
                actual: state.describe(),
            }),
        }
    }

    fn open_storage(&self) -> Result<Box<dyn GridStorage>, GridError> {
        if matches!(self.state, GridState::ToSky | GridState::ToVis) {
            return Err(GridError::GridAlreadyOpen);
        }
        let shape = [
            self.geometry.num_chans(),
            self.geometry.num_pols(),
            self.ny_pad,
            self.nx_pad,
        ];
        let num_elements: usize = shape.iter().product();
        if num_elements > self.options.cache_size {
            info!(
                "A {}x{} grid with {} planes doesn't fit in the memory budget; tiling it on disk",
                self.nx_pad,
                self.ny_pad,
                shape[0] * shape[1]
            );
            if self.options.use_double_precision {
                warn!("Disk-tiled grids are single precision only");
            }
            Ok(Box::new(TiledGrid::new(
                shape,
                self.options.tile_size,
                self.options.cache_size,
            )?))
        } else if self.options.use_double_precision {
            Ok(Box::new(ArrayGrid::<f64>::new(shape)))
        } else {
            Ok(Box::new(ArrayGrid::<f32>::new(shape)))
        }
    }

    /// Get the convolution function for a buffer.
    fn kernel_for(&mut self, vb: &VisibilityBuffer) -> Result<Arc<ConvolutionFunction>, GridError> {
        let (direction, pointing_lm) = match self.kind.primary_beam() {
            Some(_) => {
                let lmn = vb.phase_centre.to_lmn(self.geometry.tangent);
                (
                    vb.phase_centre,
                    (
                        lmn.l - self.geometry.centre_lm.0,
                        lmn.m - self.geometry.centre_lm.1,
                    ),
                )
            }
            None => (self.geometry.tangent, (0.0, 0.0)),
        };
        let request = KernelRequest {
            kind: self.kind,
            nx_pad: self.nx_pad,
            ny_pad: self.ny_pad,
            cell_rad: self.geometry.cell_rad,
            num_planes: self.num_planes(),
            low_memory: self.options.low_memory_kernels,
            strict_support: self.options.strict_support,
            pointing_lm,
            freq_hz: self.geometry.spectral.ref_freq_hz(),
        };
        let key = TangentKey::new(direction, request.fingerprint());
        if !self.keys.contains(&key) {
            self.keys.push(key);
        }
        self.cache.find(key, || ConvolutionFunction::build(&request))
    }

    /// Scale factors from UVW \[wavelengths\] to grid pixels, `(x, y)`.
    fn uv_scale(&self) -> (f64, f64) {
        let (dx, dy) = self.geometry.increments();
        (self.nx_pad as f64 * dx, self.ny_pad as f64 * dy)
    }

    fn rows(vb: &VisibilityBuffer, row: Option<usize>) -> Result<std::ops::Range<usize>, GridError> {
        match row {
            None => Ok(0..vb.num_rows()),
            Some(r) if r < vb.num_rows() => Ok(r..r + 1),
            Some(r) => Err(GridError::BadRow {
                row: r,
                num_rows: vb.num_rows(),
            }),
        }
    }

    /// Open a new grid for gridding, and reset the sum of weights.
    pub fn initialise_to_sky(&mut self) -> Result<(), GridError> {
        self.grid = Some(self.open_storage()?);
        self.sumwt.fill(0.0);
        self.pointing_weights.clear();
        self.num_skipped = 0;
        self.state = GridState::ToSky;
        Ok(())
    }

    /// Grid the visibilities of a buffer (or only one of its rows).
    ///
    /// Flagged rows and samples are skipped, as are autocorrelations unless
    /// `use_zero` is set. Samples that would fall off the grid or beyond the
    /// last w-plane are silently ignored.
    pub fn put(
        &mut self,
        vb: &VisibilityBuffer,
        row: Option<usize>,
        dopsf: bool,
        column: DataColumn,
    ) -> Result<(), GridError> {
        self.require(GridState::ToSky)?;
        let rows = Self::rows(vb, row)?;
        let cf = self.kernel_for(vb)?;
        let rephasing = Rephasing::new(vb.phase_centre, &self.geometry);
        let chan_map = self.channel_map(vb);
        let recipes = stokes_recipes(&self.geometry.stokes, &vb.correlations);
        let dopsf = dopsf || column == DataColumn::Psf;
        let vis = if dopsf {
            None
        } else {
            Some(VisColumn::new(vb, column)?)
        };
        let (scale_x, scale_y) = self.uv_scale();
        let (off_x, off_y) = ((self.nx_pad / 2) as f64, (self.ny_pad / 2) as f64);
        let grid_dim = (self.ny_pad, self.nx_pad);
        let has_beam = cf.has_beam();
        let sampling = cf.sampling();

        let grid = self.grid.as_deref_mut().ok_or(GridError::GridNotOpen)?;
        let mut pointing_weight = 0.0;
        for row in rows {
            if vb.flag_row[row] || (vb.is_auto(row) && !self.options.use_zero) {
                continue;
            }
            let (uvw, dphase) = rephasing.apply(vb.uvws[row]);
            for (chan, &freq) in vb.freqs_hz.iter().enumerate() {
                let Some(image_chan) = chan_map[chan] else {
                    continue;
                };
                let weight = vb.weights[(row, chan)] as f64;
                if !(weight > 0.0) {
                    continue;
                }
                let uvw_l = uvw * (freq / VEL_C);
                let footprint = cf.w_plane(uvw_l.w).and_then(|iw| {
                    Footprint::locate(
                        (scale_x * uvw_l.u + off_x, scale_y * uvw_l.v + off_y),
                        cf.support()[iw],
                        sampling,
                        grid_dim,
                        Orientation::put(uvw_l.w),
                    )
                    .map(|fp| (iw, fp))
                });
                let Some((iw, footprint)) = footprint else {
                    self.num_skipped += 1;
                    continue;
                };
                let kernel = cf.kernel_plane(iw);
                let phasor = cexp(-TAU * dphase * freq / VEL_C);

                for (pol, recipe) in recipes.iter().enumerate() {
                    let Some(recipe) = recipe else {
                        continue;
                    };
                    if recipe.iter().any(|&(ci, _)| vb.flags[(row, chan, ci)]) {
                        continue;
                    }
                    let value = match vis.as_ref() {
                        None => c64::new(weight, 0.0),
                        Some(vis) => {
                            let stokes: c64 = recipe
                                .iter()
                                .map(|&(ci, coeff)| vis.at(row, chan, ci) * coeff)
                                .sum();
                            stokes * phasor * weight
                        }
                    };
                    let norm = grid.put(image_chan, pol, &footprint, &kernel, value)?;
                    self.sumwt[(pol, image_chan)] += if has_beam { weight } else { weight * norm };
                    if pol == 0 {
                        pointing_weight += weight;
                    }
                }
            }
        }

        if has_beam && pointing_weight > 0.0 {
            match self
                .pointing_weights
                .iter_mut()
                .find(|(p, _)| same_direction(*p, vb.phase_centre))
            {
                Some((_, w)) => *w += pointing_weight,
                None => self.pointing_weights.push((vb.phase_centre, pointing_weight)),
            }
        }
        Ok(())
    }

    /// Stop gridding. A double-precision grid is demoted to single precision.
    pub fn finalise_to_sky(&mut self) -> Result<(), GridError> {
        self.require(GridState::ToSky)?;
        let grid = self.grid.take().ok_or(GridError::GridNotOpen)?;
        self.grid = Some(grid.into_single()?);
        self.state = GridState::Finished;
        if self.num_skipped > 0 {
            debug!(
                "{} samples fell off the grid or beyond the last w-plane",
                self.num_skipped
            );
        }
        Ok(())
    }

    /// Make an image (and get the sum of weights) from the finished grid. The
    /// grid is kept, so this can be called repeatedly.
    pub fn get_image(&mut self, normalise: bool) -> Result<(Array4<f32>, Array2<f64>), GridError> {
        if self.state != GridState::Finished {
            return Err(GridError::GridNotOpen);
        }
        let grid = self.grid.as_deref_mut().ok_or(GridError::GridNotOpen)?;
        self.normaliser.get_image(grid, self.sumwt.view(), normalise)
    }

    /// The sum of weights of the last gridding pass, indexed `(pol, chan)`.
    pub fn weights(&self) -> ArrayView2<f64> {
        self.sumwt.view()
    }

    /// The sky coverage of primary-beam kernels: the weighted sum of the
    /// primary beams of all gridded pointings, normalised to a peak of 1.
    pub fn sensitivity(&self) -> Option<Array4<f32>> {
        let beam = self.kind.primary_beam()?;
        if self.pointing_weights.is_empty() {
            return None;
        }
        let geometry = &self.geometry;
        let freqs = geometry.spectral.freqs_hz();
        let mut plane = Array3::<f64>::zeros((freqs.len(), geometry.ny, geometry.nx));
        for ((chan, y, x), v) in plane.indexed_iter_mut() {
            let radec = geometry.pixel_to_radec(x as f64, y as f64);
            *v = self
                .pointing_weights
                .iter()
                .map(|&(pointing, weight)| {
                    let lmn = radec.to_lmn(pointing);
                    let offset = (lmn.l * lmn.l + lmn.m * lmn.m).sqrt().min(1.0).asin();
                    weight * beam.power(offset, freqs[chan])
                })
                .sum();
        }
        let peak = plane.iter().copied().fold(0.0, f64::max);
        if peak > 0.0 {
            plane.mapv_inplace(|v| v / peak);
        }
        Some(Array4::from_shape_fn(geometry.shape(), |(c, _, y, x)| {
            plane[(c, y, x)] as f32
        }))
    }

    /// Fourier transform a model image onto a new grid, ready for degridding.
    pub fn initialise_to_vis(&mut self, model: ArrayView4<f32>) -> Result<(), GridError> {
        let expected = self.geometry.shape();
        if model.shape() != expected {
            return Err(GridError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: model.shape().to_vec(),
            });
        }
        let mut grid = self.open_storage()?;
        for (chan, model_c) in model.outer_iter().enumerate() {
            for (pol, model_p) in model_c.outer_iter().enumerate() {
                if model_p.iter().all(|&v| v == 0.0) {
                    continue;
                }
                let plane = self.normaliser.to_grid(model_p)?;
                grid.set_plane(chan, pol, plane.view())?;
            }
        }
        self.grid = Some(grid);
        self.num_skipped = 0;
        self.state = GridState::ToVis;
        Ok(())
    }

    /// Predict the visibilities of a buffer (or of only one of its rows) from
    /// the model grid. The returned cube has the shape of the buffer's model
    /// cube; rows that weren't predicted are zero. Flags are ignored.
    pub fn predict(
        &mut self,
        vb: &VisibilityBuffer,
        row: Option<usize>,
    ) -> Result<Array3<c32>, GridError> {
        self.require(GridState::ToVis)?;
        let rows = Self::rows(vb, row)?;
        let cf = self.kernel_for(vb)?;
        let rephasing = Rephasing::new(vb.phase_centre, &self.geometry);
        let chan_map = self.channel_map(vb);
        let expansions = correlation_expansions(&self.geometry.stokes, &vb.correlations);
        let (scale_x, scale_y) = self.uv_scale();
        let (off_x, off_y) = ((self.nx_pad / 2) as f64, (self.ny_pad / 2) as f64);
        let grid_dim = (self.ny_pad, self.nx_pad);
        let has_beam = cf.has_beam();
        let sampling = cf.sampling();
        let num_pols = self.geometry.num_pols();

        let grid = self.grid.as_deref_mut().ok_or(GridError::GridNotOpen)?;
        let mut prediction = Array3::zeros(vb.model.dim());
        for row in rows {
            if vb.is_auto(row) && !self.options.use_zero {
                continue;
            }
            let (uvw, dphase) = rephasing.apply(vb.uvws[row]);
            for (chan, &freq) in vb.freqs_hz.iter().enumerate() {
                let Some(image_chan) = chan_map[chan] else {
                    continue;
                };
                let uvw_l = uvw * (freq / VEL_C);
                let footprint = cf.w_plane(uvw_l.w).and_then(|iw| {
                    Footprint::locate(
                        (scale_x * uvw_l.u + off_x, scale_y * uvw_l.v + off_y),
                        cf.support()[iw],
                        sampling,
                        grid_dim,
                        Orientation::get(uvw_l.w),
                    )
                    .map(|fp| (iw, fp))
                });
                let Some((iw, footprint)) = footprint else {
                    self.num_skipped += 1;
                    continue;
                };
                let kernel = cf.kernel_plane(iw);
                let phasor = cexp(TAU * dphase * freq / VEL_C);

                let mut stokes = [c64::default(); 4];
                for (pol, s) in stokes.iter_mut().enumerate().take(num_pols) {
                    let (sum, norm) = grid.get(image_chan, pol, &footprint, &kernel)?;
                    let value = if has_beam {
                        sum
                    } else if norm != 0.0 {
                        sum / norm
                    } else {
                        c64::default()
                    };
                    *s = value * phasor;
                }
                for (ci, expansion) in expansions.iter().enumerate() {
                    let v: c64 = expansion
                        .iter()
                        .map(|&(pol, coeff)| stokes[pol] * coeff)
                        .sum();
                    prediction[(row, chan, ci)] = c32::new(v.re as f32, v.im as f32);
                }
            }
        }
        Ok(prediction)
    }

    /// Predict visibilities into the buffer's model cube, overwriting the
    /// rows that are predicted.
    pub fn get(&mut self, vb: &mut VisibilityBuffer, row: Option<usize>) -> Result<(), GridError> {
        let prediction = self.predict(vb, row)?;
        let rows = Self::rows(vb, row)?;
        vb.model
            .slice_mut(s![rows.clone(), .., ..])
            .assign(&prediction.slice(s![rows, .., ..]));
        Ok(())
    }

    /// Stop degridding and release the grid.
    pub fn finalise_to_vis(&mut self) -> Result<(), GridError> {
        self.require(GridState::ToVis)?;
        self.grid = None;
        self.state = GridState::Closed;
        trace!("Released the degridding grid");
        Ok(())
    }

    /// Drop any grid, whatever the machine was doing.
    pub fn close(&mut self) {
        if self.grid.take().is_some() {
            debug!("Closed an open {} grid", self.state.describe());
        }
        self.state = GridState::Closed;
    }

    /// The image channel of each of a buffer's channels.
    fn channel_map(&self, vb: &VisibilityBuffer) -> Vec<Option<usize>> {
        vb.freqs_hz
            .iter()
            .map(|&f| self.geometry.spectral.channel_for(f))
            .collect()
    }
}

fn same_direction(a: RADec, b: RADec) -> bool {
    const TOL: f64 = 1e-9;
    let dra = (a.ra - b.ra).abs();
    (dra < TOL || (TAU - dra) < TOL) && (a.dec - b.dec).abs() < TOL
}

/// The rows of the matrix taking a baseline in equatorial coordinates to UVW
/// towards `radec`.
fn uvw_frame(radec: RADec) -> [[f64; 3]; 3] {
    let (s_ra, c_ra) = radec.ra.sin_cos();
    let (s_dec, c_dec) = radec.dec.sin_cos();
    [
        [-s_ra, c_ra, 0.0],
        [-s_dec * c_ra, -s_dec * s_ra, c_dec],
        [c_dec * c_ra, c_dec * s_ra, s_dec],
    ]
}

/// Takes UVWs towards a buffer's phase centre to the frame of an image, and
/// works out the phase that moves the visibilities to the image centre.
struct Rephasing {
    /// Rotation from the buffer's phase centre to the image's tangent point.
    rotation: Option<[[f64; 3]; 3]>,

    /// `(l, m, n - 1)` of the image centre, relative to the tangent point.
    shift: Option<(f64, f64, f64)>,
}

impl Rephasing {
    fn new(phase_centre: RADec, geometry: &ImageGeometry) -> Rephasing {
        let rotation = if same_direction(phase_centre, geometry.tangent) {
            None
        } else {
            let to = uvw_frame(geometry.tangent);
            let from = uvw_frame(phase_centre);
            let mut r = [[0.0; 3]; 3];
            for (i, row) in r.iter_mut().enumerate() {
                for (j, v) in row.iter_mut().enumerate() {
                    *v = (0..3).map(|k| to[i][k] * from[j][k]).sum();
                }
            }
            Some(r)
        };
        let (l, m) = geometry.centre_lm;
        let shift = if l == 0.0 && m == 0.0 {
            None
        } else {
            Some((l, m, (1.0 - l * l - m * m).max(0.0).sqrt() - 1.0))
        };
        Rephasing { rotation, shift }
    }

    /// Get the UVW in the image frame and the phase delay \[metres\] to
    /// apply as `exp(-2 pi i dphase / lambda)`.
    fn apply(&self, uvw: UVW) -> (UVW, f64) {
        let (new, mut dphase) = match self.rotation {
            None => (uvw, 0.0),
            Some(r) => {
                let rotated = UVW {
                    u: r[0][0] * uvw.u + r[0][1] * uvw.v + r[0][2] * uvw.w,
                    v: r[1][0] * uvw.u + r[1][1] * uvw.v + r[1][2] * uvw.w,
                    w: r[2][0] * uvw.u + r[2][1] * uvw.v + r[2][2] * uvw.w,
                };
                (rotated, uvw.w - rotated.w)
            }
        };
        if let Some((l, m, n_minus_1)) = self.shift {
            dphase -= new.u * l + new.v * m + new.w * n_minus_1;
        }
        (new, dphase)
    }
}

/// How to form each Stokes plane from a buffer's correlations, as
/// `(correlation index, coefficient)` pairs. `None` if a correlation is
/// missing.
fn stokes_recipes(stokes: &[Stokes], correlations: &[Correlation]) -> Vec<Option<Vec<(usize, c64)>>> {
    let index = |c: Correlation| correlations.iter().position(|&x| x == c);
    let half = c64::new(0.5, 0.0);
    let half_i = c64::new(0.0, 0.5);
    stokes
        .iter()
        .map(|s| {
            let terms = match s {
                Stokes::I => [(Correlation::XX, half), (Correlation::YY, half)],
                Stokes::Q => [(Correlation::XX, half), (Correlation::YY, -half)],
                Stokes::U => [(Correlation::XY, half), (Correlation::YX, half)],
                // (XY - YX) / 2i
                Stokes::V => [(Correlation::XY, -half_i), (Correlation::YX, half_i)],
            };
            terms
                .iter()
                .map(|&(c, coeff)| index(c).map(|i| (i, coeff)))
                .collect()
        })
        .collect()
}

/// How to form each of a buffer's correlations from the Stokes planes, as
/// `(Stokes plane index, coefficient)` pairs. Stokes parameters that aren't
/// imaged are taken as zero.
fn correlation_expansions(stokes: &[Stokes], correlations: &[Correlation]) -> Vec<Vec<(usize, c64)>> {
    let index = |s: Stokes| stokes.iter().position(|&x| x == s);
    let one = c64::new(1.0, 0.0);
    let i = c64::new(0.0, 1.0);
    correlations
        .iter()
        .map(|c| {
            let terms = match c {
                Correlation::XX => [(Stokes::I, one), (Stokes::Q, one)],
                Correlation::YY => [(Stokes::I, one), (Stokes::Q, -one)],
                Correlation::XY => [(Stokes::U, one), (Stokes::V, i)],
                Correlation::YX => [(Stokes::U, one), (Stokes::V, -i)],
            };
            terms
                .iter()
                .filter_map(|&(s, coeff)| index(s).map(|p| (p, coeff)))
                .collect()
        })
        .collect()
}

/// The visibilities being gridded.
enum VisColumn<'a> {
    Plain(&'a Array3<c32>),
    Difference(&'a Array3<c32>, &'a Array3<c32>),
}

impl<'a> VisColumn<'a> {
    fn new(vb: &'a VisibilityBuffer, column: DataColumn) -> Result<VisColumn<'a>, GridError> {
        Ok(match column {
            DataColumn::Observed | DataColumn::Psf => VisColumn::Plain(&vb.data),
            DataColumn::Corrected => {
                VisColumn::Plain(vb.corrected.as_ref().ok_or(GridError::NoCorrectedData)?)
            }
            DataColumn::Model => VisColumn::Plain(&vb.model),
            DataColumn::Residual => VisColumn::Difference(&vb.data, &vb.model),
            DataColumn::CorrectedResidual => VisColumn::Difference(
                vb.corrected.as_ref().ok_or(GridError::NoCorrectedData)?,
                &vb.model,
            ),
        })
    }

    #[inline]
    fn at(&self, row: usize, chan: usize, corr: usize) -> c64 {
        let v = match self {
            VisColumn::Plain(a) => a[(row, chan, corr)],
            VisColumn::Difference(a, b) => a[(row, chan, corr)] - b[(row, chan, corr)],
        };
        c64::new(v.re as f64, v.im as f64)
    }
}
