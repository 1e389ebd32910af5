// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Construction of convolution functions.
//!
//! A convolution function is a stack of oversampled 2-D kernels, one per
//! w-plane. Each kernel is the Fourier transform of an image-plane screen: a
//! prolate spheroidal taper, optionally multiplied by a primary beam, times the
//! w-term phase `exp(2 pi i w (sqrt(1 - l^2 - m^2) - 1))`. W-planes are spaced
//! quadratically in w, so low-w planes are dense.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use log::{debug, warn};
use marlu::{c32, c64};
use ndarray::prelude::*;
use rayon::prelude::*;
use rustfft::FftDirection;

use super::{inner::KernelPlane, GridError, GridKernelKind, PrimaryBeam};
use crate::{
    constants::{
        CONV_SAMPLING, MAX_CONV_SIZE, MAX_CONV_SIZE_LOW_MEMORY, SUPPORT_THRESHOLD, TAU,
        TRUNCATION_WARNING_LIMIT,
    },
    fft::fft2_centred,
    math::{cexp, spheroidal},
};

/// Everything that determines a convolution function.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct KernelRequest {
    pub(crate) kind: GridKernelKind,

    /// The padded grid size.
    pub(crate) nx_pad: usize,
    pub(crate) ny_pad: usize,

    /// The image cell size \[radians\].
    pub(crate) cell_rad: f64,

    pub(crate) num_planes: usize,
    pub(crate) low_memory: bool,
    pub(crate) strict_support: bool,

    /// The direction cosines of the pointing centre relative to the image
    /// centre. Only used by primary-beam kernels.
    pub(crate) pointing_lm: (f64, f64),

    /// The frequency at which the primary beam is evaluated \[Hz\].
    pub(crate) freq_hz: f64,
}

impl KernelRequest {
    /// A hash of everything about this request except the direction it is
    /// for. Floats are rounded so that tiny differences don't produce new
    /// kernels.
    pub(crate) fn fingerprint(&self) -> u64 {
        let round = |x: f64| (x * 1e12).round() as i64;
        let mut hasher = DefaultHasher::new();
        self.kind.hash_into(&mut hasher);
        self.nx_pad.hash(&mut hasher);
        self.ny_pad.hash(&mut hasher);
        round(self.cell_rad).hash(&mut hasher);
        self.num_planes.hash(&mut hasher);
        self.low_memory.hash(&mut hasher);
        self.strict_support.hash(&mut hasher);
        if self.kind.primary_beam().is_some() {
            round(self.pointing_lm.0).hash(&mut hasher);
            round(self.pointing_lm.1).hash(&mut hasher);
            self.freq_hz.round().to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// A stack of w-plane kernels with their supports.
#[derive(Debug, Clone)]
pub struct ConvolutionFunction {
    /// Kernel samples, `[plane][y][x]`, row major.
    data: Vec<c32>,

    /// The (odd) edge length of each kernel plane.
    size: usize,

    num_planes: usize,

    /// The half-width of each plane's footprint \[grid pixels\]. This never
    /// decreases with w.
    support: Vec<usize>,

    sampling: usize,

    /// Converts w \[wavelengths\] into a (squared) plane index.
    w_scale: f64,

    /// How many planes had their support clamped to fit the kernel array.
    truncated_planes: usize,

    /// Does the kernel carry a primary beam?
    has_beam: bool,
}

impl ConvolutionFunction {
    pub fn num_planes(&self) -> usize {
        self.num_planes
    }

    /// The edge length of each (cropped) kernel plane.
    pub fn conv_size(&self) -> usize {
        self.size
    }

    /// The oversampling factor.
    pub fn sampling(&self) -> usize {
        self.sampling
    }

    pub fn support(&self) -> &[usize] {
        &self.support
    }

    pub fn w_scale(&self) -> f64 {
        self.w_scale
    }

    pub fn truncated_planes(&self) -> usize {
        self.truncated_planes
    }

    /// Is the primary beam folded into these kernels?
    pub fn has_beam(&self) -> bool {
        self.has_beam
    }

    /// A copy of one kernel plane, centred on its middle sample.
    pub fn plane(&self, iw: usize) -> Array2<c32> {
        let plane = self.kernel_plane(iw);
        Array2::from_shape_fn((self.size, self.size), |(y, x)| {
            plane.data[y * self.size + x]
        })
    }

    /// The w-plane to use for `w_lambda` \[wavelengths\], or `None` if the
    /// sample is beyond the last plane.
    pub fn w_plane(&self, w_lambda: f64) -> Option<usize> {
        let iw = (self.w_scale * w_lambda).abs().sqrt().round() as usize;
        (iw < self.num_planes).then_some(iw)
    }

    pub(crate) fn kernel_plane(&self, iw: usize) -> KernelPlane {
        let len = self.size * self.size;
        KernelPlane {
            data: &self.data[iw * len..(iw + 1) * len],
            size: self.size,
            sampling: self.sampling,
        }
    }

    /// Build a convolution function. This is expensive; use
    /// [`super::ConvFuncCache`] to avoid repeating it.
    pub(crate) fn build(request: &KernelRequest) -> Result<ConvolutionFunction, GridError> {
        let sampling = CONV_SAMPLING;
        let num_planes = request.num_planes;
        if num_planes == 0 {
            return Err(GridError::NoWPlanes);
        }

        let pad_min = request.nx_pad.min(request.ny_pad);
        let mut conv_size = pad_min.min(MAX_CONV_SIZE);
        if request.low_memory && num_planes > 256 {
            conv_size = conv_size.min(MAX_CONV_SIZE_LOW_MEMORY);
        }
        conv_size -= conv_size % 2;
        if conv_size < 4 * sampling {
            return Err(GridError::DegenerateKernel(format!(
                "a {pad_min} pixel grid is too small for a kernel"
            )));
        }

        let max_w = 0.25 / request.cell_rad;
        let w_scale = ((num_planes - 1) * (num_planes - 1)) as f64 / max_w;
        let screen = Screen {
            conv_size,
            inner: conv_size / sampling,
            increment: request.cell_rad * sampling as f64 * pad_min as f64 / conv_size as f64,
            sampling,
        };
        let beam = request
            .kind
            .primary_beam()
            .map(|b| (b, request.pointing_lm, request.freq_hz));
        debug!(
            "Building a {} convolution function: {num_planes} planes of {conv_size}x{conv_size}, w scale {w_scale:e}",
            request.kind.name()
        );

        let raw: Vec<RawPlane> = (0..num_planes)
            .into_par_iter()
            .map(|iw| {
                let w = if iw == 0 {
                    0.0
                } else {
                    (iw * iw) as f64 / w_scale
                };
                screen.transform(w, beam)
            })
            .collect();

        let peak = raw.iter().map(|p| p.peak).fold(0.0, f64::max);
        if !(peak > 0.0) {
            return Err(GridError::DegenerateKernel(
                "the kernel has no amplitude".to_string(),
            ));
        }

        // Find the supports above a threshold relative to the whole stack.
        let mut truncated_planes = 0;
        let mut support = Vec::with_capacity(num_planes);
        let mut running_max = 0;
        for plane in &raw {
            let (s, clamped) = screen.support(&plane.profile, SUPPORT_THRESHOLD * peak);
            if clamped {
                truncated_planes += 1;
            }
            running_max = running_max.max(s);
            support.push(running_max);
        }
        if support[0] < 1 {
            return Err(GridError::DegenerateKernel(
                "the support of the first w-plane is zero".to_string(),
            ));
        }
        if truncated_planes > 0 {
            if request.strict_support {
                return Err(GridError::TruncatedKernel {
                    planes: truncated_planes,
                });
            }
            if truncated_planes > TRUNCATION_WARNING_LIMIT {
                warn!("The support of {truncated_planes} w-planes was truncated; consider more padding or fewer w-planes");
            } else {
                debug!("The support of {truncated_planes} w-planes was truncated");
            }
        }

        // Normalise so that the first plane sums to 1 over grid points. Kernels
        // with a primary beam are normalised against a taper-only kernel, so
        // that the beam survives.
        let (norm_peak, norm_sum) = match beam {
            None => (peak, raw[0].grid_sum(support[0], sampling) / peak),
            Some(_) => {
                let reference = screen.transform(0.0, None);
                let (s, _) = screen.support(&reference.profile, SUPPORT_THRESHOLD * reference.peak);
                (
                    reference.peak,
                    reference.grid_sum(s, sampling) / reference.peak,
                )
            }
        };
        if !(norm_sum > 0.0) {
            return Err(GridError::DegenerateKernel(format!(
                "the first w-plane sums to {norm_sum}"
            )));
        }

        let max_support = support.iter().copied().max().unwrap_or(0);
        let half = ((max_support + 2) * sampling).min(conv_size / 2 - 1);
        let size = 2 * half + 1;
        let scale = 1.0 / (norm_peak * norm_sum);
        let mut data = vec![c32::default(); num_planes * size * size];
        data.par_chunks_exact_mut(size * size)
            .zip(raw.par_iter())
            .for_each(|(out, plane)| plane.crop_into(out, half, scale));

        Ok(ConvolutionFunction {
            data,
            size,
            num_planes,
            support,
            sampling,
            w_scale,
            truncated_planes,
            has_beam: beam.is_some(),
        })
    }
}

/// The image-plane screen that gets transformed into a kernel.
struct Screen {
    conv_size: usize,

    /// The number of screen pixels covered by the taper.
    inner: usize,

    /// The size of a screen pixel \[radians\].
    increment: f64,

    sampling: usize,
}

impl Screen {
    /// Fill a screen for `w_lambda` and Fourier transform it.
    fn transform(&self, w_lambda: f64, beam: Option<(&PrimaryBeam, (f64, f64), f64)>) -> RawPlane {
        let c = (self.conv_size / 2) as isize;
        let half_inner = (self.inner / 2) as isize;
        let mut screen = Array2::<c64>::zeros((self.conv_size, self.conv_size));
        for iy in -half_inner..=half_inner {
            let taper_y = spheroidal(iy as f64 / half_inner as f64);
            if taper_y == 0.0 {
                continue;
            }
            let m = iy as f64 * self.increment;
            for ix in -half_inner..=half_inner {
                let taper_x = spheroidal(ix as f64 / half_inner as f64);
                // Screen x runs against the sky's l, as image x does.
                let l = -ix as f64 * self.increment;
                let rsq = l * l + m * m;
                if taper_x == 0.0 || rsq >= 1.0 {
                    continue;
                }
                let mut amp = taper_x * taper_y;
                if let Some((beam, (lp, mp), freq_hz)) = beam {
                    let offset = ((l - lp).powi(2) + (m - mp).powi(2)).sqrt();
                    amp *= beam.power(offset, freq_hz);
                }
                let phase = TAU * w_lambda * ((1.0 - rsq).sqrt() - 1.0);
                screen[((c + iy) as usize, (c + ix) as usize)] = cexp(phase) * amp;
            }
        }
        fft2_centred(&mut screen, FftDirection::Forward, false);
        RawPlane::new(screen, self)
    }

    /// Get the support from a radial profile, scanning inwards from the edge
    /// for the first sample above `threshold`. Also returns whether the
    /// support had to be clamped to fit the kernel array.
    fn support(&self, profile: &[f64], threshold: f64) -> (usize, bool) {
        let trial = (1..profile.len().saturating_sub(1))
            .rev()
            .find(|&t| profile[t] > threshold);
        let support = match trial {
            Some(t) => (0.5 + t as f64 / self.sampling as f64) as usize + 1,
            None => 0,
        };
        if support * self.sampling * 2 >= self.conv_size {
            (self.conv_size / 2 / self.sampling - 1, true)
        } else {
            (support, false)
        }
    }
}

/// A transformed screen, cropped to a conservative support.
struct RawPlane {
    /// Centred on `(half, half)`.
    data: Array2<c64>,
    half: usize,
    peak: f64,

    /// The largest magnitude along the four axis directions at each radius.
    profile: Vec<f64>,
}

impl RawPlane {
    fn new(full: Array2<c64>, screen: &Screen) -> RawPlane {
        let n = full.nrows();
        let c = n / 2;
        let peak = full.iter().map(|v| v.norm()).fold(0.0, f64::max);
        let profile: Vec<f64> = (0..c)
            .map(|r| {
                [
                    full[(c + r, c)],
                    full[(c - r, c)],
                    full[(c, c + r)],
                    full[(c, c - r)],
                ]
                .iter()
                .map(|v| v.norm())
                .fold(0.0, f64::max)
            })
            .collect();
        // A threshold relative to this plane's own peak can only give a larger
        // support than one relative to the whole stack.
        let (own_support, _) = screen.support(&profile, SUPPORT_THRESHOLD * peak);
        let half = ((own_support + 2) * screen.sampling).min(c - 1);
        let data = full.slice(s![c - half..=c + half, c - half..=c + half]).to_owned();
        RawPlane {
            data,
            half,
            peak,
            profile,
        }
    }

    /// The sum of real parts over grid points within `support`.
    fn grid_sum(&self, support: usize, sampling: usize) -> f64 {
        let s = support as isize;
        let h = self.half as isize;
        let step = sampling as isize;
        let mut sum = 0.0;
        for iy in -s..=s {
            for ix in -s..=s {
                let (y, x) = (h + iy * step, h + ix * step);
                if y >= 0 && x >= 0 && y <= 2 * h && x <= 2 * h {
                    sum += self.data[(y as usize, x as usize)].re;
                }
            }
        }
        sum
    }

    /// Write this plane, scaled, into a centred `2 half + 1` square.
    fn crop_into(&self, out: &mut [c32], half: usize, scale: f64) {
        let size = 2 * half + 1;
        let m = half.min(self.half) as isize;
        for dy in -m..=m {
            for dx in -m..=m {
                let v = self.data[(
                    (self.half as isize + dy) as usize,
                    (self.half as isize + dx) as usize,
                )] * scale;
                out[(half as isize + dy) as usize * size + (half as isize + dx) as usize] =
                    c32::new(v.re as f32, v.im as f32);
            }
        }
    }
}
