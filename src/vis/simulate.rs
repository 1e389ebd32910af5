// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Simulate visibilities of point sources.
//!
//! This is mostly useful for exercising the imager without any real data.

use hifitime::{Duration, Epoch};
use log::debug;
use marlu::{
    c32, c64, pos::xyz::xyzs_to_cross_uvws, precession::get_lmst, LatLngHeight, RADec,
    XyzGeodetic, LMN, UVW,
};
use rayon::prelude::*;

use super::{Correlation, VisError, VisibilityBuffer};
use crate::{
    constants::{TAU, VEL_C},
    math::cexp,
};

/// A point source with full polarisation \[Jy\].
#[derive(Debug, Clone, Copy)]
pub struct PointSource {
    pub radec: RADec,
    pub i: f64,
    pub q: f64,
    pub u: f64,
    pub v: f64,
}

impl PointSource {
    /// An unpolarised point source.
    pub fn unpolarised(radec: RADec, flux_density: f64) -> PointSource {
        PointSource {
            radec,
            i: flux_density,
            q: 0.0,
            u: 0.0,
            v: 0.0,
        }
    }

    /// The (un-phased) visibility this source has on a correlation.
    fn correlation_flux(&self, corr: Correlation) -> c64 {
        match corr {
            Correlation::XX => c64::new(self.i + self.q, 0.0),
            Correlation::YY => c64::new(self.i - self.q, 0.0),
            Correlation::XY => c64::new(self.u, self.v),
            Correlation::YX => c64::new(self.u, -self.v),
        }
    }
}

/// Everything needed to simulate visibilities.
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub phase_centre: RADec,
    pub array_position: LatLngHeight,
    pub antennas: Vec<XyzGeodetic>,
    pub start: Epoch,
    pub num_timesteps: usize,
    pub time_res_s: f64,
    pub freqs_hz: Vec<f64>,
    pub correlations: Vec<Correlation>,
    pub sources: Vec<PointSource>,

    /// How many timesteps go into each buffer.
    pub timesteps_per_buffer: usize,

    /// Add autocorrelation rows?
    pub include_autos: bool,
}

/// Lay antennas out on a sunflower spiral out to `radius_m`. This gives a
/// reasonably uniform UV coverage.
pub fn spiral_layout(num_antennas: usize, radius_m: f64, latitude_rad: f64) -> Vec<XyzGeodetic> {
    let golden_angle = TAU * (1.0 - 1.0 / 1.618_033_988_749_895);
    let (s_lat, c_lat) = latitude_rad.sin_cos();
    (0..num_antennas)
        .map(|i| {
            let r = radius_m * ((i as f64 + 0.5) / num_antennas as f64).sqrt();
            let theta = i as f64 * golden_angle;
            let (e, n, h) = (r * theta.cos(), r * theta.sin(), 0.0);
            XyzGeodetic {
                x: -n * s_lat + h * c_lat,
                y: e,
                z: n * c_lat + h * s_lat,
            }
        })
        .collect()
}

/// Simulate visibilities, one buffer per group of timesteps. All buffers go
/// into a single chunk.
pub fn simulate(params: &SimulationParams) -> Result<Vec<Vec<VisibilityBuffer>>, VisError> {
    let SimulationParams {
        phase_centre,
        array_position,
        antennas,
        start,
        num_timesteps,
        time_res_s,
        freqs_hz,
        correlations,
        sources,
        timesteps_per_buffer,
        include_autos,
    } = params;
    if antennas.is_empty() {
        return Err(VisError::NoAntennas);
    }
    if *num_timesteps == 0 || freqs_hz.is_empty() || correlations.is_empty() {
        return Err(VisError::EmptySimulation);
    }

    let num_antennas = antennas.len();
    let mut pairs = vec![];
    for a1 in 0..num_antennas {
        if *include_autos {
            pairs.push((a1, a1));
        }
        for a2 in a1 + 1..num_antennas {
            pairs.push((a1, a2));
        }
    }
    let lmns: Vec<LMN> = sources
        .iter()
        .map(|s| s.radec.to_lmn(*phase_centre))
        .collect();

    let timesteps: Vec<usize> = (0..*num_timesteps).collect();
    let buffers = timesteps
        .chunks((*timesteps_per_buffer).max(1))
        .map(|group| {
            let mut timestamps = vec![];
            let mut uvws = vec![];
            let mut rows_pairs = vec![];
            for &t in group {
                let time = *start + Duration::from_seconds(t as f64 * time_res_s);
                let lst = get_lmst(array_position.longitude_rad, time, Duration::from_seconds(0.0));
                let cross_uvws = xyzs_to_cross_uvws(antennas, phase_centre.to_hadec(lst));
                let mut cross = cross_uvws.into_iter();
                for &(a1, a2) in &pairs {
                    let uvw = if a1 == a2 {
                        UVW::default()
                    } else {
                        cross.next().unwrap_or_default()
                    };
                    timestamps.push(time);
                    uvws.push(uvw);
                    rows_pairs.push((a1, a2));
                }
            }

            let mut vb = VisibilityBuffer::new(
                *phase_centre,
                timestamps,
                uvws,
                &rows_pairs,
                freqs_hz.clone(),
                correlations.clone(),
            );
            predict_point_sources(&mut vb, sources, &lmns);
            vb
        })
        .collect::<Vec<_>>();

    debug!(
        "Simulated {} buffers of {} rows",
        buffers.len(),
        buffers.first().map(|vb| vb.num_rows()).unwrap_or(0)
    );
    Ok(vec![buffers])
}

/// Put the visibilities of the point sources into the data cube of a buffer.
fn predict_point_sources(vb: &mut VisibilityBuffer, sources: &[PointSource], lmns: &[LMN]) {
    let uvws = &vb.uvws;
    let freqs = &vb.freqs_hz;
    let correlations = &vb.correlations;
    vb.data
        .outer_iter_mut()
        .into_par_iter()
        .zip(uvws.par_iter())
        .for_each(|(mut data_fc, uvw)| {
            for (mut data_c, &freq) in data_fc.outer_iter_mut().zip(freqs.iter()) {
                let UVW { u, v, w } = *uvw * freq / VEL_C;
                for (source, lmn) in sources.iter().zip(lmns) {
                    let phasor = cexp(-TAU * (u * lmn.l + v * lmn.m + w * (lmn.n - 1.0)));
                    for (vis, &corr) in data_c.iter_mut().zip(correlations.iter()) {
                        let contribution = source.correlation_flux(corr) * phasor;
                        *vis += c32::new(contribution.re as f32, contribution.im as f32);
                    }
                }
            }
        });
}
