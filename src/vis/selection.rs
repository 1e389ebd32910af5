// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Selecting a subset of visibilities.

use itertools::Itertools;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use super::VisibilityBuffer;
use crate::constants::VEL_C;

/// Which visibilities to image. Anything left as `None` (or empty) selects
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisSelection {
    /// Spectral windows to keep.
    pub spws: Option<Vec<usize>>,

    /// Fields to keep.
    pub fields: Option<Vec<usize>>,

    /// A half-open range of channel indices to keep.
    pub channels: Option<(usize, usize)>,

    /// Keep rows whose UV distance is within this range \[wavelengths\].
    pub uv_range_lambda: Option<(f64, f64)>,

    /// Rows involving these antennas are discarded.
    #[serde(default)]
    pub exclude_antennas: Vec<usize>,
}

impl VisSelection {
    /// Apply this selection to a buffer. `None` is returned if nothing in the
    /// buffer is selected.
    pub fn apply(&self, vb: &VisibilityBuffer) -> Option<VisibilityBuffer> {
        if let Some(spws) = self.spws.as_ref() {
            if !spws.contains(&vb.spw) {
                return None;
            }
        }
        if let Some(fields) = self.fields.as_ref() {
            if !fields.contains(&vb.field) {
                return None;
            }
        }

        let chans: Vec<usize> = match self.channels {
            Some((start, end)) => (start..end.min(vb.num_chans())).collect(),
            None => (0..vb.num_chans()).collect(),
        };
        if chans.is_empty() {
            return None;
        }

        // UV cuts use the middle of the selected band.
        let mid_freq = {
            let first = vb.freqs_hz[chans[0]];
            let last = vb.freqs_hz[chans[chans.len() - 1]];
            (first + last) / 2.0
        };
        let rows = (0..vb.num_rows())
            .filter(|&row| {
                !self.exclude_antennas.contains(&vb.ant1[row])
                    && !self.exclude_antennas.contains(&vb.ant2[row])
            })
            .filter(|&row| match self.uv_range_lambda {
                Some((min, max)) => {
                    let uvw = vb.uvws[row];
                    let uv_dist = (uvw.u * uvw.u + uvw.v * uvw.v).sqrt() * mid_freq / VEL_C;
                    (min..=max).contains(&uv_dist)
                }
                None => true,
            })
            .collect_vec();
        if rows.is_empty() {
            return None;
        }

        let select_cube = |cube: &Array3<_>| cube.select(Axis(0), &rows).select(Axis(1), &chans);
        let mut out = vb.clone();
        out.timestamps = rows.iter().map(|&r| vb.timestamps[r]).collect();
        out.uvws = rows.iter().map(|&r| vb.uvws[r]).collect();
        out.ant1 = rows.iter().map(|&r| vb.ant1[r]).collect();
        out.ant2 = rows.iter().map(|&r| vb.ant2[r]).collect();
        out.flag_row = rows.iter().map(|&r| vb.flag_row[r]).collect();
        out.freqs_hz = chans.iter().map(|&c| vb.freqs_hz[c]).collect();
        out.flags = vb.flags.select(Axis(0), &rows).select(Axis(1), &chans);
        out.weights = vb.weights.select(Axis(0), &rows).select(Axis(1), &chans);
        out.data = select_cube(&vb.data);
        out.corrected = vb.corrected.as_ref().map(select_cube);
        out.model = select_cube(&vb.model);
        Some(out)
    }

    /// A short, human-readable description of this selection.
    pub fn describe(&self) -> String {
        let mut parts = vec![];
        if let Some(spws) = self.spws.as_ref() {
            parts.push(format!("spws {spws:?}"));
        }
        if let Some(fields) = self.fields.as_ref() {
            parts.push(format!("fields {fields:?}"));
        }
        if let Some((start, end)) = self.channels {
            parts.push(format!("channels {start}..{end}"));
        }
        if let Some((min, max)) = self.uv_range_lambda {
            parts.push(format!("uv range {min}..{max} lambda"));
        }
        if !self.exclude_antennas.is_empty() {
            parts.push(format!("excluding antennas {:?}", self.exclude_antennas));
        }
        if parts.is_empty() {
            "everything".to_string()
        } else {
            parts.join(", ")
        }
    }
}
