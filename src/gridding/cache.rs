// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A cache of convolution functions, keyed by the direction they were made
//! for.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use log::trace;
use marlu::RADec;

use super::{ConvolutionFunction, GridError};

/// Identifies a convolution function: a direction (a tangent point, or a
/// pointing centre for primary-beam kernels) and a fingerprint of everything
/// else that went into the kernels. Coordinates are rounded to 1e-9 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TangentKey {
    ra_nano_deg: i64,
    dec_nano_deg: i64,
    image_fingerprint: u64,
}

impl TangentKey {
    pub fn new(direction: RADec, image_fingerprint: u64) -> TangentKey {
        TangentKey {
            ra_nano_deg: (direction.ra.to_degrees() * 1e9).round() as i64,
            dec_nano_deg: (direction.dec.to_degrees() * 1e9).round() as i64,
            image_fingerprint,
        }
    }

    pub fn ra_deg(&self) -> f64 {
        self.ra_nano_deg as f64 / 1e9
    }

    pub fn dec_deg(&self) -> f64 {
        self.dec_nano_deg as f64 / 1e9
    }

    pub fn image_fingerprint(&self) -> u64 {
        self.image_fingerprint
    }
}

/// Convolution functions shared between FT machines. Lookups only take a
/// read lock; kernels are built outside of any lock.
#[derive(Debug, Default)]
pub struct ConvFuncCache {
    kernels: RwLock<HashMap<TangentKey, Arc<ConvolutionFunction>>>,
    num_builds: AtomicUsize,
}

impl ConvFuncCache {
    pub fn new() -> ConvFuncCache {
        ConvFuncCache::default()
    }

    /// Get the convolution function for `key`, running `build` if it isn't
    /// cached. Nothing is cached if `build` fails.
    pub fn find<F>(&self, key: TangentKey, build: F) -> Result<Arc<ConvolutionFunction>, GridError>
    where
        F: FnOnce() -> Result<ConvolutionFunction, GridError>,
    {
        {
            let kernels = self.kernels.read().map_err(|_| GridError::CachePoisoned)?;
            if let Some(cf) = kernels.get(&key) {
                return Ok(Arc::clone(cf));
            }
        }

        let cf = Arc::new(build()?);
        self.num_builds.fetch_add(1, Ordering::Relaxed);
        trace!(
            "Cached a convolution function for ({:.4}°, {:.4}°)",
            key.ra_deg(),
            key.dec_deg()
        );
        let mut kernels = self.kernels.write().map_err(|_| GridError::CachePoisoned)?;
        // Another thread may have beaten us to it; keep whichever came first.
        Ok(Arc::clone(kernels.entry(key).or_insert(cf)))
    }

    pub fn contains(&self, key: &TangentKey) -> bool {
        self.kernels
            .read()
            .map(|kernels| kernels.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.kernels.read().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many convolution functions have been built through this cache?
    pub fn num_builds(&self) -> usize {
        self.num_builds.load(Ordering::Relaxed)
    }

    /// Drop every convolution function not belonging to `keep`.
    pub fn invalidate_except(&self, keep: &[TangentKey]) -> Result<(), GridError> {
        let mut kernels = self.kernels.write().map_err(|_| GridError::CachePoisoned)?;
        let before = kernels.len();
        kernels.retain(|key, _| keep.contains(key));
        trace!("Invalidated {} convolution functions", before - kernels.len());
        Ok(())
    }
}
