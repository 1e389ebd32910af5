// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The loops of a major cycle.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};
use marlu::c32;
use rayon::prelude::*;

use super::{CycleOrder, ImagerError, ImagerState, Mapper};
use crate::{
    gridding::{DataColumn, GridError},
    vis::{VisError, VisSource},
    PROGRESS_BARS,
};

/// What a major cycle does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct CyclePlan {
    pub(super) dopsf: bool,

    /// The column gridded into the images.
    pub(super) column: DataColumn,

    pub(super) save_model_column: bool,
    pub(super) save_virtual_model: bool,
}

fn progress_bar(num_rows: usize, message: &'static str) -> ProgressBar {
    ProgressBar::with_draw_target(
        Some(num_rows as _),
        if PROGRESS_BARS.load() {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg:17}: [{wide_bar:.blue}] {pos:2}/{len:2} rows ({elapsed_precise}<{eta_precise})")
            .unwrap()
            .progress_chars("=> "),
    )
    .with_position(0)
    .with_message(message)
}

/// Run one major cycle over all sources. On success, the mappers' stores hold
/// the new residual (or PSF) images and sums of weights.
pub(super) fn run<S: VisSource>(
    mappers: &mut [Mapper],
    sources: &mut [&mut S],
    plan: &CyclePlan,
    order: CycleOrder,
    state: &mut ImagerState,
) -> Result<(), ImagerError> {
    let num_rows: usize = sources.iter().map(|s| s.num_selected_rows()).sum();
    info!(
        "Major cycle ({}, {order}): {num_rows} rows into {} mapper(s)",
        if plan.dopsf { "PSF" } else { "residual" },
        mappers.len()
    );

    *state = ImagerState::Gridding;
    match order {
        CycleOrder::ByBuffer => {
            let progress = progress_bar(num_rows, if plan.dopsf { "Making PSF" } else { "Gridding" });
            by_buffer(mappers, sources, plan, &progress)?;
            progress.abandon_with_message("Finished gridding");

            *state = ImagerState::Finalizing;
            for (index, mapper) in mappers.iter_mut().enumerate() {
                close(mapper, plan.dopsf).map_err(|e| mapper.context(index, e))?;
            }
        }
        CycleOrder::ByMapper => {
            let num_mappers = mappers.len();
            for index in 0..num_mappers {
                let progress = progress_bar(num_rows, "Gridding mapper");
                by_mapper(mappers, index, sources, plan, &progress)?;
                progress.abandon_with_message("Finished mapper");
            }
        }
    }

    *state = ImagerState::Normalizing;
    mappers
        .par_iter_mut()
        .enumerate()
        .try_for_each(|(index, mapper)| normalise(mapper, plan.dopsf).map_err(|e| mapper.context(index, e)))
}

/// Every buffer visits every mapper: all mappers predict, the predictions are
/// summed, and then all mappers grid in parallel. The grids are left open.
fn by_buffer<S: VisSource>(
    mappers: &mut [Mapper],
    sources: &mut [&mut S],
    plan: &CyclePlan,
    progress: &ProgressBar,
) -> Result<(), ImagerError> {
    for (index, mapper) in mappers.iter_mut().enumerate() {
        open(mapper, plan.dopsf).map_err(|e| mapper.context(index, e))?;
    }

    for source in sources.iter_mut() {
        source.lock()?;
        let mut source = scopeguard::guard(&mut **source, |s| s.unlock());
        source.origin_chunks();
        while source.more_chunks() {
            source.origin();
            while source.more() {
                let vb = source.buffer_mut().ok_or(VisError::NoBuffer)?;
                let num_rows = vb.num_rows();
                if num_rows == 0 {
                    source.next_buffer();
                    continue;
                }

                if !plan.dopsf {
                    vb.model.fill(c32::default());
                    for (index, mapper) in mappers.iter_mut().enumerate() {
                        let prediction = mapper
                            .forward
                            .predict(vb, None)
                            .map_err(|e| mapper.context(index, e))?;
                        vb.model += &prediction;
                    }
                    if plan.save_model_column {
                        source.write_model_column()?;
                    }
                }

                let vb = source.buffer().ok_or(VisError::NoBuffer)?;
                mappers
                    .par_iter_mut()
                    .enumerate()
                    .try_for_each(|(index, mapper)| {
                        mapper
                            .reverse
                            .put(vb, None, plan.dopsf, plan.column)
                            .map_err(|e| mapper.context(index, e))
                    })?;
                progress.inc(num_rows as u64);
                source.next_buffer();
            }
            source.next_chunk();
        }
    }
    Ok(())
}

/// One mapper makes a whole pass over the data, subtracting only its own
/// prediction. The model column is written once the last mapper has added its
/// prediction.
fn by_mapper<S: VisSource>(
    mappers: &mut [Mapper],
    index: usize,
    sources: &mut [&mut S],
    plan: &CyclePlan,
    progress: &ProgressBar,
) -> Result<(), ImagerError> {
    let is_first = index == 0;
    let is_last = index + 1 == mappers.len();
    let mapper = &mut mappers[index];
    debug!("Mapper {index} is making its pass");
    open(mapper, plan.dopsf).map_err(|e| mapper.context(index, e))?;

    for source in sources.iter_mut() {
        source.lock()?;
        let mut source = scopeguard::guard(&mut **source, |s| s.unlock());
        source.origin_chunks();
        while source.more_chunks() {
            source.origin();
            while source.more() {
                let vb = source.buffer_mut().ok_or(VisError::NoBuffer)?;
                let num_rows = vb.num_rows();
                if num_rows == 0 {
                    source.next_buffer();
                    continue;
                }

                if !plan.dopsf {
                    if is_first {
                        vb.model.fill(c32::default());
                    }
                    let prediction = mapper
                        .forward
                        .predict(vb, None)
                        .map_err(|e| mapper.context(index, e))?;
                    vb.model += &prediction;
                    if plan.save_model_column && is_last {
                        source.write_model_column()?;
                    }
                }

                let vb = source.buffer().ok_or(VisError::NoBuffer)?;
                mapper
                    .reverse
                    .put(vb, None, plan.dopsf, plan.column)
                    .map_err(|e| mapper.context(index, e))?;
                progress.inc(num_rows as u64);
                source.next_buffer();
            }
            source.next_chunk();
        }
    }

    close(mapper, plan.dopsf).map_err(|e| mapper.context(index, e))
}

fn open(mapper: &mut Mapper, dopsf: bool) -> Result<(), GridError> {
    if !dopsf {
        mapper.forward.initialise_to_vis(mapper.store.model.view())?;
    }
    mapper.reverse.initialise_to_sky()
}

fn close(mapper: &mut Mapper, dopsf: bool) -> Result<(), GridError> {
    if !dopsf {
        mapper.forward.finalise_to_vis()?;
    }
    mapper.reverse.finalise_to_sky()
}

/// Turn a mapper's finished grid into its PSF or residual image.
fn normalise(mapper: &mut Mapper, dopsf: bool) -> Result<(), GridError> {
    let (image, sumwt) = mapper.reverse.get_image(true)?;
    if dopsf {
        mapper.store.psf = image;
    } else {
        mapper.store.residual = image;
    }
    mapper.store.sumwt = sumwt;
    mapper.store.sensitivity = mapper.reverse.sensitivity();
    Ok(())
}
