// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mappers and the major-cycle driver.
//!
//! An [`Imager`] binds visibility sources, turns each defined image into one
//! or more [`Mapper`]s (one per facet or channel chunk), and runs major
//! cycles: every mapper predicts model visibilities, and every mapper grids
//! the residual (or PSF) visibilities. Between cycles, an external
//! [`Deconvolver`] turns residual images into model increments.

mod error;
mod major_cycle;
#[cfg(test)]
mod tests;

pub use error::ImagerError;

use std::{ops::Range, sync::Arc};

use log::{debug, info, warn};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{
    constants::{DEFAULT_CACHE_SIZE, DEFAULT_DISH_DIAMETER_M, DEFAULT_PADDING, DEFAULT_TILE_SIZE},
    gridding::{
        ConvFuncCache, DataColumn, FtMachine, FtOptions, GridError, GridKernelKind, TangentKey,
    },
    image::{parse_stokes, ImageGeometry, ImageStore, SubRegion},
    vis::{DataMode, VirtualModelRecord, VisSelection, VisSource},
};

/// Makes model increments from residual images. Deconvolution itself is not
/// the business of this crate.
pub trait Deconvolver {
    /// Get the model increment for image number `image`, or `None` if this
    /// image needs no more cleaning. Arrays are `(chan, pol, y, x)`.
    fn deconvolve(
        &mut self,
        image: usize,
        residual: ArrayView4<f32>,
        psf: ArrayView4<f32>,
    ) -> Option<Array4<f32>>;
}

/// The order of the loops of a major cycle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum CycleOrder {
    /// Read the visibilities once per cycle; every buffer visits every mapper.
    #[default]
    ByBuffer,

    /// Each mapper reads all of the visibilities itself.
    ByMapper,
}

/// Where predicted model visibilities go.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumIter, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SaveModel {
    #[default]
    None,

    /// Write model visibilities into the source's model column.
    ModelColumn,

    /// Store a description of the model with the source.
    Virtual,
}

/// Everything about how an image is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingOptions {
    /// The name of the FT machine, e.g. "wprojectft".
    pub ftmachine: String,

    pub wprojplanes: usize,
    pub padding: f64,
    pub use_double_precision: bool,

    /// The image is split into this many facets per side.
    pub facets: usize,

    /// The channels of the image are split into this many chunks.
    pub chanchunks: usize,

    /// The Stokes planes to make, e.g. "IQUV".
    pub stokes: String,

    /// Grids with more complex elements than this are tiled on disk.
    pub cache_size: usize,
    pub tile_size: usize,
    pub use_zero: bool,
    pub strict_support: bool,
    pub low_memory_kernels: bool,

    /// The dish diameter of primary-beam kernels \[metres\].
    pub dish_diameter_m: f64,

    /// Put the primary beam into A-W projection kernels?
    pub aterm: bool,

    pub cycle_order: CycleOrder,
    pub savemodel: SaveModel,

    /// "observed" or "corrected".
    pub datacolumn: DataColumn,
}

impl Default for ImagingOptions {
    fn default() -> Self {
        ImagingOptions {
            ftmachine: "gridft".to_string(),
            wprojplanes: 1,
            padding: DEFAULT_PADDING,
            use_double_precision: false,
            facets: 1,
            chanchunks: 1,
            stokes: "I".to_string(),
            cache_size: DEFAULT_CACHE_SIZE,
            tile_size: DEFAULT_TILE_SIZE,
            use_zero: false,
            strict_support: false,
            low_memory_kernels: false,
            dish_diameter_m: DEFAULT_DISH_DIAMETER_M,
            aterm: true,
            cycle_order: CycleOrder::ByBuffer,
            savemodel: SaveModel::None,
            datacolumn: DataColumn::Corrected,
        }
    }
}

impl ImagingOptions {
    pub fn kernel_kind(&self) -> Result<GridKernelKind, ImagerError> {
        Ok(GridKernelKind::from_name(
            &self.ftmachine,
            self.dish_diameter_m,
            self.aterm,
        )?)
    }

    pub fn ft_options(&self) -> FtOptions {
        FtOptions {
            wprojplanes: self.wprojplanes,
            padding: self.padding,
            use_double_precision: self.use_double_precision,
            cache_size: self.cache_size,
            tile_size: self.tile_size,
            use_zero: self.use_zero,
            strict_support: self.strict_support,
            low_memory_kernels: self.low_memory_kernels,
        }
    }

    /// Check everything that can be checked without knowing the image.
    pub fn validate(&self) -> Result<GridKernelKind, ImagerError> {
        let kind = self.kernel_kind()?;
        self.ft_options().validate()?;
        parse_stokes(&self.stokes)?;
        if self.facets == 0 {
            return Err(ImagerError::ConfigZero("facets"));
        }
        if self.chanchunks == 0 {
            return Err(ImagerError::ConfigZero("channel chunks"));
        }
        if self.facets > 1 && self.chanchunks > 1 {
            return Err(ImagerError::ConfigFacetsAndChunks);
        }
        if !matches!(self.datacolumn, DataColumn::Observed | DataColumn::Corrected) {
            return Err(ImagerError::ConfigDataColumn(self.datacolumn.to_string()));
        }
        if self.wprojplanes > 1 && !kind.uses_w_planes() {
            warn!(
                "The {} FT machine doesn't use w-planes; ignoring wprojplanes = {}",
                kind.name(),
                self.wprojplanes
            );
        }
        Ok(kind)
    }
}

/// One facet or channel chunk of an image, with its own FT machines.
pub struct Mapper {
    image: usize,
    region: SubRegion,
    store: ImageStore,

    /// Image -> visibilities.
    forward: FtMachine,

    /// Visibilities -> image.
    reverse: FtMachine,

    /// The number of w-planes of this mapper's kernels.
    wprojplanes: usize,
}

impl Mapper {
    /// The index of the image this mapper belongs to.
    pub fn image(&self) -> usize {
        self.image
    }

    /// Where this mapper sits in its image.
    pub fn region(&self) -> &SubRegion {
        &self.region
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn forward(&self) -> &FtMachine {
        &self.forward
    }

    pub fn reverse(&self) -> &FtMachine {
        &self.reverse
    }

    /// Every convolution function this mapper's machines have used.
    fn kernel_keys(&self) -> impl Iterator<Item = &TangentKey> {
        self.forward
            .kernel_keys()
            .iter()
            .chain(self.reverse.kernel_keys())
    }

    /// Wrap an error with this mapper's details.
    fn context(&self, index: usize, source: GridError) -> ImagerError {
        let tangent = self.store.geometry.tangent;
        ImagerError::Mapper {
            mapper: index,
            ra_deg: tangent.ra.to_degrees(),
            dec_deg: tangent.dec.to_degrees(),
            wprojplanes: self.wprojplanes,
            source,
        }
    }
}

/// A whole image, possibly made by several mappers.
struct LogicalImage {
    store: ImageStore,
    options: ImagingOptions,
    kind: GridKernelKind,
    mappers: Range<usize>,
}

/// Where the imager is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ImagerState {
    Idle,
    SelectingData,
    DefiningImages,
    CycleStart,
    Gridding,
    Finalizing,
    Normalizing,
    Done,
}

/// The major-cycle driver.
pub struct Imager<'a, S: VisSource> {
    state: ImagerState,
    sources: Vec<&'a mut S>,
    mode: DataMode,
    images: Vec<LogicalImage>,
    mappers: Vec<Mapper>,
    cache: Arc<ConvFuncCache>,
    num_cycles: usize,
}

impl<'a, S: VisSource> Default for Imager<'a, S> {
    fn default() -> Self {
        Imager::new()
    }
}

impl<'a, S: VisSource> Imager<'a, S> {
    pub fn new() -> Imager<'a, S> {
        Imager {
            state: ImagerState::Idle,
            sources: vec![],
            mode: DataMode::ReadOnly,
            images: vec![],
            mappers: vec![],
            cache: Arc::new(ConvFuncCache::new()),
            num_cycles: 0,
        }
    }

    pub fn state(&self) -> ImagerState {
        self.state
    }

    /// The convolution-function cache shared by all mappers.
    pub fn cache(&self) -> &ConvFuncCache {
        &self.cache
    }

    pub fn mappers(&self) -> &[Mapper] {
        &self.mappers
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    /// The (recomposed) images of image number `index`.
    pub fn image(&self, index: usize) -> Option<&ImageStore> {
        self.images.get(index).map(|i| &i.store)
    }

    /// The mappers of image number `index`.
    pub fn image_mappers(&self, index: usize) -> &[Mapper] {
        match self.images.get(index) {
            Some(image) => &self.mappers[image.mappers.clone()],
            None => &[],
        }
    }

    /// How many major cycles have completed?
    pub fn num_cycles(&self) -> usize {
        self.num_cycles
    }

    fn expect_state(
        &self,
        allowed: &[ImagerState],
        action: &'static str,
    ) -> Result<(), ImagerError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ImagerError::InvalidState {
                action,
                state: self.state.into(),
            })
        }
    }

    /// Bind a visibility source and apply a selection to it. Returns the
    /// number of selected rows. The source is locked only while the
    /// selection is made.
    pub fn select_data(
        &mut self,
        source: &'a mut S,
        selection: &VisSelection,
        mode: DataMode,
    ) -> Result<usize, ImagerError> {
        self.expect_state(
            &[ImagerState::Idle, ImagerState::DefiningImages],
            "select data",
        )?;
        if !self.images.is_empty() {
            return Err(ImagerError::InvalidState {
                action: "select data after defining images",
                state: self.state.into(),
            });
        }
        if source.mode() != mode {
            return Err(ImagerError::ConfigDataMode {
                opened: source.mode(),
                requested: mode,
            });
        }
        let previous = self.state;
        self.state = ImagerState::SelectingData;

        let result = select(source, selection);
        match result {
            Ok((source, num_rows)) => {
                self.sources.push(source);
                self.mode = mode;
                self.state = ImagerState::DefiningImages;
                Ok(num_rows)
            }
            Err(e) => {
                self.state = previous;
                Err(e)
            }
        }
    }

    /// Define an image. Returns the image's index.
    pub fn define_image(
        &mut self,
        geometry: ImageGeometry,
        options: ImagingOptions,
    ) -> Result<usize, ImagerError> {
        self.expect_state(&[ImagerState::DefiningImages], "define an image")?;
        let kind = options.validate()?;
        let stokes = parse_stokes(&options.stokes)?;
        let geometry = ImageGeometry { stokes, ..geometry };

        if options.facets > 1 && !self.images.is_empty() {
            return Err(ImagerError::ConfigFacetNotFirst);
        }
        if options.chanchunks > geometry.num_chans() {
            return Err(ImagerError::ConfigTooManyChunks {
                chanchunks: options.chanchunks,
                nchan: geometry.num_chans(),
            });
        }
        if (options.chanchunks > 1 && !self.images.is_empty())
            || self.images.iter().any(|i| i.options.chanchunks > 1)
        {
            return Err(ImagerError::ConfigChunksWithMultipleFields);
        }

        let parts = if options.facets > 1 {
            let mut parts = Vec::with_capacity(options.facets * options.facets);
            for fy in 0..options.facets {
                for fx in 0..options.facets {
                    parts.push(geometry.facet(options.facets, fx, fy)?);
                }
            }
            parts
        } else if options.chanchunks > 1 {
            (0..options.chanchunks)
                .map(|i| geometry.chunk(options.chanchunks, i))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            let region = SubRegion {
                x0: 0,
                y0: 0,
                chan0: 0,
                nx: geometry.nx,
                ny: geometry.ny,
                nchan: geometry.num_chans(),
            };
            vec![(geometry.clone(), region)]
        };

        let index = self.images.len();
        let store = ImageStore::new(geometry);
        let ft_options = options.ft_options();
        let first = self.mappers.len();
        for (part_geometry, region) in parts {
            let forward = FtMachine::new(
                kind,
                part_geometry.clone(),
                ft_options.clone(),
                Arc::clone(&self.cache),
            )?;
            let reverse = FtMachine::new(
                kind,
                part_geometry.clone(),
                ft_options.clone(),
                Arc::clone(&self.cache),
            )?;
            self.mappers.push(Mapper {
                image: index,
                store: store.sub_store(part_geometry, &region),
                region,
                forward,
                reverse,
                wprojplanes: if kind.uses_w_planes() {
                    options.wprojplanes
                } else {
                    1
                },
            });
        }
        let (nx_pad, ny_pad) = self.mappers[first].reverse.padded_shape();
        info!(
            "Image {index}: {}x{} pixels ({}x{} padded), {} channels, Stokes {}, {} with {} mapper(s)",
            store.geometry.nx,
            store.geometry.ny,
            nx_pad,
            ny_pad,
            store.geometry.num_chans(),
            store.geometry.stokes_string(),
            kind.name(),
            self.mappers.len() - first
        );
        self.images.push(LogicalImage {
            store,
            options,
            kind,
            mappers: first..self.mappers.len(),
        });
        Ok(index)
    }

    /// Forget all images, so that new ones can be defined. Convolution
    /// functions of the old images are dropped at the start of the next
    /// cycle.
    pub fn clear_images(&mut self) -> Result<(), ImagerError> {
        self.expect_state(
            &[ImagerState::DefiningImages, ImagerState::CycleStart],
            "clear images",
        )?;
        self.images.clear();
        self.mappers.clear();
        self.state = ImagerState::DefiningImages;
        Ok(())
    }

    /// Add to the model of an image.
    pub fn add_to_model(&mut self, image: usize, delta: ArrayView4<f32>) -> Result<(), ImagerError> {
        self.expect_state(
            &[ImagerState::DefiningImages, ImagerState::CycleStart],
            "change a model",
        )?;
        let image = self.images.get_mut(image).ok_or(ImagerError::NoImages)?;
        image.store.add_to_model(delta)?;
        Ok(())
    }

    /// Run a major cycle, making the PSF if `dopsf` is set, otherwise the
    /// residual images. Loops are ordered as the first image's options say.
    pub fn run_major_cycle(&mut self, dopsf: bool) -> Result<(), ImagerError> {
        match self.images.first().map(|i| i.options.cycle_order) {
            Some(CycleOrder::ByMapper) => self.run_major_cycle_by_mapper(dopsf),
            _ => self.run_major_cycle_by_buffer(dopsf),
        }
    }

    /// Run a major cycle in which every buffer visits every mapper.
    pub fn run_major_cycle_by_buffer(&mut self, dopsf: bool) -> Result<(), ImagerError> {
        self.cycle(dopsf, CycleOrder::ByBuffer)
    }

    /// Run a major cycle in which each mapper makes its own pass over the
    /// data. This is only allowed for a single mapper, or for the channel
    /// chunks of a single image.
    pub fn run_major_cycle_by_mapper(&mut self, dopsf: bool) -> Result<(), ImagerError> {
        if self.images.len() > 1 || self.images.iter().any(|i| i.options.facets > 1) {
            return Err(ImagerError::ConfigCycleOrder);
        }
        self.cycle(dopsf, CycleOrder::ByMapper)
    }

    fn cycle(&mut self, dopsf: bool, order: CycleOrder) -> Result<(), ImagerError> {
        self.expect_state(
            &[ImagerState::DefiningImages, ImagerState::CycleStart],
            "run a major cycle",
        )?;
        if self.mappers.is_empty() {
            return Err(ImagerError::NoImages);
        }

        // Drop kernels that no current mapper uses.
        let keys: Vec<TangentKey> = self
            .mappers
            .iter()
            .flat_map(|m| m.kernel_keys())
            .copied()
            .collect();
        self.cache.invalidate_except(&keys)?;
        self.push_models();

        let plan = self.plan(dopsf);
        let result = major_cycle::run(
            &mut self.mappers,
            &mut self.sources,
            &plan,
            order,
            &mut self.state,
        );
        if let Err(e) = result {
            for mapper in self.mappers.iter_mut() {
                mapper.forward.close();
                mapper.reverse.close();
            }
            self.state = ImagerState::CycleStart;
            return Err(e);
        }

        self.state = ImagerState::Normalizing;
        if !dopsf && plan.save_virtual_model {
            self.save_virtual_models()?;
        }
        self.recompose();
        self.num_cycles += 1;
        self.state = ImagerState::CycleStart;
        Ok(())
    }

    /// Work out what a cycle does.
    fn plan(&self, dopsf: bool) -> major_cycle::CyclePlan {
        let options = &self.images[0].options;
        let datacolumn = if options.datacolumn == DataColumn::Corrected
            && !self.sources.iter().all(|s| s.has_corrected())
        {
            warn!("No corrected data are available; imaging the observed data instead");
            DataColumn::Observed
        } else {
            options.datacolumn
        };
        let column = match (dopsf, datacolumn) {
            (true, _) => DataColumn::Psf,
            (false, DataColumn::Corrected) => DataColumn::CorrectedResidual,
            (false, _) => DataColumn::Residual,
        };

        let save_model_column = options.savemodel == SaveModel::ModelColumn
            && self.mode == DataMode::ScratchModelColumn;
        let save_virtual_model =
            options.savemodel == SaveModel::Virtual && self.mode == DataMode::VirtualModel;
        if options.savemodel != SaveModel::None && !(save_model_column || save_virtual_model) {
            warn!(
                "Not saving the model ({}); the data were selected {}",
                options.savemodel, self.mode
            );
        }
        major_cycle::CyclePlan {
            dopsf,
            column,
            save_model_column: save_model_column && !dopsf,
            save_virtual_model,
        }
    }

    /// Copy each image's model into its mappers.
    fn push_models(&mut self) {
        for mapper in self.mappers.iter_mut() {
            let r = &mapper.region;
            let parent = &self.images[mapper.image].store.model;
            mapper.store.model.assign(&parent.slice(s![
                r.chan0..r.chan0 + r.nchan,
                ..,
                r.y0..r.y0 + r.ny,
                r.x0..r.x0 + r.nx
            ]));
        }
    }

    /// Put the mappers' images back into their images. A faceted image takes
    /// its PSF from its first facet only.
    fn recompose(&mut self) {
        for mapper in self.mappers.iter() {
            self.images[mapper.image]
                .store
                .paste(&mapper.store, &mapper.region);
        }
        for image in self.images.iter_mut() {
            if image.options.facets > 1 {
                if let Some(facet) = self.mappers.get(image.mappers.start) {
                    image.store.centre_psf_from(&facet.store, &facet.region);
                }
            }
        }
    }

    fn save_virtual_models(&mut self) -> Result<(), ImagerError> {
        let image = &self.images[0];
        let geometry = &image.store.geometry;
        let centre = geometry.centre();
        let record = VirtualModelRecord {
            kernel: image.kind.name().to_string(),
            image: "image0".to_string(),
            ra_deg: centre.ra.to_degrees(),
            dec_deg: centre.dec.to_degrees(),
            nx: geometry.nx,
            ny: geometry.ny,
            cell_arcsec: geometry.cell_rad.to_degrees() * 3600.0,
            freqs_hz: geometry.spectral.freqs_hz(),
            stokes: geometry.stokes_string(),
        };
        for source in self.sources.iter_mut() {
            source.lock()?;
            let mut source = scopeguard::guard(&mut **source, |s| s.unlock());
            let mut fields: Vec<usize> = vec![];
            source.origin_chunks();
            while source.more_chunks() {
                source.origin();
                while source.more() {
                    if let Some(vb) = source.buffer() {
                        if !fields.contains(&vb.field) {
                            fields.push(vb.field);
                        }
                    }
                    source.next_buffer();
                }
                source.next_chunk();
            }
            for field in fields {
                source.save_virtual_model(field, &record)?;
            }
        }
        debug!("Saved virtual models");
        Ok(())
    }

    /// Make the PSF, then alternate between residual cycles and
    /// deconvolution until the deconvolver is done with every image or
    /// `max_cycles` deconvolutions have happened. Returns the number of
    /// deconvolutions.
    pub fn run<D: Deconvolver>(
        &mut self,
        deconvolver: &mut D,
        max_cycles: usize,
    ) -> Result<usize, ImagerError> {
        self.run_major_cycle(true)?;
        let mut num_deconvolutions = 0;
        loop {
            self.run_major_cycle(false)?;
            if num_deconvolutions == max_cycles {
                break;
            }
            let mut any = false;
            for (index, image) in self.images.iter_mut().enumerate() {
                if let Some(delta) =
                    deconvolver.deconvolve(index, image.store.residual.view(), image.store.psf.view())
                {
                    image.store.add_to_model(delta.view())?;
                    any = true;
                }
            }
            if !any {
                info!("Every image has converged");
                break;
            }
            num_deconvolutions += 1;
        }
        Ok(num_deconvolutions)
    }

    /// Stop imaging. Nothing but reading images is allowed afterwards.
    pub fn finish(&mut self) -> Result<(), ImagerError> {
        self.expect_state(
            &[ImagerState::DefiningImages, ImagerState::CycleStart],
            "finish",
        )?;
        self.cache.invalidate_except(&[])?;
        self.state = ImagerState::Done;
        Ok(())
    }
}

/// Lock a source, apply a selection and unlock it, even if the selection
/// fails.
fn select<'s, S: VisSource>(
    source: &'s mut S,
    selection: &VisSelection,
) -> Result<(&'s mut S, usize), ImagerError> {
    source.lock()?;
    let num_rows = {
        let mut guard = scopeguard::guard(&mut *source, |s| s.unlock());
        guard.select(selection)?
    };
    Ok((source, num_rows))
}
