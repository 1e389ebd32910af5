// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Simulate visibilities and image them.

use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

use crate::{
    image::{fits::write_image, ImageError, ImageGeometry},
    imager::{Imager, ImagerError, ImagingOptions},
    vis::{
        simulate::{simulate, SimulationParams},
        DataMode, MemoryVisSource, VisError, VisSelection,
    },
};

/// Parameters needed to make images of simulated visibilities.
pub(crate) struct ImageParams {
    /// What to observe.
    pub(crate) simulation: SimulationParams,

    pub(crate) geometry: ImageGeometry,

    pub(crate) options: ImagingOptions,

    /// Output files are named `<prefix>_<kind>.fits`.
    pub(crate) output_prefix: PathBuf,

    pub(crate) write_psf: bool,
}

impl ImageParams {
    /// Run the imager. Returns the paths of the written files.
    pub(crate) fn run(&self) -> Result<Vec<PathBuf>, ImageParamsError> {
        let ImageParams {
            simulation,
            geometry,
            options,
            output_prefix,
            write_psf,
        } = self;

        info!("Simulating {} point source(s)", simulation.sources.len());
        let mut source = MemoryVisSource::new(simulate(simulation)?, DataMode::ReadOnly)?;

        let mut imager = Imager::new();
        let num_rows =
            imager.select_data(&mut source, &VisSelection::default(), DataMode::ReadOnly)?;
        info!("Imaging {num_rows} rows");
        let index = imager.define_image(geometry.clone(), options.clone())?;
        if *write_psf {
            imager.run_major_cycle(true)?;
        }
        imager.run_major_cycle(false)?;
        imager.finish()?;

        let store = imager.image(index).ok_or(ImagerError::NoImages)?;
        let mut written = vec![];
        let file = output_file(output_prefix, "image");
        write_image(
            &file,
            &store.geometry,
            store.residual.view(),
            "JY/BEAM",
            Some(store.sumwt.view()),
        )?;
        written.push(file);
        if *write_psf {
            let file = output_file(output_prefix, "psf");
            write_image(&file, &store.geometry, store.psf.view(), "JY/BEAM", None)?;
            written.push(file);
        }
        if let Some(sensitivity) = store.sensitivity.as_ref() {
            let file = output_file(output_prefix, "sensitivity");
            write_image(&file, &store.geometry, sensitivity.view(), "", None)?;
            written.push(file);
        }

        for file in &written {
            info!("Wrote {}", file.display());
        }
        Ok(written)
    }
}

/// `<prefix>_<kind>.fits`
pub(crate) fn output_file(prefix: &Path, kind: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(format!("_{kind}.fits"));
    PathBuf::from(name)
}

#[derive(Error, Debug)]
pub(crate) enum ImageParamsError {
    #[error(transparent)]
    Imager(#[from] ImagerError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Vis(#[from] VisError),
}
