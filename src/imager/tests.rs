// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use hifitime::Epoch;
use marlu::{c32, LatLngHeight, RADec, UVW};
use ndarray::prelude::*;

use super::*;
use crate::{
    constants::{TAU, VEL_C},
    gridding::GridError,
    image::{ImageError, SpectralAxis, Stokes},
    vis::{
        simulate::{simulate, spiral_layout, PointSource, SimulationParams},
        Correlation, MemoryVisSource, VisError, VisibilityBuffer,
    },
};

const FREQ: f64 = 150e6;
const CELL: f64 = 1e-3;

fn phase_centre() -> RADec {
    RADec::from_degrees(0.0, -27.0)
}

fn geometry(n: usize, freqs_hz: &[f64]) -> ImageGeometry {
    let spectral = if freqs_hz.len() == 1 {
        SpectralAxis::Mfs {
            ref_freq_hz: freqs_hz[0],
        }
    } else {
        SpectralAxis::Cube {
            freqs_hz: freqs_hz.to_vec(),
            width_hz: freqs_hz[1] - freqs_hz[0],
        }
    };
    ImageGeometry::new(phase_centre(), n, n, CELL, spectral, vec![Stokes::I]).unwrap()
}

fn simulated_source(sources: Vec<PointSource>, freqs_hz: Vec<f64>, mode: DataMode) -> MemoryVisSource {
    let array_position = LatLngHeight::mwa();
    let params = SimulationParams {
        phase_centre: phase_centre(),
        array_position,
        antennas: spiral_layout(24, 150.0, array_position.latitude_rad),
        start: Epoch::from_gpst_seconds(1090008640.0),
        num_timesteps: 4,
        time_res_s: 60.0,
        freqs_hz,
        correlations: vec![Correlation::XX, Correlation::YY],
        sources,
        timesteps_per_buffer: 2,
        include_autos: false,
    };
    MemoryVisSource::new(simulate(&params).unwrap(), mode).unwrap()
}

fn centre_source(mode: DataMode) -> MemoryVisSource {
    simulated_source(
        vec![PointSource::unpolarised(phase_centre(), 1.0)],
        vec![FREQ],
        mode,
    )
}

/// Cleans each image once by putting the residual's peak into the model.
#[derive(Default)]
struct OneShot {
    calls: Vec<usize>,
}

impl Deconvolver for OneShot {
    fn deconvolve(
        &mut self,
        image: usize,
        residual: ArrayView4<f32>,
        psf: ArrayView4<f32>,
    ) -> Option<Array4<f32>> {
        if self.calls.contains(&image) {
            return None;
        }
        self.calls.push(image);
        let (index, peak) = residual
            .indexed_iter()
            .fold(((0, 0, 0, 0), f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        let psf_peak = psf.iter().copied().fold(f32::MIN, f32::max);
        let mut delta = Array4::zeros(residual.dim());
        delta[index] = peak / psf_peak;
        Some(delta)
    }
}

#[test]
fn test_calls_out_of_order_are_rejected() {
    let mut source = centre_source(DataMode::ReadOnly);
    let mut imager = Imager::new();
    let result = imager.define_image(geometry(64, &[FREQ]), ImagingOptions::default());
    assert!(matches!(result, Err(ImagerError::InvalidState { .. })));
    assert!(matches!(
        imager.run_major_cycle(false),
        Err(ImagerError::InvalidState { .. })
    ));

    imager
        .select_data(&mut source, &VisSelection::default(), DataMode::ReadOnly)
        .unwrap();
    assert_eq!(imager.state(), ImagerState::DefiningImages);
    assert!(matches!(
        imager.run_major_cycle(true),
        Err(ImagerError::NoImages)
    ));
    imager
        .define_image(geometry(64, &[FREQ]), ImagingOptions::default())
        .unwrap();
    imager.finish().unwrap();
    assert_eq!(imager.state(), ImagerState::Done);
    assert!(matches!(
        imager.run_major_cycle(true),
        Err(ImagerError::InvalidState { state: "done", .. })
    ));
}

#[test]
fn test_empty_selection_unlocks_the_source() {
    let mut source = centre_source(DataMode::ReadOnly);
    {
        let mut imager = Imager::new();
        let selection = VisSelection {
            spws: Some(vec![7]),
            ..Default::default()
        };
        let result = imager.select_data(&mut source, &selection, DataMode::ReadOnly);
        assert!(matches!(
            result,
            Err(ImagerError::Vis(VisError::InvalidSelection(_)))
        ));
        assert_eq!(imager.state(), ImagerState::Idle);
    }
    assert!(!source.is_locked());
    assert_eq!(source.num_locks_taken(), 1);
}

#[test]
fn test_mismatched_data_modes_fail_before_imaging() {
    let mut source = centre_source(DataMode::ReadOnly);
    {
        let mut imager = Imager::new();
        let result = imager.select_data(
            &mut source,
            &VisSelection::default(),
            DataMode::ScratchModelColumn,
        );
        assert!(matches!(
            result,
            Err(ImagerError::ConfigDataMode {
                opened: DataMode::ReadOnly,
                requested: DataMode::ScratchModelColumn,
            })
        ));
        assert_eq!(imager.state(), ImagerState::Idle);
    }
    assert!(!source.is_locked());
    assert_eq!(source.num_locks_taken(), 0);
}

#[test]
fn test_configuration_errors() {
    let mut source = centre_source(DataMode::ReadOnly);
    let mut imager = Imager::new();
    imager
        .select_data(&mut source, &VisSelection::default(), DataMode::ReadOnly)
        .unwrap();

    let bad = ImagingOptions {
        ftmachine: "nonsense".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        imager.define_image(geometry(64, &[FREQ]), bad),
        Err(ImagerError::Grid(GridError::InvalidFtMachine(_)))
    ));
    let bad = ImagingOptions {
        stokes: "QI".to_string(),
        ..Default::default()
    };
    assert!(matches!(
        imager.define_image(geometry(64, &[FREQ]), bad),
        Err(ImagerError::Image(ImageError::InvalidStokes(_)))
    ));
    let bad = ImagingOptions {
        facets: 2,
        chanchunks: 2,
        ..Default::default()
    };
    assert!(matches!(
        imager.define_image(geometry(64, &[FREQ, FREQ + 1e6]), bad),
        Err(ImagerError::ConfigFacetsAndChunks)
    ));
    let bad = ImagingOptions {
        chanchunks: 3,
        ..Default::default()
    };
    assert!(matches!(
        imager.define_image(geometry(64, &[FREQ, FREQ + 1e6]), bad),
        Err(ImagerError::ConfigTooManyChunks {
            chanchunks: 3,
            nchan: 2
        })
    ));
    let bad = ImagingOptions {
        datacolumn: DataColumn::Psf,
        ..Default::default()
    };
    assert!(matches!(
        imager.define_image(geometry(64, &[FREQ]), bad),
        Err(ImagerError::ConfigDataColumn(_))
    ));
    let bad = ImagingOptions {
        facets: 3,
        ..Default::default()
    };
    // 64 pixels don't split into 3 facets.
    assert!(matches!(
        imager.define_image(geometry(64, &[FREQ]), bad),
        Err(ImagerError::Image(ImageError::BadSplit { .. }))
    ));

    imager
        .define_image(geometry(64, &[FREQ]), ImagingOptions::default())
        .unwrap();
    let facetted = ImagingOptions {
        facets: 2,
        ..Default::default()
    };
    assert!(matches!(
        imager.define_image(geometry(64, &[FREQ]), facetted),
        Err(ImagerError::ConfigFacetNotFirst)
    ));
    let chunked = ImagingOptions {
        chanchunks: 2,
        ..Default::default()
    };
    assert!(matches!(
        imager.define_image(geometry(64, &[FREQ, FREQ + 1e6]), chunked),
        Err(ImagerError::ConfigChunksWithMultipleFields)
    ));

    imager
        .define_image(geometry(32, &[FREQ]), ImagingOptions::default())
        .unwrap();
    assert_eq!(imager.num_images(), 2);
    assert!(matches!(
        imager.run_major_cycle_by_mapper(true),
        Err(ImagerError::ConfigCycleOrder)
    ));
}

#[test]
fn test_options_from_json() {
    let options: ImagingOptions = serde_json::from_str(
        r#"{"ftmachine": "wprojectft", "wprojplanes": 16, "cycle_order": "by-mapper", "savemodel": "model-column", "datacolumn": "observed"}"#,
    )
    .unwrap();
    assert_eq!(options.wprojplanes, 16);
    assert_eq!(options.cycle_order, CycleOrder::ByMapper);
    assert_eq!(options.savemodel, SaveModel::ModelColumn);
    assert_eq!(options.datacolumn, DataColumn::Observed);
    assert_eq!(options.stokes, "I");
    assert_eq!(options.validate().unwrap(), GridKernelKind::WProjection);
    assert_eq!(options.ft_options().wprojplanes, 16);
}

/// A thousand unit visibilities filling a disk in the UV plane, with no w.
#[test]
fn test_uniform_disk_makes_a_unit_dirty_beam() {
    const N: usize = 1000;
    const RADIUS_LAMBDA: f64 = 200.0;
    let golden_angle = TAU * (1.0 - 1.0 / 1.618_033_988_749_895);
    let metres = VEL_C / FREQ;
    let uvws: Vec<UVW> = (0..N)
        .map(|i| {
            let r = RADIUS_LAMBDA * ((i as f64 + 0.5) / N as f64).sqrt();
            let theta = i as f64 * golden_angle;
            UVW {
                u: r * theta.cos() * metres,
                v: r * theta.sin() * metres,
                w: 0.0,
            }
        })
        .collect();
    let pairs: Vec<(usize, usize)> = (0..N).map(|i| (0, i + 1)).collect();
    let mut vb = VisibilityBuffer::new(
        phase_centre(),
        vec![Epoch::from_gpst_seconds(1090008640.0); N],
        uvws,
        &pairs,
        vec![FREQ],
        vec![Correlation::XX, Correlation::YY],
    );
    vb.data.fill(c32::new(1.0, 0.0));
    let mut source = MemoryVisSource::new(vec![vec![vb]], DataMode::ReadOnly).unwrap();

    let mut imager = Imager::new();
    imager
        .select_data(&mut source, &VisSelection::default(), DataMode::ReadOnly)
        .unwrap();
    imager
        .define_image(geometry(64, &[FREQ]), ImagingOptions::default())
        .unwrap();
    imager.run_major_cycle(false).unwrap();

    let store = imager.image(0).unwrap();
    assert_abs_diff_eq!(store.residual[(0, 0, 32, 32)], 1.0, epsilon = 1e-2);
    assert_abs_diff_eq!(store.sumwt[(0, 0)], N as f64, epsilon = N as f64 * 1e-2);
    let peak = store.residual.iter().copied().fold(f32::MIN, f32::max);
    assert_abs_diff_eq!(peak, store.residual[(0, 0, 32, 32)]);
}

#[test]
fn test_run_cleans_a_point_source_and_writes_the_model() {
    let mut source = centre_source(DataMode::ScratchModelColumn);
    {
        let mut imager = Imager::new();
        imager
            .select_data(
                &mut source,
                &VisSelection::default(),
                DataMode::ScratchModelColumn,
            )
            .unwrap();
        let options = ImagingOptions {
            savemodel: SaveModel::ModelColumn,
            ..Default::default()
        };
        imager.define_image(geometry(64, &[FREQ]), options).unwrap();

        let mut deconvolver = OneShot::default();
        let num_deconvolutions = imager.run(&mut deconvolver, 5).unwrap();
        assert_eq!(num_deconvolutions, 1);
        // The PSF, the dirty image, then the residual.
        assert_eq!(imager.num_cycles(), 3);
        assert_eq!(imager.state(), ImagerState::CycleStart);
        // The forward and reverse machines share one kernel.
        assert_eq!(imager.cache().num_builds(), 1);

        let store = imager.image(0).unwrap();
        assert_abs_diff_eq!(store.psf[(0, 0, 32, 32)], 1.0, epsilon = 1e-2);
        assert_abs_diff_eq!(store.model[(0, 0, 32, 32)], 1.0, epsilon = 2e-2);
        assert!(store.residual.iter().all(|v| v.abs() < 2e-2));
    }
    assert!(!source.is_locked());
    assert_eq!(source.num_locks_taken(), 4);
    let model = source.model_column(0, 0).unwrap();
    for v in model.iter() {
        assert_abs_diff_eq!(v.re, 1.0, epsilon = 2e-2);
        assert_abs_diff_eq!(v.im, 0.0, epsilon = 2e-2);
    }
}

#[test]
fn test_model_column_needs_scratch_mode() {
    let mut source = centre_source(DataMode::ReadOnly);
    {
        let mut imager = Imager::new();
        imager
            .select_data(&mut source, &VisSelection::default(), DataMode::ReadOnly)
            .unwrap();
        let options = ImagingOptions {
            savemodel: SaveModel::ModelColumn,
            ..Default::default()
        };
        imager.define_image(geometry(64, &[FREQ]), options).unwrap();
        imager.run_major_cycle(false).unwrap();
    }
    assert!(source.model_column(0, 0).is_none());
}

#[test]
fn test_virtual_model_is_saved() {
    let mut source = centre_source(DataMode::VirtualModel);
    {
        let mut imager = Imager::new();
        imager
            .select_data(&mut source, &VisSelection::default(), DataMode::VirtualModel)
            .unwrap();
        let options = ImagingOptions {
            ftmachine: "wprojectft".to_string(),
            wprojplanes: 4,
            savemodel: SaveModel::Virtual,
            ..Default::default()
        };
        imager.define_image(geometry(64, &[FREQ]), options).unwrap();
        imager.run_major_cycle(false).unwrap();
    }
    // Selecting, the cycle and saving the model each lock the source once.
    assert!(!source.is_locked());
    assert_eq!(source.num_locks_taken(), 3);
    let record = source.virtual_model(0).unwrap();
    assert_eq!(record.kernel, "wprojectft");
    assert_eq!((record.nx, record.ny), (64, 64));
    assert_eq!(record.stokes, "I");
    assert_abs_diff_eq!(record.dec_deg, -27.0, epsilon = 1e-9);
    assert_abs_diff_eq!(record.cell_arcsec, CELL.to_degrees() * 3600.0, epsilon = 1e-9);
}

#[test]
fn test_facets_recompose_into_the_parent() {
    let parent = geometry(64, &[FREQ]);
    let source_radec = parent.pixel_to_radec(48.0, 16.0);
    let mut source = simulated_source(
        vec![PointSource::unpolarised(source_radec, 1.0)],
        vec![FREQ],
        DataMode::ReadOnly,
    );
    let mut imager = Imager::new();
    imager
        .select_data(&mut source, &VisSelection::default(), DataMode::ReadOnly)
        .unwrap();
    let options = ImagingOptions {
        facets: 2,
        ..Default::default()
    };
    imager.define_image(parent, options).unwrap();
    assert_eq!(imager.mappers().len(), 4);
    assert_eq!(imager.image_mappers(0).len(), 4);
    let region = imager.mappers()[1].region();
    assert_eq!((region.x0, region.y0, region.nx, region.ny), (32, 0, 32, 32));

    imager.run_major_cycle(false).unwrap();
    let store = imager.image(0).unwrap();
    assert_eq!(store.residual.dim(), (1, 1, 64, 64));
    // The source is at the centre of the second facet.
    assert_abs_diff_eq!(store.residual[(0, 0, 16, 48)], 1.0, epsilon = 2e-2);
    assert_abs_diff_eq!(
        imager.mappers()[1].store().residual[(0, 0, 16, 16)],
        store.residual[(0, 0, 16, 48)]
    );
    assert!(store.sumwt[(0, 0)] > 0.0);
}

#[test]
fn test_faceted_psf_peaks_only_at_the_centre() {
    let mut source = centre_source(DataMode::ReadOnly);
    let mut imager = Imager::new();
    imager
        .select_data(&mut source, &VisSelection::default(), DataMode::ReadOnly)
        .unwrap();
    let options = ImagingOptions {
        facets: 2,
        ..Default::default()
    };
    imager.define_image(geometry(64, &[FREQ]), options).unwrap();

    let check = |psf: &Array4<f32>| {
        let (peak, _) = psf
            .indexed_iter()
            .fold(((0, 0, 0, 0), f32::MIN), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert_eq!(peak, (0, 0, 32, 32));
        assert_abs_diff_eq!(psf[(0, 0, 32, 32)], 1.0, epsilon = 1e-3);
        // Facet centres are not peaks.
        for (y, x) in [(16, 16), (16, 48), (48, 16), (48, 48)] {
            assert!(psf[(0, 0, y, x)] < 0.5, "{}", psf[(0, 0, y, x)]);
        }
        // Only one facet's worth of PSF is present.
        assert_eq!(psf[(0, 0, 0, 0)], 0.0);
        assert_eq!(psf[(0, 0, 63, 63)], 0.0);
        assert_eq!(psf[(0, 0, 8, 40)], 0.0);
    };

    imager.run_major_cycle(true).unwrap();
    check(&imager.image(0).unwrap().psf);
    // Residual cycles don't put the facets' PSFs back.
    imager.run_major_cycle(false).unwrap();
    check(&imager.image(0).unwrap().psf);
}

#[test]
fn test_channel_chunks_match_a_whole_cube() {
    let freqs: Vec<f64> = (0..4).map(|i| FREQ + i as f64 * 40e3).collect();
    let offset = geometry(64, &freqs).pixel_to_radec(30.0, 35.0);
    let sources = vec![
        PointSource::unpolarised(phase_centre(), 1.0),
        PointSource::unpolarised(offset, 0.5),
    ];

    let mut whole_source = simulated_source(sources.clone(), freqs.clone(), DataMode::ReadOnly);
    let mut whole = Imager::new();
    whole
        .select_data(&mut whole_source, &VisSelection::default(), DataMode::ReadOnly)
        .unwrap();
    whole
        .define_image(geometry(64, &freqs), ImagingOptions::default())
        .unwrap();
    whole.run_major_cycle(false).unwrap();

    let mut chunked_source = simulated_source(sources, freqs.clone(), DataMode::ReadOnly);
    let mut chunked = Imager::new();
    chunked
        .select_data(&mut chunked_source, &VisSelection::default(), DataMode::ReadOnly)
        .unwrap();
    let options = ImagingOptions {
        chanchunks: 2,
        cycle_order: CycleOrder::ByMapper,
        ..Default::default()
    };
    chunked.define_image(geometry(64, &freqs), options).unwrap();
    assert_eq!(chunked.mappers().len(), 2);
    assert_eq!(chunked.mappers()[1].region().chan0, 2);
    chunked.run_major_cycle(false).unwrap();

    let a = whole.image(0).unwrap();
    let b = chunked.image(0).unwrap();
    assert_abs_diff_eq!(a.residual, b.residual, epsilon = 1e-5);
    assert_abs_diff_eq!(a.sumwt, b.sumwt, epsilon = 1e-6);
    assert!(b.sumwt.iter().all(|&w| w > 0.0));
}

#[test]
fn test_grid_errors_carry_mapper_context() {
    let mut source = centre_source(DataMode::ReadOnly);
    {
        let mut imager = Imager::new();
        imager
            .select_data(&mut source, &VisSelection::default(), DataMode::ReadOnly)
            .unwrap();
        imager
            .define_image(geometry(8, &[FREQ]), ImagingOptions::default())
            .unwrap();
        let result = imager.run_major_cycle(true);
        match result {
            Err(ImagerError::Mapper {
                mapper: 0,
                wprojplanes: 1,
                source: GridError::DegenerateKernel(_),
                dec_deg,
                ..
            }) => assert_abs_diff_eq!(dec_deg, -27.0, epsilon = 1e-9),
            Err(e) => panic!("unexpected error: {e}"),
            Ok(()) => panic!("an 8 pixel image shouldn't be griddable"),
        }
        assert_eq!(imager.state(), ImagerState::CycleStart);
        assert!(imager.cache().is_empty());

        // Clearing the images allows new ones.
        imager.clear_images().unwrap();
        imager
            .define_image(geometry(64, &[FREQ]), ImagingOptions::default())
            .unwrap();
        imager.run_major_cycle(true).unwrap();
    }
    assert!(!source.is_locked());
}

#[test]
fn test_mosaic_images_have_sensitivity() {
    let mut source = centre_source(DataMode::ReadOnly);
    let mut imager = Imager::new();
    imager
        .select_data(&mut source, &VisSelection::default(), DataMode::ReadOnly)
        .unwrap();
    let options = ImagingOptions {
        ftmachine: "mosaicft".to_string(),
        ..Default::default()
    };
    imager.define_image(geometry(64, &[FREQ]), options).unwrap();
    imager.run_major_cycle(true).unwrap();
    let store = imager.image(0).unwrap();
    let sensitivity = store.sensitivity.as_ref().unwrap();
    assert_abs_diff_eq!(sensitivity[(0, 0, 32, 32)], 1.0, epsilon = 1e-4);
    let psf_peak = store.psf.iter().copied().fold(f32::MIN, f32::max);
    assert_abs_diff_eq!(store.psf[(0, 0, 32, 32)], psf_peak);
    assert!(store.sumwt[(0, 0)] > 0.0);
}
