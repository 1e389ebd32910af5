// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use approx::assert_abs_diff_eq;
use indoc::indoc;
use serial_test::serial;
use tempfile::{tempdir, Builder};

use super::*;
use crate::{
    gridding::GridKernelKind,
    image::{fits::read_image, Stokes},
    imager::SaveModel,
};

fn small_args(output_prefix: PathBuf) -> ImageArgs {
    ImageArgs {
        imaging_args: ImagingCliArgs {
            size: Some(64),
            cell: Some(120.0),
            output_prefix: Some(output_prefix),
            ..Default::default()
        },
        simulation_args: SimulationCliArgs {
            num_antennas: Some(12),
            array_radius: Some(200.0),
            num_timesteps: Some(2),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
#[serial]
fn test_defaults() {
    let params = ImageArgs::default().parse().unwrap();
    assert_eq!(params.geometry.nx, 256);
    assert_eq!(params.geometry.ny, 256);
    assert_abs_diff_eq!(params.geometry.cell_rad, (60.0_f64 / 3600.0).to_radians());
    assert_eq!(params.geometry.stokes, vec![Stokes::I]);
    assert_eq!(params.geometry.num_chans(), 1);
    assert_abs_diff_eq!(params.geometry.tangent.dec, (-27.0_f64).to_radians());
    assert_eq!(params.options.validate().unwrap(), GridKernelKind::Plain);
    assert_eq!(params.options.datacolumn, DataColumn::Observed);
    assert_eq!(params.options.savemodel, SaveModel::None);
    assert!(params.write_psf);
    assert_eq!(params.output_prefix, PathBuf::from("hyp"));

    let sim = &params.simulation;
    assert_eq!(sim.antennas.len(), 32);
    assert_eq!(sim.num_timesteps, 4);
    assert_eq!(sim.freqs_hz, vec![150e6]);
    assert_eq!(sim.correlations, vec![Correlation::XX, Correlation::YY]);
    assert_eq!(sim.sources.len(), 1);
    assert_abs_diff_eq!(sim.sources[0].i, 1.0);
    assert!(!sim.include_autos);
}

#[test]
#[serial]
fn test_cubes_and_chunks() {
    let mut args = ImageArgs::default();
    args.imaging_args.cube = true;
    args.imaging_args.chanchunks = Some(2);
    args.simulation_args.num_channels = Some(4);
    args.simulation_args.freq_res = Some(80.0);
    let params = args.parse().unwrap();
    assert_eq!(params.options.chanchunks, 2);
    let freqs = params.geometry.spectral.freqs_hz();
    assert_eq!(freqs.len(), 4);
    assert_abs_diff_eq!(freqs[1] - freqs[0], 80e3, epsilon = 1e-6);
    // The channels straddle the middle frequency.
    assert_abs_diff_eq!((freqs[1] + freqs[2]) / 2.0, 150e6, epsilon = 1e-6);

    // Without a cube, chunks are ignored.
    let mut args = ImageArgs::default();
    args.imaging_args.chanchunks = Some(2);
    args.simulation_args.num_channels = Some(4);
    let params = args.parse().unwrap();
    assert_eq!(params.options.chanchunks, 1);
    assert_eq!(params.geometry.num_chans(), 1);
}

#[test]
#[serial]
fn test_bad_arguments() {
    let mut args = ImageArgs::default();
    args.imaging_args.ra = Some(400.0);
    assert!(matches!(args.parse(), Err(ImageArgsError::RaInvalid)));

    let mut args = ImageArgs::default();
    args.imaging_args.dec = Some(-91.0);
    assert!(matches!(args.parse(), Err(ImageArgsError::DecInvalid)));

    let mut args = ImageArgs::default();
    args.simulation_args.point = Some(vec!["1.0,2.0".to_string()]);
    assert!(matches!(args.parse(), Err(ImageArgsError::BadPointSource(_))));

    let mut args = ImageArgs::default();
    args.simulation_args.num_antennas = Some(1);
    assert!(matches!(args.parse(), Err(ImageArgsError::TooFewAntennas(1))));

    let mut args = ImageArgs::default();
    args.simulation_args.array_position = Some(vec![1.0]);
    assert!(matches!(
        args.parse(),
        Err(ImageArgsError::BadArrayPosition { .. })
    ));

    let mut args = ImageArgs::default();
    args.imaging_args.cycle_order = Some("sideways".to_string());
    assert!(matches!(args.parse(), Err(ImageArgsError::BadCycleOrder(_))));

    let mut args = ImageArgs::default();
    args.imaging_args.size = Some(63);
    assert!(matches!(
        args.parse(),
        Err(ImageArgsError::Image(ImageError::BadDimensions { .. }))
    ));

    let mut args = ImageArgs::default();
    args.imaging_args.ftmachine = Some("fastft".to_string());
    let result = args.parse();
    assert!(matches!(result, Err(ImageArgsError::Imager(_))));
    // The CLI error points at the FT machine docs.
    let e = HyperimageError::from(result.err().unwrap());
    assert!(e.to_string().contains("ft_machines"));

    let mut args = ImageArgs::default();
    args.imaging_args.stokes = Some("VI".to_string());
    let e = HyperimageError::from(args.parse().err().unwrap());
    assert!(matches!(e, HyperimageError::ImageDefinition(_)));

    let mut args = ImageArgs::default();
    args.imaging_args.output_prefix = Some(PathBuf::from("/does/not/exist/hyp"));
    assert!(matches!(
        args.parse(),
        Err(ImageArgsError::OutputDirDoesntExist(_))
    ));
}

#[test]
fn test_point_sources_parse() {
    let source = parse_point_source("10.5, -30, 2.5").unwrap();
    assert_abs_diff_eq!(source.radec.ra, 10.5_f64.to_radians(), epsilon = 1e-12);
    assert_abs_diff_eq!(source.radec.dec, (-30.0_f64).to_radians(), epsilon = 1e-12);
    assert_abs_diff_eq!(source.i, 2.5);
    assert_abs_diff_eq!(source.q, 0.0);

    // RAs wrap.
    let source = parse_point_source("-10,0,1").unwrap();
    assert_abs_diff_eq!(source.radec.ra, 350.0_f64.to_radians(), epsilon = 1e-12);

    assert!(parse_point_source("1,2,3,4").is_err());
    assert!(parse_point_source("1,95,3").is_err());
    assert!(parse_point_source("a,b,c").is_err());
}

#[test]
fn test_merge_prefers_cli_arguments() {
    let mut arg_file = Builder::new().suffix(".toml").tempfile().unwrap();
    arg_file
        .write_all(
            indoc! {r#"
                [image]
                size = 64
                ftmachine = "wprojectft"
                wprojplanes = 8
                cube = true

                [simulation]
                num_antennas = 16
                point = ["0.0,-27.0,1.0", "0.5,-27.0,0.5"]
            "#}
            .as_bytes(),
        )
        .unwrap();

    let mut cli = ImageArgs {
        args_file: Some(arg_file.path().to_path_buf()),
        ..Default::default()
    };
    cli.imaging_args.size = Some(128);
    let merged = cli.merge().unwrap();
    assert!(merged.args_file.is_none());
    assert_eq!(merged.imaging_args.size, Some(128));
    assert_eq!(merged.imaging_args.ftmachine.as_deref(), Some("wprojectft"));
    assert_eq!(merged.imaging_args.wprojplanes, Some(8));
    assert!(merged.imaging_args.cube);
    assert_eq!(merged.simulation_args.num_antennas, Some(16));
    assert_eq!(merged.simulation_args.point.as_ref().map(|p| p.len()), Some(2));
}

#[test]
fn test_json_argument_files() {
    let mut arg_file = Builder::new().suffix(".json").tempfile().unwrap();
    arg_file
        .write_all(br#"{"image": {"stokes": "IV", "facets": 2}, "simulation": {"full_pol": true}}"#)
        .unwrap();
    let merged = ImageArgs {
        args_file: Some(arg_file.path().to_path_buf()),
        ..Default::default()
    }
    .merge()
    .unwrap();
    assert_eq!(merged.imaging_args.stokes.as_deref(), Some("IV"));
    assert_eq!(merged.imaging_args.facets, Some(2));
    assert!(merged.simulation_args.full_pol);
}

#[test]
fn test_unknown_argument_file_types_are_rejected() {
    let arg_file = Builder::new().suffix(".yaml").tempfile().unwrap();
    let result = ImageArgs {
        args_file: Some(arg_file.path().to_path_buf()),
        ..Default::default()
    }
    .merge();
    assert!(matches!(result, Err(HyperimageError::ArgFile(_))));
}

#[test]
fn test_arguments_survive_toml() {
    let mut args = small_args(PathBuf::from("out"));
    args.simulation_args.point = Some(vec!["0,-27,1".to_string()]);
    let toml_str = toml::to_string(&args).unwrap();
    let back: ImageArgs = toml::from_str(&toml_str).unwrap();
    assert_eq!(back.imaging_args.size, Some(64));
    assert_eq!(back.imaging_args.output_prefix, Some(PathBuf::from("out")));
    assert_eq!(back.simulation_args.point, args.simulation_args.point);
}

#[test]
#[serial]
fn test_run_writes_an_image_and_a_psf() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("test");
    let params = small_args(prefix.clone()).parse().unwrap();
    let written = params.run().unwrap();
    assert_eq!(
        written,
        vec![
            dir.path().join("test_image.fits"),
            dir.path().join("test_psf.fits")
        ]
    );

    let image = read_image(&written[0], &params.geometry).unwrap();
    assert_eq!(image.dim(), (1, 1, 64, 64));
    assert_abs_diff_eq!(image[(0, 0, 32, 32)], 1.0, epsilon = 2e-2);
    let psf = read_image(&written[1], &params.geometry).unwrap();
    assert_abs_diff_eq!(psf[(0, 0, 32, 32)], 1.0, epsilon = 2e-2);
}

#[test]
#[serial]
fn test_dry_run_writes_nothing() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("dry");
    small_args(prefix).run(true).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
