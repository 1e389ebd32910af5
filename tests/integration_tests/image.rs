// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests of the image subcommand.

use approx::assert_abs_diff_eq;
use marlu::RADec;
use tempfile::TempDir;

use mwa_hyperimage::{
    image::{fits::read_image, parse_stokes},
    ImageGeometry, SpectralAxis,
};

use crate::{get_cmd_output, hyperimage, output_file, small_image_args};

fn small_geometry(stokes: &str) -> ImageGeometry {
    ImageGeometry::new(
        RADec::from_degrees(0.0, -27.0),
        64,
        64,
        (120.0_f64 / 3600.0).to_radians(),
        SpectralAxis::Mfs { ref_freq_hz: 150e6 },
        parse_stokes(stokes).unwrap(),
    )
    .unwrap()
}

#[test]
fn test_image_of_a_centred_source() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let prefix = tmp_dir.path().join("centre");

    let cmd = hyperimage().args(small_image_args(&prefix)).ok();
    assert!(cmd.is_ok(), "image failed: {}", cmd.err().unwrap());

    let image = read_image(&output_file(&prefix, "image"), &small_geometry("I")).unwrap();
    assert_abs_diff_eq!(image[(0, 0, 32, 32)], 1.0, epsilon = 2e-2);
    let psf = read_image(&output_file(&prefix, "psf"), &small_geometry("I")).unwrap();
    assert_abs_diff_eq!(psf[(0, 0, 32, 32)], 1.0, epsilon = 2e-2);
    assert!(!output_file(&prefix, "sensitivity").exists());
}

#[test]
fn test_w_projection_and_full_polarisation() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let prefix = tmp_dir.path().join("wproj");

    let mut args = small_image_args(&prefix);
    args.extend(
        [
            "--ftmachine",
            "wprojectft",
            "--wprojplanes",
            "8",
            "--stokes",
            "IQUV",
            "--full-pol",
            "--no-psf",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    let cmd = hyperimage().args(args).ok();
    assert!(cmd.is_ok(), "image failed: {}", cmd.err().unwrap());

    let image = read_image(&output_file(&prefix, "image"), &small_geometry("IQUV")).unwrap();
    assert_eq!(image.dim(), (1, 4, 64, 64));
    assert_abs_diff_eq!(image[(0, 0, 32, 32)], 1.0, epsilon = 2e-2);
    for pol in 1..4 {
        assert_abs_diff_eq!(image[(0, pol, 32, 32)], 0.0, epsilon = 2e-2);
    }
    assert!(!output_file(&prefix, "psf").exists());
}

#[test]
fn test_mosaic_writes_sensitivity() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let prefix = tmp_dir.path().join("mosaic");

    let mut args = small_image_args(&prefix);
    args.extend(["--ftmachine".to_string(), "mosaicft".to_string()]);
    let cmd = hyperimage().args(args).ok();
    assert!(cmd.is_ok(), "image failed: {}", cmd.err().unwrap());

    let sensitivity =
        read_image(&output_file(&prefix, "sensitivity"), &small_geometry("I")).unwrap();
    assert_abs_diff_eq!(sensitivity[(0, 0, 32, 32)], 1.0, epsilon = 1e-4);
}

#[test]
fn test_dry_run_writes_nothing() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let prefix = tmp_dir.path().join("dry");

    let mut args = small_image_args(&prefix);
    args.push("--dry-run".to_string());
    let cmd = hyperimage().args(args).ok();
    assert!(cmd.is_ok(), "dry run failed: {}", cmd.err().unwrap());
    assert_eq!(std::fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
}

#[test]
fn test_saved_toml_reproduces_a_run() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let prefix = tmp_dir.path().join("first");
    let toml = tmp_dir.path().join("args.toml");

    let mut args = small_image_args(&prefix);
    args.extend([
        "--dry-run".to_string(),
        "--save-toml".to_string(),
        toml.display().to_string(),
    ]);
    let cmd = hyperimage().args(args).ok();
    assert!(cmd.is_ok(), "saving toml failed: {}", cmd.err().unwrap());
    let contents = std::fs::read_to_string(&toml).unwrap();
    assert!(contents.contains("size = 64"), "{contents}");

    // Run from the file alone.
    let cmd = hyperimage()
        .args(["image", &toml.display().to_string(), "--no-progress-bars"])
        .ok();
    assert!(cmd.is_ok(), "running from toml failed: {}", cmd.err().unwrap());
    assert!(output_file(&prefix, "image").exists());
}

#[test]
fn test_bad_ft_machine_fails_with_help() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let prefix = tmp_dir.path().join("bad");

    let mut args = small_image_args(&prefix);
    args.extend(["--ftmachine".to_string(), "fastft".to_string()]);
    let cmd = hyperimage().args(args).ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.starts_with("Error: "), "{stderr}");
    assert!(stderr.contains("fastft"), "{stderr}");
    assert!(stderr.contains("ft_machines"), "{stderr}");
}

#[test]
fn test_unknown_argument_file_type_fails() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let arg_file = tmp_dir.path().join("args.yaml");
    std::fs::write(&arg_file, "size: 64\n").unwrap();

    let cmd = hyperimage()
        .args(["image", &arg_file.display().to_string()])
        .ok();
    assert!(cmd.is_err());
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.contains("arg_file"), "{stderr}");
}
