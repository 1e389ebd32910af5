// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Integration tests.
//!
//! Some help for laying out these tests was taken from:
//! https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod image;
mod no_stderr;

use std::{
    path::{Path, PathBuf},
    process::Output,
    str::from_utf8,
};

use assert_cmd::{output::OutputError, Command};

fn hyperimage() -> Command {
    Command::cargo_bin("hyperimage").unwrap()
}

fn get_cmd_output(result: Result<Output, OutputError>) -> (String, String) {
    let output = match result {
        Ok(o) => o,
        Err(o) => o.as_output().unwrap().clone(),
    };
    (
        from_utf8(&output.stdout).unwrap().to_string(),
        from_utf8(&output.stderr).unwrap().to_string(),
    )
}

/// Arguments for a small and quick image of a simulated 1 Jy source at the
/// phase centre. Outputs are written with the given prefix.
fn small_image_args(prefix: &Path) -> Vec<String> {
    [
        "image",
        "--size",
        "64",
        "--cell",
        "120",
        "--num-antennas",
        "12",
        "--array-radius",
        "200",
        "--num-timesteps",
        "2",
        "--no-progress-bars",
        "--output-prefix",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain(std::iter::once(prefix.display().to_string()))
    .collect()
}

fn output_file(prefix: &Path, kind: &str) -> PathBuf {
    PathBuf::from(format!("{}_{kind}.fits", prefix.display()))
}
