// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Tests to ensure there is no stderr output for successful commands.

use tempfile::TempDir;

use crate::{get_cmd_output, hyperimage, small_image_args};

#[test]
fn test_image_no_stderr() {
    let tmp_dir = TempDir::new().expect("couldn't make tmp dir");
    let prefix = tmp_dir.path().join("quiet");

    let cmd = hyperimage().args(small_image_args(&prefix)).ok();
    assert!(
        cmd.is_ok(),
        "image failed on simple simulated data: {}",
        cmd.err().unwrap()
    );
    let (_, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
}

#[test]
fn test_help_no_stderr() {
    let cmd = hyperimage().args(["image", "--help"]).ok();
    assert!(cmd.is_ok());
    let (stdout, stderr) = get_cmd_output(cmd);
    assert!(stderr.is_empty(), "stderr wasn't empty: {stderr}");
    assert!(stdout.contains("--wprojplanes"));
}
