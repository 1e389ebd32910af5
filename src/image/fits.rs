// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Write and read images as FITS files.
//!
//! Images are written with a SIN projection on the first two axes, then
//! frequency, then Stokes. The sum of weights goes into a second HDU named
//! "SUMWT".

use std::path::Path;

use fitsio::{
    errors::check_status as fits_check_status,
    hdu::HduInfo,
    images::{ImageDescription, ImageType},
    FitsFile,
};
use log::trace;
use ndarray::prelude::*;

use super::{ImageError, ImageGeometry, Stokes};

/// The FITS code of a Stokes parameter.
fn stokes_code(s: Stokes) -> i64 {
    match s {
        Stokes::I => 1,
        Stokes::Q => 2,
        Stokes::U => 3,
        Stokes::V => 4,
    }
}

/// Write an image cube (indexed `(chan, pol, y, x)`) to a new FITS file. Any
/// existing file is replaced. If `sumwt` is given, it is written into a
/// "SUMWT" HDU.
pub fn write_image(
    file: &Path,
    geometry: &ImageGeometry,
    image: ArrayView4<f32>,
    bunit: &str,
    sumwt: Option<ArrayView2<f64>>,
) -> Result<(), ImageError> {
    let shape = geometry.shape();
    if image.shape() != shape {
        return Err(ImageError::ShapeMismatch {
            expected: shape,
            actual: image.shape().to_vec(),
        });
    }
    if file.exists() {
        std::fs::remove_file(file)?;
    }

    let description = ImageDescription {
        data_type: ImageType::Float,
        dimensions: &shape,
    };
    let mut fptr = FitsFile::create(file)
        .with_custom_primary(&description)
        .open()?;
    let hdu = fptr.primary_hdu()?;

    // Write who made this file as a comment.
    unsafe {
        let mut status = 0;
        // ffpcom = fits_write_comment
        fitsio_sys::ffpcom(
            fptr.as_raw(),
            c"Gridded and imaged by hyperimage".as_ptr(),
            &mut status,
        );
        fits_check_status(status)?;
    }

    let (dx, dy) = geometry.increments();
    let (l, m) = geometry.centre_lm;
    // The tangent point isn't on the central pixel for facets.
    let crpix1 = (geometry.nx / 2) as f64 + 1.0 - l / dx;
    let crpix2 = (geometry.ny / 2) as f64 + 1.0 - m / dy;
    hdu.write_key(&mut fptr, "BUNIT", bunit)?;
    hdu.write_key(&mut fptr, "RADESYS", "ICRS")?;
    hdu.write_key(&mut fptr, "EQUINOX", 2000.0)?;
    hdu.write_key(&mut fptr, "CTYPE1", "RA---SIN")?;
    hdu.write_key(&mut fptr, "CRVAL1", geometry.tangent.ra.to_degrees())?;
    hdu.write_key(&mut fptr, "CDELT1", dx.to_degrees())?;
    hdu.write_key(&mut fptr, "CRPIX1", crpix1)?;
    hdu.write_key(&mut fptr, "CUNIT1", "deg")?;
    hdu.write_key(&mut fptr, "CTYPE2", "DEC--SIN")?;
    hdu.write_key(&mut fptr, "CRVAL2", geometry.tangent.dec.to_degrees())?;
    hdu.write_key(&mut fptr, "CDELT2", dy.to_degrees())?;
    hdu.write_key(&mut fptr, "CRPIX2", crpix2)?;
    hdu.write_key(&mut fptr, "CUNIT2", "deg")?;

    let freqs = geometry.spectral.freqs_hz();
    let freq_delta = match freqs.as_slice() {
        [f1, f2, ..] => f2 - f1,
        _ => geometry.spectral.width_hz(),
    };
    hdu.write_key(&mut fptr, "CTYPE3", "FREQ")?;
    hdu.write_key(&mut fptr, "CRVAL3", freqs.first().copied().unwrap_or_default())?;
    hdu.write_key(&mut fptr, "CDELT3", freq_delta)?;
    hdu.write_key(&mut fptr, "CRPIX3", 1.0)?;
    hdu.write_key(&mut fptr, "CUNIT3", "Hz")?;

    let stokes_delta = match geometry.stokes.as_slice() {
        [s1, s2, ..] => stokes_code(*s2) - stokes_code(*s1),
        _ => 1,
    };
    hdu.write_key(&mut fptr, "CTYPE4", "STOKES")?;
    hdu.write_key(&mut fptr, "CRVAL4", stokes_code(geometry.stokes[0]))?;
    hdu.write_key(&mut fptr, "CDELT4", stokes_delta)?;
    hdu.write_key(&mut fptr, "CRPIX4", 1.0)?;
    // CDELT4 can't describe selections like "IQV", so write them out too.
    hdu.write_key(&mut fptr, "STOKES", geometry.stokes_string())?;

    hdu.write_key(
        &mut fptr,
        "SOFTWARE",
        format!(
            "Created by {} v{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
    )?;

    let data = image.as_standard_layout();
    hdu.write_image(&mut fptr, data.as_slice().unwrap_or_default())?;

    if let Some(sumwt) = sumwt {
        let dim = [sumwt.nrows(), sumwt.ncols()];
        let description = ImageDescription {
            data_type: ImageType::Double,
            dimensions: &dim,
        };
        let hdu = fptr.create_image("SUMWT", &description)?;
        let sumwt = sumwt.as_standard_layout();
        hdu.write_image(&mut fptr, sumwt.as_slice().unwrap_or_default())?;
    }
    trace!("Wrote {}", file.display());

    Ok(())
}

/// Read the primary image of a FITS file, checking that it has the shape of
/// `geometry`.
pub fn read_image(file: &Path, geometry: &ImageGeometry) -> Result<Array4<f32>, ImageError> {
    let mut fptr = FitsFile::open(file)?;
    let hdu = fptr.primary_hdu()?;
    let expected = geometry.shape();
    let actual = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => vec![],
    };
    if actual != expected {
        return Err(ImageError::FitsDimensions {
            file: file.to_path_buf(),
            expected: expected.to_vec(),
            actual,
        });
    }
    let data: Vec<f32> = hdu.read_image(&mut fptr)?;
    Array4::from_shape_vec(expected, data).map_err(|_| ImageError::FitsDimensions {
        file: file.to_path_buf(),
        expected: expected.to_vec(),
        actual: vec![],
    })
}
