// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use marlu::RADec;
use ndarray::prelude::*;
use tempfile::TempDir;

use super::*;

fn geometry(nchan: usize) -> ImageGeometry {
    let spectral = if nchan == 1 {
        SpectralAxis::Mfs { ref_freq_hz: 150e6 }
    } else {
        SpectralAxis::Cube {
            freqs_hz: (0..nchan).map(|i| 150e6 + i as f64 * 1e6).collect(),
            width_hz: 1e6,
        }
    };
    ImageGeometry::new(
        RADec::from_degrees(10.0, -27.0),
        64,
        64,
        (1.0_f64 / 60.0).to_radians(),
        spectral,
        vec![Stokes::I, Stokes::V],
    )
    .unwrap()
}

#[test]
fn test_parse_stokes() {
    assert_eq!(parse_stokes("I").unwrap(), vec![Stokes::I]);
    assert_eq!(parse_stokes("IV").unwrap(), vec![Stokes::I, Stokes::V]);
    assert_eq!(parse_stokes("IQUV").unwrap().len(), 4);
    assert!(parse_stokes("").is_err());
    assert!(parse_stokes("VI").is_err());
    assert!(parse_stokes("II").is_err());
    assert!(parse_stokes("RR").is_err());
}

#[test]
fn test_odd_dimensions_are_rejected() {
    let result = ImageGeometry::new(
        RADec::from_degrees(0.0, 0.0),
        63,
        64,
        1e-3,
        SpectralAxis::Mfs { ref_freq_hz: 1e8 },
        vec![Stokes::I],
    );
    assert!(matches!(result, Err(ImageError::BadDimensions { .. })));
}

#[test]
fn test_channel_for_frequency() {
    let g = geometry(4);
    assert_eq!(g.spectral.channel_for(150e6), Some(0));
    assert_eq!(g.spectral.channel_for(151.4e6), Some(1));
    assert_eq!(g.spectral.channel_for(153.5e6), Some(3));
    assert_eq!(g.spectral.channel_for(149e6), None);
    assert_eq!(g.spectral.channel_for(160e6), None);

    let mfs = geometry(1);
    assert_eq!(mfs.spectral.channel_for(1e9), Some(0));
}

#[test]
fn test_lm_to_radec_inverts_to_lmn() {
    let tangent = RADec::from_degrees(30.0, -45.0);
    let source = RADec::from_degrees(33.0, -43.0);
    let lmn = source.to_lmn(tangent);
    let result = lm_to_radec(lmn.l, lmn.m, tangent);
    assert_abs_diff_eq!(result.ra, source.ra, epsilon = 1e-10);
    assert_abs_diff_eq!(result.dec, source.dec, epsilon = 1e-10);
}

#[test]
fn test_facets_tile_the_parent() {
    let g = geometry(1);
    let mut covered = Array2::<u8>::zeros((g.ny, g.nx));
    for fy in 0..2 {
        for fx in 0..2 {
            let (facet, region) = g.facet(2, fx, fy).unwrap();
            assert_eq!(facet.tangent, g.tangent);
            assert_eq!((facet.nx, facet.ny), (32, 32));
            covered
                .slice_mut(s![
                    region.y0..region.y0 + region.ny,
                    region.x0..region.x0 + region.nx
                ])
                .mapv_inplace(|c| c + 1);

            // The centre pixel of the facet is at the same place on the sky
            // as the corresponding parent pixel.
            let parent = g.pixel_to_radec(
                (region.x0 + region.nx / 2) as f64,
                (region.y0 + region.ny / 2) as f64,
            );
            let centre = facet.centre();
            assert_abs_diff_eq!(centre.ra, parent.ra, epsilon = 1e-12);
            assert_abs_diff_eq!(centre.dec, parent.dec, epsilon = 1e-12);
        }
    }
    assert!(covered.iter().all(|&c| c == 1));

    // The first facet is east (higher RA) of the tangent.
    let (facet, _) = g.facet(2, 0, 0).unwrap();
    assert!(facet.centre_lm.0 > 0.0);
    assert!(facet.centre_lm.1 < 0.0);
}

#[test]
fn test_bad_facets() {
    let g = geometry(1);
    assert!(g.facet(3, 0, 0).is_err());
    // 64 / 32 = 2 pixels is fine, but 64 / 64 = 1 is odd.
    assert!(g.facet(32, 0, 0).is_ok());
    assert!(matches!(
        g.facet(64, 0, 0),
        Err(ImageError::BadDimensions { .. })
    ));
}

#[test]
fn test_chunks_split_channels() {
    let g = geometry(5);
    let mut start = 0;
    let mut sizes = vec![];
    for i in 0..2 {
        let (chunk, region) = g.chunk(2, i).unwrap();
        assert_eq!(region.chan0, start);
        assert_eq!(chunk.num_chans(), region.nchan);
        assert_abs_diff_eq!(
            chunk.spectral.freqs_hz()[0],
            g.spectral.freqs_hz()[start]
        );
        start += region.nchan;
        sizes.push(region.nchan);
    }
    assert_eq!(sizes, vec![3, 2]);
    assert!(g.chunk(6, 0).is_err());
    assert!(g.chunk(2, 2).is_err());
}

#[test]
fn test_sub_store_and_paste_round_trip() {
    let g = geometry(2);
    let mut store = ImageStore::new(g.clone());
    store
        .residual
        .indexed_iter_mut()
        .for_each(|((c, p, y, x), v)| *v = (c * 1000 + p * 100 + y * 10 + x) as f32);
    store.sumwt.fill(3.0);
    let original = store.clone();

    let mut recomposed = ImageStore::new(g.clone());
    for fy in 0..2 {
        for fx in 0..2 {
            let (facet, region) = g.facet(2, fx, fy).unwrap();
            let part = store.sub_store(facet, &region);
            assert_eq!(part.residual.dim(), (2, 2, 32, 32));
            recomposed.paste(&part, &region);
        }
    }
    assert_eq!(recomposed.residual, original.residual);
    assert_eq!(recomposed.sumwt, original.sumwt);
    assert!(recomposed.sensitivity.is_none());
}

#[test]
fn test_facet_psf_is_centred() {
    let g = geometry(1);
    let mut store = ImageStore::new(g.clone());
    store.psf.fill(7.0);
    let (facet, region) = g.facet(2, 1, 0).unwrap();
    let mut part = store.sub_store(facet, &region);
    part.psf.fill(0.0);
    part.psf[(0, 0, 16, 16)] = 1.0;

    store.centre_psf_from(&part, &region);
    assert_eq!(store.psf[(0, 0, 32, 32)], 1.0);
    assert_abs_diff_eq!(store.psf.sum(), 1.0);
}

#[test]
fn test_add_to_model_checks_shape() {
    let mut store = ImageStore::new(geometry(1));
    let delta = Array4::from_elem(store.geometry.shape(), 0.5);
    store.add_to_model(delta.view()).unwrap();
    store.add_to_model(delta.view()).unwrap();
    assert_abs_diff_eq!(store.model[(0, 1, 3, 4)], 1.0);

    let bad = Array4::<f32>::zeros((1, 1, 2, 2));
    assert!(matches!(
        store.add_to_model(bad.view()),
        Err(ImageError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_fits_round_trip() {
    let tmp_dir = TempDir::new().unwrap();
    let file = tmp_dir.path().join("image.fits");
    let g = geometry(3);
    let image = Array4::from_shape_fn(g.shape(), |(c, p, y, x)| {
        c as f32 - p as f32 * 0.5 + (y * x) as f32 * 1e-3
    });
    let sumwt = Array2::from_elem((g.num_pols(), g.num_chans()), 12.0);

    fits::write_image(&file, &g, image.view(), "JY/BEAM", Some(sumwt.view())).unwrap();
    // Writing again replaces the file.
    fits::write_image(&file, &g, image.view(), "JY/BEAM", None).unwrap();
    let read = fits::read_image(&file, &g).unwrap();
    assert_abs_diff_eq!(read, image);

    let other = geometry(1);
    let result = fits::read_image(&file, &other);
    assert!(matches!(result, Err(ImageError::FitsDimensions { .. })));
}
