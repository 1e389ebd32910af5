// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use hifitime::Epoch;
use marlu::{LatLngHeight, RADec, UVW};

use super::{simulate::*, *};

fn simple_buffer() -> VisibilityBuffer {
    let uvws = vec![
        UVW { u: 10.0, v: 0.0, w: 0.0 },
        UVW { u: 0.0, v: 20.0, w: 1.0 },
        UVW { u: 100.0, v: 100.0, w: 0.0 },
    ];
    let n = uvws.len();
    VisibilityBuffer::new(
        RADec::from_degrees(0.0, -27.0),
        vec![Epoch::from_gpst_seconds(1090008640.0); n],
        uvws,
        &[(0, 1), (0, 2), (1, 2)],
        vec![150e6, 151e6, 152e6, 153e6],
        vec![Correlation::XX, Correlation::YY],
    )
}

#[test]
fn test_new_buffer_is_valid() {
    let vb = simple_buffer();
    assert!(vb.validate().is_ok());
    assert_eq!(vb.num_rows(), 3);
    assert_eq!(vb.num_chans(), 4);
    assert_eq!(vb.correlation_index(Correlation::YY), Some(1));
    assert_eq!(vb.correlation_index(Correlation::XY), None);
}

#[test]
fn test_bad_shapes_are_caught() {
    let mut vb = simple_buffer();
    vb.flag_row.pop();
    assert!(matches!(vb.validate(), Err(VisError::BadShape(_))));

    let mut vb = simple_buffer();
    vb.weights = ndarray::Array2::ones((3, 2));
    assert!(matches!(vb.validate(), Err(VisError::BadShape(_))));
}

#[test]
fn test_selection_of_channels_and_antennas() {
    let vb = simple_buffer();
    let selection = VisSelection {
        channels: Some((1, 3)),
        exclude_antennas: vec![2],
        ..Default::default()
    };
    let selected = selection.apply(&vb).unwrap();
    assert_eq!(selected.num_rows(), 1);
    assert_eq!(selected.freqs_hz, vec![151e6, 152e6]);
    assert_eq!(selected.data.dim(), (1, 2, 2));
    assert!(selected.validate().is_ok());
}

#[test]
fn test_selection_of_uv_range() {
    let vb = simple_buffer();
    // At ~151.5 MHz, 10 m is ~5 lambda and 20 m is ~10 lambda.
    let selection = VisSelection {
        uv_range_lambda: Some((6.0, 20.0)),
        ..Default::default()
    };
    let selected = selection.apply(&vb).unwrap();
    assert_eq!(selected.num_rows(), 1);
    assert_abs_diff_eq!(selected.uvws[0].v, 20.0);
}

#[test]
fn test_empty_selection_is_an_error() {
    let mut source =
        MemoryVisSource::new(vec![vec![simple_buffer()]], DataMode::ReadOnly).unwrap();
    let selection = VisSelection {
        spws: Some(vec![3]),
        ..Default::default()
    };
    let result = source.select(&selection);
    assert!(matches!(result, Err(VisError::InvalidSelection(_))));

    // A good selection still works afterwards.
    let num_rows = source.select(&VisSelection::default()).unwrap();
    assert_eq!(num_rows, 3);
}

#[test]
fn test_memory_source_iteration() {
    let chunks = vec![
        vec![simple_buffer(), simple_buffer()],
        vec![simple_buffer()],
    ];
    let mut source = MemoryVisSource::new(chunks, DataMode::ReadOnly).unwrap();
    let mut num_buffers = 0;
    let mut num_chunks = 0;
    source.origin_chunks();
    while source.more_chunks() {
        source.origin();
        while source.more() {
            assert!(source.buffer().is_some());
            num_buffers += 1;
            source.next_buffer();
        }
        assert!(source.buffer().is_none());
        num_chunks += 1;
        source.next_chunk();
    }
    assert_eq!(num_chunks, 2);
    assert_eq!(num_buffers, 3);
    assert_eq!(source.num_selected_rows(), 9);
}

#[test]
fn test_model_column_needs_scratch_mode_and_a_lock() {
    let mut source =
        MemoryVisSource::new(vec![vec![simple_buffer()]], DataMode::ReadOnly).unwrap();
    source.origin_chunks();
    source.origin();
    assert!(matches!(source.write_model_column(), Err(VisError::ReadOnly)));

    let mut source =
        MemoryVisSource::new(vec![vec![simple_buffer()]], DataMode::ScratchModelColumn).unwrap();
    source.origin_chunks();
    source.origin();
    assert!(matches!(source.write_model_column(), Err(VisError::NotLocked)));

    source.lock().unwrap();
    source.buffer_mut().unwrap().model.fill(marlu::c32::new(2.0, 0.0));
    source.write_model_column().unwrap();
    source.unlock();
    assert!(!source.is_locked());
    let model = source.model_column(0, 0).unwrap();
    assert_abs_diff_eq!(model[(0, 0, 0)].re, 2.0);
}

#[test]
fn test_locks_nest() {
    let mut source =
        MemoryVisSource::new(vec![vec![simple_buffer()]], DataMode::ReadOnly).unwrap();
    source.lock().unwrap();
    source.lock().unwrap();
    source.unlock();
    assert!(source.is_locked());
    source.unlock();
    assert!(!source.is_locked());
    source.unlock();
    assert!(!source.is_locked());
    assert_eq!(source.num_locks_taken(), 2);
}

#[test]
fn test_virtual_model_round_trip() {
    let mut source =
        MemoryVisSource::new(vec![vec![simple_buffer()]], DataMode::VirtualModel).unwrap();
    let record = VirtualModelRecord {
        kernel: "wprojectft".to_string(),
        image: "test".to_string(),
        ra_deg: 0.0,
        dec_deg: -27.0,
        nx: 64,
        ny: 64,
        cell_arcsec: 60.0,
        freqs_hz: vec![150e6],
        stokes: "I".to_string(),
    };
    assert!(matches!(
        source.save_virtual_model(0, &record),
        Err(VisError::NotLocked)
    ));
    source.lock().unwrap();
    source.save_virtual_model(0, &record).unwrap();
    source.unlock();
    assert_eq!(source.virtual_model(0), Some(record));
    assert_eq!(source.virtual_model(1), None);
}

fn sim_params(sources: Vec<PointSource>) -> SimulationParams {
    let array_position = LatLngHeight::mwa();
    SimulationParams {
        phase_centre: RADec::from_degrees(0.0, -27.0),
        array_position,
        antennas: spiral_layout(8, 500.0, array_position.latitude_rad),
        start: Epoch::from_gpst_seconds(1090008640.0),
        num_timesteps: 3,
        time_res_s: 8.0,
        freqs_hz: vec![150e6, 160e6],
        correlations: vec![Correlation::XX, Correlation::XY, Correlation::YX, Correlation::YY],
        sources,
        timesteps_per_buffer: 2,
        include_autos: false,
    }
}

#[test]
fn test_simulated_source_at_phase_centre_is_flat() {
    let params = sim_params(vec![PointSource::unpolarised(
        RADec::from_degrees(0.0, -27.0),
        3.0,
    )]);
    let chunks = simulate(&params).unwrap();
    assert_eq!(chunks.len(), 1);
    // 3 timesteps with 2 per buffer.
    assert_eq!(chunks[0].len(), 2);
    let vb = &chunks[0][0];
    assert_eq!(vb.num_rows(), 2 * 28);
    assert!(vb.validate().is_ok());
    for vis_c in vb.data.lanes(ndarray::Axis(2)) {
        assert_abs_diff_eq!(vis_c[0].re, 3.0, epsilon = 1e-5);
        assert_abs_diff_eq!(vis_c[0].im, 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(vis_c[1].norm(), 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(vis_c[3].re, 3.0, epsilon = 1e-5);
    }
}

#[test]
fn test_simulated_offset_source_has_unit_amplitude() {
    let params = sim_params(vec![PointSource::unpolarised(
        RADec::from_degrees(1.0, -26.0),
        1.0,
    )]);
    let chunks = simulate(&params).unwrap();
    for vb in &chunks[0] {
        for vis in vb.data.iter().step_by(4) {
            assert_abs_diff_eq!(vis.norm(), 1.0, epsilon = 1e-5);
        }
    }
}

#[test]
fn test_simulated_autos_have_zero_uvw() {
    let mut params = sim_params(vec![]);
    params.include_autos = true;
    let chunks = simulate(&params).unwrap();
    let vb = &chunks[0][0];
    assert_eq!(vb.num_rows(), 2 * 36);
    for row in 0..vb.num_rows() {
        if vb.is_auto(row) {
            assert_abs_diff_eq!(vb.uvws[row].u, 0.0);
        } else {
            assert!(vb.uvws[row].u.abs() + vb.uvws[row].v.abs() > 0.0);
        }
    }
}

#[test]
fn test_simulation_without_antennas_fails() {
    let mut params = sim_params(vec![]);
    params.antennas.clear();
    assert!(matches!(simulate(&params), Err(VisError::NoAntennas)));
}
