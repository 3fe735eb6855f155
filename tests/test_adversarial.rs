//! Adversarial edge-case integration tests.
//!
//! Degenerate, truncated and pathological inputs across the whole stack:
//! no panics, no infinite loops, every skip counted.

use lidarmap::accumulate::{accumulate, AccumulateOptions, AccumulationError, Reference};
use lidarmap::assembly::{assemble, AssemblyConfig};
use lidarmap::io::{
    decode, encode_capture, DecodeErrorKind, DecodeOptions, FormatDescriptor, Framing,
    PointLayout, RawPoint, ScanRecord,
};
use lidarmap::pipeline::{run, PipelineConfig};
use lidarmap::raster::{combine, rasterize, Aggregation, CombineError, CombineMode, RasterParams};
use lidarmap::{CellGrid, Frame, PointCloud, PointRecord, Pose, RasterGrid};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

fn scan(ts: f64, n: usize) -> ScanRecord {
    ScanRecord {
        offset: 0,
        timestamp: Some(ts),
        pose: None,
        points: (0..n)
            .map(|i| RawPoint::xyz(i as f64, ts, 1.0))
            .collect(),
    }
}

fn binary(records: &[ScanRecord]) -> Vec<u8> {
    encode_capture(records, &FormatDescriptor::new(PointLayout::xyz_f32())).unwrap()
}

fn binary_options() -> DecodeOptions {
    DecodeOptions {
        framing: Framing::Binary,
        descriptor: FormatDescriptor::new(PointLayout::xyz_f32()),
    }
}

// ────────────────── Decoder ──────────────────

#[test]
fn empty_capture_decodes_to_nothing() {
    let out = decode(&[], &DecodeOptions::default()).unwrap();
    assert!(out.records.is_empty());
    assert!(out.report.corrupt.is_empty());
}

#[test]
fn garbage_capture_is_unsupported() {
    let err = decode(b"\x00\x01\x02garbage", &DecodeOptions::default()).unwrap_err();
    assert_eq!(err.kind, DecodeErrorKind::UnsupportedFormat);
    assert!(!err.is_recoverable());
}

#[test]
fn truncated_last_record_keeps_earlier_records() {
    let bytes = binary(&[scan(0.0, 3), scan(1.0, 3)]);
    let cut = &bytes[..bytes.len() - 5];
    let out = decode(cut, &binary_options()).unwrap();
    assert_eq!(out.report.scans, 1);
    assert_eq!(out.report.count_of(DecodeErrorKind::Truncated), 1);
}

#[test]
fn every_prefix_of_a_capture_decodes_without_panic() {
    let bytes = binary(&[scan(0.0, 2), scan(1.0, 0), scan(2.0, 4)]);
    for len in 8..bytes.len() {
        let out = decode(&bytes[..len], &binary_options()).unwrap();
        assert!(out.report.scans <= 3);
        let covered: usize = out.report.corrupt_bytes();
        assert!(covered <= len);
    }
}

#[test]
fn corrupted_length_field_recovers_at_next_record() {
    let mut bytes = binary(&[scan(0.0, 2), scan(1.0, 2), scan(2.0, 2)]);
    // First record header starts right after the 8-byte file header; its
    // body length follows the 4-byte sync marker.
    bytes[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
    let out = decode(&bytes, &binary_options()).unwrap();
    assert_eq!(out.report.scans, 2);
    assert_eq!(out.report.count_of(DecodeErrorKind::MalformedHeader), 1);
}

#[test]
fn megabytes_of_corrupt_float_payload_resync_quickly() {
    #[derive(serde::Serialize)]
    struct Msg {
        stamp: f64,
        points: Vec<f64>,
    }
    let msg = |stamp: f64| {
        rmp_serde::to_vec_named(&Msg {
            stamp,
            points: vec![1.0, 2.0, 3.0, 4.0],
        })
        .unwrap()
    };

    // A packed-scan body with its map header lost: 4 MiB of lidar-like f32s.
    let mut rng = StdRng::seed_from_u64(5);
    let mut payload = vec![0xc1];
    while payload.len() < 4 << 20 {
        payload.extend_from_slice(&rng.gen_range(-50.0f32..50.0).to_le_bytes());
    }

    let mut bytes = msg(0.0);
    bytes.extend_from_slice(&payload);
    bytes.extend(msg(1.0));

    let started = Instant::now();
    let out = decode(&bytes, &DecodeOptions::default()).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(out.report.scans, 2);
    assert_eq!(out.report.corrupt.len(), 1);
    assert_eq!(out.report.corrupt_bytes(), payload.len());
    assert!(elapsed < Duration::from_secs(10), "resync took {elapsed:?}");
}

// ────────────────── Assembler ──────────────────

#[test]
fn all_points_non_finite_leaves_no_frames() {
    let record = ScanRecord {
        offset: 0,
        timestamp: Some(0.0),
        pose: None,
        points: vec![
            RawPoint::xyz(f64::NAN, 0.0, 0.0),
            RawPoint::xyz(0.0, f64::INFINITY, 0.0),
        ],
    };
    let out = assemble([&record], &AssemblyConfig::default());
    assert!(out.frames.is_empty());
    assert_eq!(out.report.empty_frames_dropped, 1);
    assert_eq!(out.report.non_finite_points, 2);
}

#[test]
fn non_finite_timestamps_are_treated_as_missing() {
    let records = vec![
        ScanRecord {
            timestamp: Some(f64::NAN),
            ..scan(0.0, 1)
        },
        scan(3.0, 1),
    ];
    let out = assemble(&records, &AssemblyConfig::default());
    assert_eq!(out.frames.len(), 1);
    assert_eq!(out.report.untimed_dropped, 1);
}

// ────────────────── Accumulator ──────────────────

#[test]
fn accumulating_nothing_gives_empty_cloud() {
    let out = accumulate(&[], Reference::Identity, &AccumulateOptions::default()).unwrap();
    assert!(out.cloud.is_empty());
    assert_eq!(out.report.frames_in, 0);
}

#[test]
fn non_finite_pose_is_rejected() {
    let mut pose = Pose::identity();
    pose.matrix[0][3] = f64::NAN;
    let frames = vec![
        Frame::new(0.0, vec![PointRecord::new(1.0, 1.0, 1.0)]).with_pose(pose),
        Frame::new(1.0, vec![PointRecord::new(2.0, 2.0, 2.0)]),
    ];
    let out = accumulate(&frames, Reference::Identity, &AccumulateOptions::default()).unwrap();
    assert_eq!(out.cloud.len(), 1);
    assert!(matches!(out.report.rejected[0], AccumulationError::InvalidPose { frame: 0, .. }));
}

#[test]
fn huge_translation_overflowing_to_infinity_is_counted() {
    let frames = vec![Frame::new(0.0, vec![PointRecord::new(f64::MAX, 0.0, 0.0)])
        .with_pose(Pose::from_translation([f64::MAX, 0.0, 0.0]))];
    let out = accumulate(&frames, Reference::Identity, &AccumulateOptions::default()).unwrap();
    assert!(out.cloud.is_empty());
    assert_eq!(out.report.non_finite_points, 1);
}

// ────────────────── Rasterizer / Combiner ──────────────────

#[test]
fn widely_spread_points_with_tiny_cells_stay_bounded() {
    let cloud = PointCloud::from_xyz(vec![0.0, 1e3], vec![0.0, 0.0], vec![1.0, 2.0]);
    let out = rasterize(&cloud, &RasterParams::new(0.5, Aggregation::Count)).unwrap();
    assert_eq!((out.grid.width(), out.grid.height()), (2001, 1));
    assert_eq!(out.grid.cell(2000, 0), Some(1.0));
    assert_eq!(out.grid.valid_count(), 2);
}

#[test]
fn combine_mismatched_geometry_is_fatal() {
    let a = RasterGrid::new([0.0, 0.0], 1.0, 2, 2).unwrap();
    let b = RasterGrid::new([0.0, 0.0], 0.5, 2, 2).unwrap();
    assert!(matches!(
        combine(&[a, b], &CombineMode::Overlay),
        Err(CombineError::GeometryMismatch { .. })
    ));
}

#[test]
fn pipeline_on_capture_with_only_corruption() {
    let mut bytes = binary(&[]);
    bytes.extend_from_slice(b"SCAN\x05\x00\x00\x00abc");
    let out = run(&bytes, &PipelineConfig::default()).unwrap();
    assert!(out.capture.frames.is_empty());
    assert_eq!(out.capture.decode.corrupt.len(), 1);
    assert_eq!((out.map.raster.grid.width(), out.map.raster.grid.height()), (1, 1));
    assert_eq!(out.map.raster.grid.valid_count(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_bytes_never_panic(tail in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut bytes = binary(&[scan(0.0, 1)]);
        bytes.extend_from_slice(&tail);
        let _ = decode(&bytes, &DecodeOptions::default());

        let mut msgpack = vec![0x81, 0xa6];
        msgpack.extend_from_slice(b"points");
        msgpack.push(0x90);
        msgpack.extend_from_slice(&tail);
        let _ = decode(&msgpack, &DecodeOptions::default());
    }
}
