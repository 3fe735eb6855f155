use std::collections::HashSet;

use lidarmap::io::{
    encode_capture, read_frame_stream, write_frame, FormatDescriptor, Framing, PointLayout,
    RawPoint, ScanRecord,
};
use lidarmap::pipeline::{frame_series, map_frames, run, PipelineConfig};
use lidarmap::raster::{Aggregation, CombineMode};
use lidarmap::{CellGrid, Pose};
use serde::Serialize;

#[derive(Serialize)]
struct ScanMsg {
    stamp: f64,
    points: Vec<f64>,
    point_fields: usize,
    pose: Vec<f64>,
}

/// Scan `k` of the three-scan scene: four points, identity pose.
fn scene_points(k: usize) -> Vec<[f64; 4]> {
    let k = k as f64;
    vec![
        [k + 0.25, 0.25, 1.0 + k, 10.0],
        [k + 0.75, 0.25, 2.0, 20.0],
        [k + 0.25, 1.5, 0.5, 30.0],
        [0.0, 0.0, -1.0, 40.0],
    ]
}

fn binary_scene() -> Vec<u8> {
    let records: Vec<ScanRecord> = (0..3)
        .map(|k| ScanRecord {
            offset: 0,
            timestamp: Some(k as f64 * 0.1),
            pose: Some(Pose::identity()),
            points: scene_points(k)
                .iter()
                .map(|p| RawPoint {
                    intensity: Some(p[3]),
                    ..RawPoint::xyz(p[0], p[1], p[2])
                })
                .collect(),
        })
        .collect();
    encode_capture(&records, &FormatDescriptor::new(PointLayout::xyzi_f32())).unwrap()
}

fn msgpack_scene() -> Vec<u8> {
    let mut bytes = Vec::new();
    for k in 0..3 {
        let msg = ScanMsg {
            stamp: k as f64 * 0.1,
            points: scene_points(k).concat(),
            point_fields: 4,
            pose: Pose::identity().to_row_major().to_vec(),
        };
        bytes.extend(rmp_serde::to_vec_named(&msg).unwrap());
    }
    bytes
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.raster.cell_size = 1.0;
    config.raster.aggregation = Aggregation::Max;
    config
}

fn expected_buckets(origin: [f64; 2]) -> usize {
    (0..3)
        .flat_map(scene_points)
        .map(|p| {
            (
                (p[0] - origin[0]).floor() as i64,
                (p[1] - origin[1]).floor() as i64,
            )
        })
        .collect::<HashSet<_>>()
        .len()
}

#[test]
fn three_scans_to_height_map_in_both_framings() {
    for (bytes, framing) in [
        (binary_scene(), Framing::Binary),
        (msgpack_scene(), Framing::MessagePack),
    ] {
        let out = run(&bytes, &config()).unwrap();
        assert_eq!(out.capture.decode.scans, 3, "{framing:?}");
        assert!(out.capture.decode.corrupt.is_empty());
        assert_eq!(out.capture.frames.len(), 3);
        assert_eq!(out.map.cloud.len(), 12);
        assert_eq!(out.map.cloud.frame_count(), 3);

        let grid = &out.map.raster.grid;
        assert_eq!(grid.origin(), [0.0, 0.0]);
        assert_eq!((grid.width(), grid.height()), (3, 2));
        assert_eq!(grid.valid_count(), expected_buckets(grid.origin()));
        assert_eq!(grid.valid_count(), 6);
        // Max over (0.25, 0.25, 1.0), (0.75, 0.25, 2.0) and the origin point.
        assert_eq!(grid.cell(0, 0), Some(2.0));
        assert_eq!(grid.cell(2, 0), Some(3.0));
    }
}

#[test]
fn staged_run_through_frame_json_matches_direct_run() {
    let direct = run(&msgpack_scene(), &config()).unwrap();

    let mut docs = Vec::new();
    for frame in &direct.capture.frames {
        write_frame(&mut docs, frame).unwrap();
    }
    let frames: Vec<_> = read_frame_stream(docs.as_slice())
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(frames, direct.capture.frames);

    let staged = map_frames(&frames, &config()).unwrap();
    assert_eq!(staged.raster, direct.map.raster);
}

#[test]
fn corrupt_bytes_between_messages_are_skipped_and_counted() {
    let clean = msgpack_scene();
    let first_len = rmp_serde::to_vec_named(&ScanMsg {
        stamp: 0.0,
        points: scene_points(0).concat(),
        point_fields: 4,
        pose: Pose::identity().to_row_major().to_vec(),
    })
    .unwrap()
    .len();

    let mut bytes = clean[..first_len].to_vec();
    bytes.extend_from_slice(&[0xc1, 0xc1, 0xff, 0x00, 0x13]);
    bytes.extend_from_slice(&clean[first_len..]);

    let out = run(&bytes, &config()).unwrap();
    assert_eq!(out.capture.frames.len(), 3);
    assert_eq!(out.capture.decode.corrupt.len(), 1);
    assert_eq!(out.capture.decode.corrupt_bytes(), 5);
    assert_eq!(out.map.cloud.len(), 12);
}

#[test]
fn consecutive_frame_blend() {
    let out = run(&binary_scene(), &config()).unwrap();
    let mut config = config();
    config.combine = CombineMode::Blend { weights: None };
    let series = frame_series(&out.capture.frames, &config).unwrap();

    assert_eq!(series.rasters.len(), 3);
    let composite = &series.composite;
    assert_eq!((composite.width, composite.height), (3, 2));
    // Frame maxima at (0, 0) are 2.0, -1.0 and -1.0.
    assert_eq!(composite.cell(0, 0), Some(0.0));
    // Only the last frame reaches column 2.
    assert_eq!(composite.cell(2, 0), Some(3.0));
    assert_eq!(composite.cell(1, 1), Some(0.5));
}
