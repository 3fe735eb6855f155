//! Intermediate frame documents.
//!
//! ```json
//! {"timestamp": 1.5, "pose": [16 numbers] | null, "points": [[x, y, z, intensity?, ring?], ...]}
//! ```
//!
//! A point without intensity but with a ring writes `null` in the intensity slot.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use lidarmap_core::{Frame, PointRecord, Pose, ValidationError, RING_NONE};
use serde::{Deserialize, Serialize};

use crate::error::FrameJsonError;

#[derive(Serialize, Deserialize)]
struct FrameDoc {
    timestamp: f64,
    #[serde(default)]
    pose: Option<Vec<f64>>,
    points: Vec<Vec<Option<f64>>>,
}

impl From<&Frame> for FrameDoc {
    fn from(frame: &Frame) -> Self {
        let points = frame
            .points
            .iter()
            .map(|p| {
                let mut row = vec![Some(p.x), Some(p.y), Some(p.z)];
                if p.intensity.is_some() || p.ring.is_some() {
                    row.push(p.intensity.map(f64::from));
                }
                if let Some(r) = p.ring {
                    row.push(Some(f64::from(r)));
                }
                row
            })
            .collect();
        FrameDoc {
            timestamp: frame.timestamp,
            pose: frame.pose.as_ref().map(|p| p.to_row_major().to_vec()),
            points,
        }
    }
}

fn point_from_row(index: usize, row: &[Option<f64>]) -> Result<PointRecord, FrameJsonError> {
    if !(3..=5).contains(&row.len()) {
        return Err(FrameJsonError::PointArity {
            index,
            len: row.len(),
        });
    }
    let coord = |i: usize, field: &'static str| {
        row[i].ok_or(FrameJsonError::Point {
            index,
            source: ValidationError::NonFinite {
                field,
                value: f64::NAN,
            },
        })
    };
    let mut point = PointRecord::new(coord(0, "x")?, coord(1, "y")?, coord(2, "z")?);
    point.intensity = row.get(3).copied().flatten().map(|i| i as f32);
    if let Some(r) = row.get(4).copied().flatten() {
        if r.fract() != 0.0 || !(0.0..RING_NONE as f64).contains(&r) {
            return Err(FrameJsonError::Point {
                index,
                source: ValidationError::OutOfRange {
                    field: "ring",
                    value: r,
                    min: 0.0,
                    max: (RING_NONE - 1) as f64,
                },
            });
        }
        point.ring = Some(r as u8);
    }
    point
        .validate()
        .map_err(|source| FrameJsonError::Point { index, source })?;
    Ok(point)
}

impl TryFrom<FrameDoc> for Frame {
    type Error = FrameJsonError;

    fn try_from(doc: FrameDoc) -> Result<Self, Self::Error> {
        if !doc.timestamp.is_finite() {
            return Err(ValidationError::NonFinite {
                field: "timestamp",
                value: doc.timestamp,
            }
            .into());
        }
        let pose = doc.pose.as_deref().map(Pose::from_row_major).transpose()?;
        let points = doc
            .points
            .iter()
            .enumerate()
            .map(|(i, row)| point_from_row(i, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Frame {
            timestamp: doc.timestamp,
            pose,
            points,
        })
    }
}

pub fn frame_to_json(frame: &Frame) -> Result<String, FrameJsonError> {
    Ok(serde_json::to_string_pretty(&FrameDoc::from(frame))?)
}

pub fn frame_from_json(json: &str) -> Result<Frame, FrameJsonError> {
    serde_json::from_str::<FrameDoc>(json)?.try_into()
}

pub fn write_frame<W: Write>(writer: W, frame: &Frame) -> Result<(), FrameJsonError> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, &FrameDoc::from(frame))?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: R) -> Result<Frame, FrameJsonError> {
    serde_json::from_reader::<_, FrameDoc>(BufReader::new(reader))?.try_into()
}

pub fn write_frame_file(path: impl AsRef<Path>, frame: &Frame) -> Result<(), FrameJsonError> {
    write_frame(File::create(path)?, frame)
}

pub fn read_frame_file(path: impl AsRef<Path>) -> Result<Frame, FrameJsonError> {
    read_frame(File::open(path)?)
}

/// Frames from a reader holding several concatenated documents.
pub fn read_frame_stream<R: Read>(
    reader: R,
) -> impl Iterator<Item = Result<Frame, FrameJsonError>> {
    serde_json::Deserializer::from_reader(BufReader::new(reader))
        .into_iter::<FrameDoc>()
        .map(|doc| doc.map_err(FrameJsonError::from).and_then(Frame::try_from))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::new(
            12.25,
            vec![
                PointRecord::new(1.0, 2.0, 3.0),
                PointRecord::new(-1.0, 0.5, 0.0).with_intensity(0.0),
                PointRecord::new(0.0, 0.0, 9.0).with_ring(12),
                PointRecord::new(4.0, 4.0, 4.0).with_intensity(7.5).with_ring(0),
            ],
        )
        .with_pose(Pose::from_translation([1.0, 0.0, -2.0]))
    }

    #[test]
    fn frame_roundtrips_through_json() {
        let f = frame();
        let json = frame_to_json(&f).unwrap();
        assert_eq!(frame_from_json(&json).unwrap(), f);
    }

    #[test]
    fn missing_intensity_before_ring_is_null() {
        let json = frame_to_json(&frame()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["points"][0].as_array().unwrap().len(), 3);
        assert!(value["points"][2][3].is_null());
        assert_eq!(value["points"][2][4], 12.0);
    }

    #[test]
    fn null_pose_reads_as_none() {
        let f = frame_from_json(r#"{"timestamp": 1, "pose": null, "points": [[0, 0, 0, 3]]}"#)
            .unwrap();
        assert_eq!(f.pose, None);
        assert_eq!(f.points[0].intensity, Some(3.0));
    }

    #[test]
    fn short_point_is_rejected() {
        let err = frame_from_json(r#"{"timestamp": 1, "points": [[0, 0, 0], [1, 2]]}"#)
            .unwrap_err();
        assert!(matches!(err, FrameJsonError::PointArity { index: 1, len: 2 }));
    }

    #[test]
    fn ring_out_of_range_is_rejected() {
        let err = frame_from_json(r#"{"timestamp": 1, "points": [[0, 0, 0, null, 255]]}"#)
            .unwrap_err();
        assert!(matches!(err, FrameJsonError::Point { index: 0, .. }));
    }

    #[test]
    fn bad_pose_length_is_rejected() {
        let err =
            frame_from_json(r#"{"timestamp": 1, "pose": [1, 0, 0], "points": []}"#).unwrap_err();
        assert!(matches!(
            err,
            FrameJsonError::Validation(ValidationError::PoseLength(3))
        ));
    }

    #[test]
    fn file_and_stream_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame_0000.json");
        write_frame_file(&path, &frame()).unwrap();
        assert_eq!(read_frame_file(&path).unwrap(), frame());

        let mut buf = Vec::new();
        write_frame(&mut buf, &frame()).unwrap();
        write_frame(&mut buf, &Frame::new(13.0, vec![])).unwrap();
        let frames: Vec<Frame> = read_frame_stream(buf.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].timestamp, 13.0);
    }
}
