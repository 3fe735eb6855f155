#![forbid(unsafe_code)]

//! Turns decoded scan records into timestamp-ordered [`Frame`]s of canonical
//! [`PointRecord`]s.

use lidarmap_core::{Frame, PointRecord, Pose, RING_NONE};
use lidarmap_io::{RawPoint, ScanRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Records whose timestamp lies within this many seconds of a frame's
    /// first record join that frame. `0.0` merges only equal timestamps.
    pub merge_window: f64,
    /// Element-wise tolerance when deciding whether two records share a pose.
    pub pose_tolerance: f64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            merge_window: 0.0,
            pose_tolerance: 1e-6,
        }
    }
}

/// Counts of everything the assembler dropped or rewrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyReport {
    pub records: usize,
    pub frames: usize,
    /// Records folded into an earlier record's frame.
    pub merged_records: usize,
    /// Records without a timestamp in a capture where others had one.
    pub untimed_dropped: usize,
    /// True when no record carried a timestamp and ordinals were used.
    pub ordinal_timestamps: bool,
    pub non_finite_points: usize,
    pub intensities_cleared: usize,
    pub rings_cleared: usize,
    /// Frames left with no valid points.
    pub empty_frames_dropped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub frames: Vec<Frame>,
    pub report: AssemblyReport,
}

fn usable_timestamp(record: &ScanRecord) -> Option<f64> {
    record.timestamp.filter(|t| t.is_finite())
}

fn same_pose(a: Option<&Pose>, b: Option<&Pose>, tolerance: f64) -> bool {
    let identity = Pose::identity();
    a.unwrap_or(&identity)
        .approx_eq(b.unwrap_or(&identity), tolerance)
}

/// Converts a wire point, or returns `None` for non-finite coordinates.
fn canonical_point(raw: &RawPoint, report: &mut AssemblyReport) -> Option<PointRecord> {
    if !(raw.x.is_finite() && raw.y.is_finite() && raw.z.is_finite()) {
        report.non_finite_points += 1;
        return None;
    }
    let mut point = PointRecord::new(raw.x, raw.y, raw.z);
    if let Some(i) = raw.intensity {
        let i = i as f32;
        if i.is_finite() {
            point.intensity = Some(i);
        } else {
            report.intensities_cleared += 1;
        }
    }
    if let Some(r) = raw.ring {
        if r < RING_NONE as u32 {
            point.ring = Some(r as u8);
        } else {
            report.rings_cleared += 1;
        }
    }
    Some(point)
}

/// Groups, orders and canonicalizes scan records.
///
/// Records are sorted by timestamp (stable, so equal timestamps keep capture
/// order). A record joins the current frame when its timestamp is within
/// `merge_window` of the frame's first record and the poses agree. Points
/// with non-finite coordinates are dropped, as are frames left empty.
#[instrument(skip_all, fields(merge_window = config.merge_window))]
pub fn assemble<'a, I>(records: I, config: &AssemblyConfig) -> Assembly
where
    I: IntoIterator<Item = &'a ScanRecord>,
{
    let records: Vec<&ScanRecord> = records.into_iter().collect();
    let mut report = AssemblyReport {
        records: records.len(),
        ..AssemblyReport::default()
    };

    let mut timed: Vec<(f64, &ScanRecord)> = if records.iter().any(|r| usable_timestamp(r).is_some()) {
        records
            .iter()
            .filter_map(|r| match usable_timestamp(r) {
                Some(t) => Some((t, *r)),
                None => {
                    report.untimed_dropped += 1;
                    None
                }
            })
            .collect()
    } else {
        report.ordinal_timestamps = !records.is_empty();
        records
            .iter()
            .enumerate()
            .map(|(i, r)| (i as f64, *r))
            .collect()
    };
    if report.untimed_dropped > 0 {
        warn!(dropped = report.untimed_dropped, "dropping records without timestamp");
    }
    timed.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut frames: Vec<Frame> = Vec::new();
    // Timestamp of the first record of the open frame.
    let mut group_start = f64::NEG_INFINITY;
    let mut group_open = false;

    for (ts, record) in timed {
        let joins = group_open
            && ts - group_start <= config.merge_window
            && frames
                .last()
                .is_some_and(|f| same_pose(f.pose.as_ref(), record.pose.as_ref(), config.pose_tolerance));

        let points = record
            .points
            .iter()
            .filter_map(|p| canonical_point(p, &mut report));

        match frames.last_mut() {
            Some(frame) if joins => {
                frame.points.extend(points);
                report.merged_records += 1;
                debug!(offset = record.offset, timestamp = ts, "merged record into frame");
            }
            _ => {
                let mut frame = Frame::new(ts, points.collect());
                frame.pose = record.pose;
                frames.push(frame);
                group_start = ts;
                group_open = true;
            }
        }
    }

    let before = frames.len();
    frames.retain(|f| !f.is_empty());
    report.empty_frames_dropped = before - frames.len();
    report.frames = frames.len();

    if report.non_finite_points > 0 {
        warn!(dropped = report.non_finite_points, "dropped points with non-finite coordinates");
    }
    if report.empty_frames_dropped > 0 {
        warn!(dropped = report.empty_frames_dropped, "dropped frames without valid points");
    }
    info!(
        records = report.records,
        frames = report.frames,
        merged = report.merged_records,
        "assembled frames"
    );

    Assembly { frames, report }
}
