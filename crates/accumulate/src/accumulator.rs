use lidarmap_core::{CloudBuilder, Frame, PointCloud, PointRecord, Pose};
use lidarmap_filters::voxel_downsample;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::AccumulationError;

/// Coordinate system the accumulated cloud is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reference {
    /// The common frame the poses map into.
    #[default]
    Identity,
    /// The frame at this index in timestamp order.
    Frame(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulateOptions {
    /// Largest tolerated [`Pose::rigidity_error`].
    pub pose_tolerance: f64,
    /// Voxel edge for optional downsampling of the merged cloud.
    pub voxel_size: Option<f64>,
}

impl Default for AccumulateOptions {
    fn default() -> Self {
        Self {
            pose_tolerance: 1e-6,
            voxel_size: None,
        }
    }
}

impl AccumulateOptions {
    pub fn validate(&self) -> Result<(), AccumulationError> {
        match self.voxel_size {
            Some(size) if !(size.is_finite() && size > 0.0) => Err(AccumulationError::InvalidVoxelSize(size)),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulationReport {
    pub frames_in: usize,
    pub frames_merged: usize,
    /// Frames skipped because of an invalid pose.
    pub rejected: Vec<AccumulationError>,
    /// Points whose transformed coordinates were not finite.
    pub non_finite_points: usize,
    /// Point count before downsampling, when it ran.
    pub points_before_downsample: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Accumulation {
    pub cloud: PointCloud,
    pub report: AccumulationReport,
}

/// Append-only merge of frames into one reference frame.
///
/// Each frame is pushed once; pushing the same frame twice duplicates its
/// points. [`Accumulator::finish`] freezes the result.
#[derive(Debug, Clone)]
pub struct Accumulator {
    /// Maps the common frame into the reference frame.
    to_reference: Pose,
    tolerance: f64,
    builder: CloudBuilder,
    report: AccumulationReport,
}

/// Points of `frame` in the reference frame, or the reason it is rejected.
fn transform_frame(
    index: usize,
    frame: &Frame,
    to_reference: &Pose,
    tolerance: f64,
) -> Result<Vec<PointRecord>, AccumulationError> {
    let Some(pose) = &frame.pose else {
        return Ok(frame.points.clone());
    };
    let deviation = pose.rigidity_error();
    if deviation > tolerance {
        return Err(AccumulationError::InvalidPose {
            frame: index,
            timestamp: frame.timestamp,
            deviation,
            tolerance,
        });
    }
    let transform = pose.compose(to_reference);
    Ok(frame
        .points
        .iter()
        .map(|p| {
            let [x, y, z] = transform.apply_to_point(&p.position());
            PointRecord { x, y, z, ..*p }
        })
        .collect())
}

impl Accumulator {
    /// Accumulates into the frame described by `reference_pose`, or the
    /// common frame when `None`.
    pub fn new(reference_pose: Option<&Pose>, tolerance: f64) -> Self {
        Self {
            to_reference: reference_pose.map_or_else(Pose::identity, Pose::rigid_inverse),
            tolerance,
            builder: CloudBuilder::new(),
            report: AccumulationReport::default(),
        }
    }

    pub fn report(&self) -> &AccumulationReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.builder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }

    /// Transforms and appends one frame.
    ///
    /// A frame with an invalid pose is rejected, recorded in the report and
    /// returned as the error; the accumulator stays usable.
    pub fn push(&mut self, index: usize, frame: &Frame) -> Result<(), AccumulationError> {
        let result = transform_frame(index, frame, &self.to_reference, self.tolerance);
        self.append(result)
    }

    fn append(
        &mut self,
        result: Result<Vec<PointRecord>, AccumulationError>,
    ) -> Result<(), AccumulationError> {
        self.report.frames_in += 1;
        match result {
            Ok(points) => {
                let (before, incoming) = (self.builder.len(), points.len());
                self.builder.extend(points.into_iter().filter(PointRecord::is_finite));
                self.report.non_finite_points += incoming - (self.builder.len() - before);
                self.report.frames_merged += 1;
                self.builder.frame_count += 1;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "rejecting frame");
                self.report.rejected.push(err.clone());
                Err(err)
            }
        }
    }

    /// Freezes the cloud, downsampling it when `voxel_size` is set.
    pub fn finish(mut self, voxel_size: Option<f64>) -> Result<Accumulation, AccumulationError> {
        AccumulateOptions {
            voxel_size,
            ..AccumulateOptions::default()
        }
        .validate()?;
        let cloud = self.builder.finish();
        let cloud = match voxel_size {
            Some(size) => {
                self.report.points_before_downsample = Some(cloud.len());
                let down = voxel_downsample(&cloud, size);
                debug!(before = cloud.len(), after = down.len(), size, "voxel downsample");
                down
            }
            None => cloud,
        };
        Ok(Accumulation {
            cloud,
            report: self.report,
        })
    }
}

fn timestamp_order(frames: &[Frame]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..frames.len()).collect();
    order.sort_by(|&a, &b| frames[a].timestamp.total_cmp(&frames[b].timestamp));
    order
}

fn resolve_reference(
    frames: &[Frame],
    order: &[usize],
    reference: Reference,
    tolerance: f64,
) -> Result<Option<Pose>, AccumulationError> {
    match reference {
        Reference::Identity => Ok(None),
        Reference::Frame(index) => {
            let &original = order
                .get(index)
                .ok_or(AccumulationError::ReferenceOutOfRange {
                    index,
                    frames: frames.len(),
                })?;
            let pose = frames[original].effective_pose();
            let deviation = pose.rigidity_error();
            if deviation > tolerance {
                return Err(AccumulationError::InvalidReference { index, deviation });
            }
            Ok(Some(pose))
        }
    }
}

/// Merges `frames` into one cloud expressed in `reference`.
///
/// Frames are taken in timestamp order (stable for ties), so the result does
/// not depend on the order of the input slice. Frames with a non-rigid pose
/// are skipped and listed in the report. Only an unusable reference is an
/// error, as is a voxel size that is not finite and positive.
#[instrument(skip_all, fields(frames = frames.len(), ?reference))]
pub fn accumulate(
    frames: &[Frame],
    reference: Reference,
    options: &AccumulateOptions,
) -> Result<Accumulation, AccumulationError> {
    options.validate()?;
    let order = timestamp_order(frames);
    let reference_pose = resolve_reference(frames, &order, reference, options.pose_tolerance)?;

    let mut acc = Accumulator::new(reference_pose.as_ref(), options.pose_tolerance);
    let transformed: Vec<_> = order
        .par_iter()
        .enumerate()
        .map(|(rank, &i)| transform_frame(rank, &frames[i], &acc.to_reference, acc.tolerance))
        .collect();
    for result in transformed {
        // Rejections are recorded in the report.
        let _ = acc.append(result);
    }

    let out = acc.finish(options.voxel_size)?;
    info!(
        merged = out.report.frames_merged,
        rejected = out.report.rejected.len(),
        points = out.cloud.len(),
        "accumulated frames"
    );
    Ok(out)
}

/// Transforms every frame into `reference` on its own, one cloud per frame in
/// timestamp order. A frame with an invalid pose yields an empty cloud whose
/// report names the rejection. Downsampling, when set, runs per frame.
#[instrument(skip_all, fields(frames = frames.len(), ?reference))]
pub fn accumulate_each(
    frames: &[Frame],
    reference: Reference,
    options: &AccumulateOptions,
) -> Result<Vec<Accumulation>, AccumulationError> {
    options.validate()?;
    let order = timestamp_order(frames);
    let reference_pose = resolve_reference(frames, &order, reference, options.pose_tolerance)?;

    let out: Vec<Accumulation> = order
        .par_iter()
        .enumerate()
        .map(|(rank, &i)| {
            let mut acc = Accumulator::new(reference_pose.as_ref(), options.pose_tolerance);
            // Rejections are recorded in the report.
            let _ = acc.push(rank, &frames[i]);
            acc.finish(options.voxel_size)
        })
        .collect::<Result<_, _>>()?;
    debug!(clouds = out.len(), "transformed frames individually");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn frame(ts: f64, pts: &[[f64; 3]]) -> Frame {
        Frame::new(
            ts,
            pts.iter()
                .map(|p| PointRecord::new(p[0], p[1], p[2]))
                .collect(),
        )
    }

    fn sorted_points(cloud: &PointCloud) -> Vec<[f64; 3]> {
        let mut pts: Vec<[f64; 3]> = cloud.iter_points().collect();
        pts.sort_by(|a, b| {
            a[0].total_cmp(&b[0])
                .then(a[1].total_cmp(&b[1]))
                .then(a[2].total_cmp(&b[2]))
        });
        pts
    }

    #[test]
    fn frames_without_pose_are_kept_as_is() {
        let frames = vec![
            frame(0.0, &[[1.0, 2.0, 3.0]]),
            frame(1.0, &[[4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]),
        ];
        let out = accumulate(&frames, Reference::Identity, &AccumulateOptions::default()).unwrap();
        assert_eq!(out.cloud.len(), 3);
        assert_eq!(out.cloud.frame_count(), 2);
        assert_eq!(out.cloud.point(2), [7.0, 8.0, 9.0]);
    }

    #[test]
    fn pose_moves_points_into_common_frame() {
        let f = frame(0.0, &[[1.0, 0.0, 0.0]])
            .with_pose(Pose::from_yaw(std::f64::consts::FRAC_PI_2, [10.0, 0.0, 0.0]));
        let out = accumulate(&[f], Reference::Identity, &AccumulateOptions::default()).unwrap();
        let p = out.cloud.point(0);
        assert_relative_eq!(p[0], 10.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn reference_frame_maps_its_own_points_to_themselves() {
        let pose_a = Pose::from_yaw(0.3, [1.0, 2.0, 0.5]);
        let pose_b = Pose::from_yaw(-0.7, [4.0, -1.0, 0.0]);
        let frames = vec![
            frame(1.0, &[[1.0, 1.0, 1.0]]).with_pose(pose_b),
            frame(0.0, &[[2.0, -3.0, 0.5]]).with_pose(pose_a),
        ];
        // Index 0 in time order is the frame with pose_a.
        let out = accumulate(&frames, Reference::Frame(0), &AccumulateOptions::default()).unwrap();
        let p = out.cloud.point(0);
        assert_relative_eq!(p[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], -3.0, epsilon = 1e-12);
        assert_relative_eq!(p[2], 0.5, epsilon = 1e-12);

        // The other frame's point lands where pose_a⁻¹ · pose_b puts it.
        let expected = pose_a
            .rigid_inverse()
            .apply_to_point(&pose_b.apply_to_point(&[1.0, 1.0, 1.0]));
        let q = out.cloud.point(1);
        for axis in 0..3 {
            assert_relative_eq!(q[axis], expected[axis], epsilon = 1e-12);
        }
    }

    #[test]
    fn invalid_pose_is_rejected_and_others_continue() {
        let mut skewed = Pose::identity();
        skewed.matrix[0][1] = 0.5;
        let frames = vec![
            frame(0.0, &[[0.0, 0.0, 0.0]]),
            frame(1.0, &[[1.0, 1.0, 1.0]]).with_pose(skewed),
            frame(2.0, &[[2.0, 2.0, 2.0]]),
        ];
        let out = accumulate(&frames, Reference::Identity, &AccumulateOptions::default()).unwrap();
        assert_eq!(out.cloud.len(), 2);
        assert_eq!(out.cloud.frame_count(), 2);
        assert_eq!(out.report.frames_in, 3);
        assert!(matches!(
            out.report.rejected.as_slice(),
            [AccumulationError::InvalidPose { frame: 1, .. }]
        ));
    }

    #[test]
    fn bad_reference_is_an_error() {
        let frames = vec![frame(0.0, &[[0.0, 0.0, 0.0]])];
        assert_eq!(
            accumulate(&frames, Reference::Frame(3), &AccumulateOptions::default()),
            Err(AccumulationError::ReferenceOutOfRange {
                index: 3,
                frames: 1
            })
        );

        let mut scaled = Pose::identity();
        scaled.matrix[2][2] = 2.0;
        let frames = vec![frame(0.0, &[[0.0, 0.0, 0.0]]).with_pose(scaled)];
        assert!(matches!(
            accumulate(&frames, Reference::Frame(0), &AccumulateOptions::default()),
            Err(AccumulationError::InvalidReference { index: 0, .. })
        ));
    }

    #[test]
    fn incremental_push_matches_batch() {
        let frames: Vec<Frame> = (0..4)
            .map(|i| {
                frame(i as f64, &[[i as f64, 0.5, 0.0], [0.0, i as f64, 1.0]])
                    .with_pose(Pose::from_yaw(i as f64 * 0.2, [0.0, 0.0, i as f64]))
            })
            .collect();
        let mut acc = Accumulator::new(None, 1e-6);
        for (i, f) in frames.iter().enumerate() {
            acc.push(i, f).unwrap();
        }
        assert_eq!(acc.len(), 8);
        let incremental = acc.finish(None).unwrap();
        let batch = accumulate(&frames, Reference::Identity, &AccumulateOptions::default()).unwrap();
        assert_eq!(incremental.cloud, batch.cloud);
    }

    #[test]
    fn bad_voxel_size_is_an_error() {
        let frames = vec![frame(0.0, &[[0.0, 0.0, 0.0]])];
        for size in [0.0, -0.5, f64::NAN, f64::INFINITY] {
            let options = AccumulateOptions {
                voxel_size: Some(size),
                ..AccumulateOptions::default()
            };
            assert!(matches!(
                accumulate(&frames, Reference::Identity, &options),
                Err(AccumulationError::InvalidVoxelSize(_))
            ));
            assert!(matches!(
                accumulate_each(&frames, Reference::Identity, &options),
                Err(AccumulationError::InvalidVoxelSize(_))
            ));
        }
        let acc = Accumulator::new(None, 1e-6);
        assert!(acc.finish(Some(0.0)).is_err());
    }

    #[test]
    fn downsampling_is_reproducible_under_reordering() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut frames: Vec<Frame> = (0..6)
            .map(|i| {
                let pts: Vec<[f64; 3]> = (0..200)
                    .map(|_| {
                        [
                            rng.gen_range(-5.0..5.0),
                            rng.gen_range(-5.0..5.0),
                            rng.gen_range(0.0..2.0),
                        ]
                    })
                    .collect();
                frame(i as f64, &pts).with_pose(Pose::from_translation([i as f64 * 0.1, 0.0, 0.0]))
            })
            .collect();
        let options = AccumulateOptions {
            voxel_size: Some(0.5),
            ..AccumulateOptions::default()
        };
        let first = accumulate(&frames, Reference::Identity, &options).unwrap();
        frames.shuffle(&mut rng);
        let second = accumulate(&frames, Reference::Identity, &options).unwrap();
        assert_eq!(first.cloud, second.cloud);
        assert_eq!(first.report.points_before_downsample, Some(1200));
    }

    #[test]
    fn each_frame_gets_its_own_cloud() {
        let mut late = frame(2.0, &[[0.0, 0.0, 0.0]]);
        late.pose = Some(Pose::from_translation([5.0, 0.0, 0.0]));
        let early = frame(1.0, &[[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]]);
        let mut broken = frame(3.0, &[[0.0, 0.0, 0.0]]);
        let mut m = Pose::identity();
        m.matrix[0][0] = 2.0;
        broken.pose = Some(m);

        let out = accumulate_each(&[late, early, broken], Reference::Identity, &AccumulateOptions::default()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].cloud.len(), 2);
        assert_eq!(out[1].cloud.point(0), [5.0, 0.0, 0.0]);
        assert!(out[2].cloud.is_empty());
        assert_eq!(out[2].report.rejected.len(), 1);
    }

    proptest! {
        #[test]
        fn accumulation_is_order_independent(
            data in prop::collection::vec(
                (prop::collection::vec((-50.0f64..50.0, -50.0f64..50.0, -5.0f64..5.0), 0..20), -3.0f64..3.0),
                1..8
            ),
            seed in any::<u64>(),
        ) {
            let frames: Vec<Frame> = data
                .iter()
                .enumerate()
                .map(|(i, (pts, yaw))| {
                    let pts: Vec<[f64; 3]> = pts.iter().map(|p| [p.0, p.1, p.2]).collect();
                    frame(i as f64, &pts).with_pose(Pose::from_yaw(*yaw, [*yaw, 1.0, 0.0]))
                })
                .collect();
            let mut shuffled = frames.clone();
            shuffled.shuffle(&mut StdRng::seed_from_u64(seed));

            let a = accumulate(&frames, Reference::Identity, &AccumulateOptions::default()).unwrap();
            let b = accumulate(&shuffled, Reference::Identity, &AccumulateOptions::default()).unwrap();
            prop_assert_eq!(sorted_points(&a.cloud), sorted_points(&b.cloud));
            prop_assert_eq!(a.cloud.frame_count(), b.cloud.frame_count());
        }
    }
}
