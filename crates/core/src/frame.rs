use serde::{Deserialize, Serialize};

use crate::{PointRecord, Pose};

/// One canonicalized scan, the unit the accumulator consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Seconds; non-decreasing across the frames of one session.
    pub timestamp: f64,
    pub pose: Option<Pose>,
    pub points: Vec<PointRecord>,
}

impl Frame {
    pub fn new(timestamp: f64, points: Vec<PointRecord>) -> Self {
        Self {
            timestamp,
            pose: None,
            points,
        }
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The frame's pose, identity when absent.
    pub fn effective_pose(&self) -> Pose {
        self.pose.unwrap_or_default()
    }
}
