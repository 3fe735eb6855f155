use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccumulationError {
    #[error(
        "frame {frame} (t = {timestamp}) has a non-rigid pose: deviation {deviation:e} exceeds {tolerance:e}"
    )]
    InvalidPose {
        frame: usize,
        timestamp: f64,
        deviation: f64,
        tolerance: f64,
    },

    #[error("reference frame {index} does not exist ({frames} frames)")]
    ReferenceOutOfRange { index: usize, frames: usize },

    #[error("reference frame {index} has a non-rigid pose (deviation {deviation:e})")]
    InvalidReference { index: usize, deviation: f64 },

    #[error("voxel size must be finite and > 0, got {0}")]
    InvalidVoxelSize(f64),
}
