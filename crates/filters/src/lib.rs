#![forbid(unsafe_code)]

pub mod passthrough;
pub mod voxel_downsample;

pub use passthrough::{passthrough_filter, Axis};
pub use voxel_downsample::voxel_downsample;
