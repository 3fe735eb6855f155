#![forbid(unsafe_code)]

//! Offline LiDAR capture processing: decode captures, assemble frames,
//! accumulate them into one point cloud and project it onto height maps.
//!
//! Each stage lives in its own crate; this one re-exports them.

pub use lidarmap_core::*;

pub mod io {
    pub use lidarmap_io::*;
}

pub mod assembly {
    pub use lidarmap_assembly::*;
}

pub mod filters {
    pub use lidarmap_filters::*;
}

pub mod accumulate {
    pub use lidarmap_accumulate::*;
}

pub mod raster {
    pub use lidarmap_raster::*;
}

pub mod pipeline {
    pub use lidarmap_pipeline::*;
}
