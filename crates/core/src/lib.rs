#![forbid(unsafe_code)]

pub mod bbox;
pub mod cloud;
pub mod composite;
pub mod error;
pub mod frame;
pub mod grid;
pub mod point;
pub mod pose;
pub mod traits;

pub use bbox::Aabb;
pub use cloud::{CloudBuilder, CloudStats, PointCloud};
pub use composite::{CompositeImage, LayerProvenance};
pub use error::ValidationError;
pub use frame::Frame;
pub use grid::RasterGrid;
pub use point::{PointRecord, RING_NONE};
pub use pose::Pose;
pub use traits::CellGrid;
