#![forbid(unsafe_code)]

//! Height-map projection of point clouds, grid compositing and image output.

pub mod colormap;
pub mod combine;
pub mod rasterize;
pub mod render;

pub use colormap::Colormap;
pub use combine::{combine, CombineError, CombineMode, ConcatAxis};
pub use rasterize::{
    rasterize, rasterize_series, Aggregation, Bounds, RasterParams, RasterReport, RasterValue,
    Rasterized,
};
pub use render::{render, scale_sidecar_path, RenderError, RenderOptions, RenderedImage, ScaleInfo, GRAY_NO_DATA};
