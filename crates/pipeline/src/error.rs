use std::path::PathBuf;

use lidarmap_accumulate::AccumulationError;
use lidarmap_core::ValidationError;
use lidarmap_io::{DecodeError, FrameJsonError};
use lidarmap_raster::{CombineError, RenderError};
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("accumulation failed: {0}")]
    Accumulate(#[from] AccumulationError),

    #[error("rasterization failed: {0}")]
    Raster(#[from] ValidationError),

    #[error("combine failed: {0}")]
    Combine(#[from] CombineError),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    FrameJson(#[from] FrameJsonError),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
