#![forbid(unsafe_code)]

//! Capture-to-height-map orchestration: each stage gets its configuration
//! as an argument and returns its output together with a report of what it
//! skipped.

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::{AccumulateConfig, ConfigError, PipelineConfig, RenderConfig};
pub use error::PipelineError;
pub use pipeline::{
    frame_series, frames_from_capture, map_frames, render_all, run, run_file, CaptureFrames,
    FrameSeries, HeightMap, RunOutput,
};
