use std::path::Path;

use lidarmap_accumulate::{accumulate, accumulate_each, AccumulationError, AccumulationReport};
use lidarmap_assembly::{assemble, AssemblyReport};
use lidarmap_core::{CellGrid, CompositeImage, Frame, PointCloud, RasterGrid};
use lidarmap_filters::{passthrough_filter, Axis};
use lidarmap_io::{decode, DecodeReport, DecodedRecord, HeightMapRecord};
use lidarmap_raster::{combine, rasterize, rasterize_series, render, RenderedImage, Rasterized};
use tracing::{info, instrument};

use crate::config::{PipelineConfig, RenderConfig};
use crate::error::PipelineError;

/// Frames and pre-rasterized height maps recovered from one capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFrames {
    pub frames: Vec<Frame>,
    pub height_maps: Vec<HeightMapRecord>,
    pub decode: DecodeReport,
    pub assembly: AssemblyReport,
}

/// Accumulated cloud and its raster.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMap {
    pub cloud: PointCloud,
    pub raster: Rasterized,
    pub accumulation: AccumulationReport,
    /// Points removed by the `z_range` crop.
    pub cropped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub capture: CaptureFrames,
    pub map: HeightMap,
}

/// One raster per frame on a shared geometry, plus their composite.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSeries {
    pub rasters: Vec<Rasterized>,
    pub composite: CompositeImage,
    pub rejected: Vec<AccumulationError>,
}

fn crop(cloud: PointCloud, z_range: Option<[f64; 2]>) -> (PointCloud, usize) {
    match z_range {
        Some([lo, hi]) => {
            let kept = passthrough_filter(&cloud, Axis::Z, lo, hi);
            let removed = cloud.len() - kept.len();
            (kept, removed)
        }
        None => (cloud, 0),
    }
}

/// Decodes and assembles a capture held in memory.
#[instrument(skip_all, fields(bytes = bytes.len()))]
pub fn frames_from_capture(bytes: &[u8], config: &PipelineConfig) -> Result<CaptureFrames, PipelineError> {
    config.validate()?;
    let decoded = decode(bytes, &config.decode)?;
    let assembly = assemble(decoded.scans(), &config.assembly);
    let height_maps = decoded
        .records
        .into_iter()
        .filter_map(|record| match record {
            DecodedRecord::HeightMap(map) => Some(map),
            DecodedRecord::Scan(_) => None,
        })
        .collect();
    Ok(CaptureFrames {
        frames: assembly.frames,
        height_maps,
        decode: decoded.report,
        assembly: assembly.report,
    })
}

/// Accumulates frames, applies the optional z crop and rasterizes.
#[instrument(skip_all, fields(frames = frames.len()))]
pub fn map_frames(frames: &[Frame], config: &PipelineConfig) -> Result<HeightMap, PipelineError> {
    config.validate()?;
    let accumulation = accumulate(frames, config.accumulate.reference, &config.accumulate.options())?;
    let (cloud, cropped) = crop(accumulation.cloud, config.accumulate.z_range);
    let raster = rasterize(&cloud, &config.raster)?;
    info!(
        points = cloud.len(),
        cropped,
        width = raster.grid.width(),
        height = raster.grid.height(),
        cells = raster.grid.valid_count(),
        "built height map"
    );
    Ok(HeightMap {
        cloud,
        raster,
        accumulation: accumulation.report,
        cropped,
    })
}

/// Capture bytes to height map. The config is validated before any work.
pub fn run(bytes: &[u8], config: &PipelineConfig) -> Result<RunOutput, PipelineError> {
    config.validate()?;
    let capture = frames_from_capture(bytes, config)?;
    let map = map_frames(&capture.frames, config)?;
    Ok(RunOutput { capture, map })
}

/// Reads a capture file and runs the whole pipeline on it.
pub fn run_file(path: impl AsRef<Path>, config: &PipelineConfig) -> Result<RunOutput, PipelineError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    run(&bytes, config)
}

/// Rasterizes every frame separately on one shared grid and combines the
/// rasters with the configured mode.
#[instrument(skip_all, fields(frames = frames.len(), mode = ?config.combine))]
pub fn frame_series(frames: &[Frame], config: &PipelineConfig) -> Result<FrameSeries, PipelineError> {
    config.validate()?;
    let per_frame = accumulate_each(frames, config.accumulate.reference, &config.accumulate.options())?;
    let mut rejected = Vec::new();
    let clouds: Vec<PointCloud> = per_frame
        .into_iter()
        .map(|acc| {
            rejected.extend(acc.report.rejected);
            crop(acc.cloud, config.accumulate.z_range).0
        })
        .collect();

    let rasters = rasterize_series(&clouds, &config.raster)?;
    let grids: Vec<RasterGrid> = rasters.iter().map(|r| r.grid.clone()).collect();
    let composite = combine(&grids, &config.combine)?;
    Ok(FrameSeries {
        rasters,
        composite,
        rejected,
    })
}

/// One image per configured colormap.
pub fn render_all<G: CellGrid>(grid: &G, config: &RenderConfig) -> Result<Vec<RenderedImage>, PipelineError> {
    config
        .options()
        .map(|options| render(grid, &options).map_err(PipelineError::from))
        .collect()
}
