use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lidarmap_core::{CellGrid, Frame, PointCloud};
use lidarmap_io::{
    read_frame_file, write_frame_file, write_height_map_index, write_height_map_metadata, write_pcd,
    write_pcd_binary, write_ply, write_ply_binary, write_xyz, HeightMapMetadata,
};
use lidarmap_pipeline::{frame_series, frames_from_capture, map_frames, render_all, PipelineConfig};
use tracing::{info, warn};

use crate::args::{CloudFormat, SeriesMode};

pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

pub fn frame_file_name(index: usize) -> String {
    format!("frame_{index:04}.json")
}

pub fn height_map_file_name(index: usize, colormap: &str) -> String {
    format!("height_map_{index:03}_{colormap}.png")
}

pub fn height_map_metadata_file_name(index: usize) -> String {
    format!("height_map_{index:03}.json")
}

fn read_capture(path: &Path, config: &PipelineConfig) -> Result<lidarmap_pipeline::CaptureFrames> {
    let bytes = fs::read(path).with_context(|| format!("reading capture {}", path.display()))?;
    let capture = frames_from_capture(&bytes, config)?;
    let report = &capture.decode;
    if !report.corrupt.is_empty() {
        warn!(
            spans = report.corrupt.len(),
            bytes = report.corrupt_bytes(),
            "capture had corrupt spans"
        );
    }
    info!(
        scans = report.scans,
        height_maps = report.height_maps,
        unknown = report.unknown,
        frames = capture.frames.len(),
        "read capture"
    );
    Ok(capture)
}

/// Frame documents of a directory, in file-name order.
fn read_frame_dir(dir: &Path) -> Result<Vec<Frame>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    paths
        .iter()
        .map(|p| read_frame_file(p).with_context(|| format!("reading frame {}", p.display())))
        .collect()
}

fn write_cloud(cloud: &PointCloud, format: CloudFormat, path: &Path) -> std::io::Result<()> {
    match format {
        CloudFormat::Pcd => write_pcd(path, cloud),
        CloudFormat::PcdBinary => write_pcd_binary(path, cloud),
        CloudFormat::Ply => write_ply(path, cloud),
        CloudFormat::PlyBinary => write_ply_binary(path, cloud),
        CloudFormat::Xyz => write_xyz(path, cloud),
    }
}

fn save_renders<G: CellGrid>(grid: &G, config: &PipelineConfig, out: &Path, name: impl Fn(&str) -> String) -> Result<()> {
    for image in render_all(grid, &config.render)? {
        let path = out.join(name(image.scale.colormap.name()));
        image.save(&path).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

pub fn decode(capture: &Path, out: &Path, config: &PipelineConfig) -> Result<()> {
    let frames = read_capture(capture, config)?.frames;
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    for (index, frame) in frames.iter().enumerate() {
        write_frame_file(out.join(frame_file_name(index)), frame)?;
    }
    info!(frames = frames.len(), out = %out.display(), "wrote frame documents");
    Ok(())
}

pub fn map(
    input: &Path,
    out: &Path,
    config: &PipelineConfig,
    cloud: Option<CloudFormat>,
    series: Option<SeriesMode>,
) -> Result<()> {
    let frames = if input.is_dir() {
        read_frame_dir(input)?
    } else {
        read_capture(input, config)?.frames
    };
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;

    let map = map_frames(&frames, config)?;
    for rejected in &map.accumulation.rejected {
        warn!(%rejected, "frame left out of the map");
    }
    save_renders(&map.raster.grid, config, out, |cmap| format!("height_map_{cmap}.png"))?;

    if let Some(format) = cloud {
        let path = out.join(format!("cloud.{}", format.extension()));
        write_cloud(&map.cloud, format, &path).with_context(|| format!("writing {}", path.display()))?;
        info!(points = map.cloud.len(), path = %path.display(), "wrote cloud");
    }

    if let Some(mode) = series {
        let mut config = config.clone();
        config.combine = mode.combine_mode(&config.combine);
        let series = frame_series(&frames, &config)?;
        save_renders(&series.composite, &config, out, |cmap| format!("composite_{cmap}.png"))?;
        info!(layers = series.rasters.len(), "wrote frame composite");
    }
    Ok(())
}

pub fn height_maps(capture: &Path, out: &Path, config: &PipelineConfig) -> Result<()> {
    let maps = read_capture(capture, config)?.height_maps;
    if maps.is_empty() {
        warn!(capture = %capture.display(), "capture carries no height maps");
        return Ok(());
    }
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let mut index = Vec::with_capacity(maps.len());
    for (i, map) in maps.iter().enumerate() {
        save_renders(&map.grid, config, out, |cmap| height_map_file_name(i, cmap))?;
        let metadata = HeightMapMetadata::new(i, map);
        write_height_map_metadata(out.join(height_map_metadata_file_name(i)), &metadata)?;
        index.push(metadata);
    }
    write_height_map_index(out.join("height_maps.json"), &index)?;
    info!(count = maps.len(), out = %out.display(), "rendered height maps");
    Ok(())
}
