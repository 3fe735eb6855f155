use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use lidarmap_pipeline::PipelineConfig;
use lidarmap_raster::{Aggregation, CombineMode, ConcatAxis};

#[derive(Parser, Debug)]
#[command(author, version, about = "Turn LiDAR captures into point clouds and height maps", long_about = None)]
pub struct Cli {
    /// Pipeline settings in TOML; flags below override it.
    #[arg(long, short, global = true, env = "LIDARMAP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Decode a capture and write one frame JSON document per frame.
    Decode {
        capture: PathBuf,
        #[arg(long, short, default_value = "frames")]
        out: PathBuf,
    },
    /// Build a height map from a capture or a directory of frame JSON files.
    Map {
        input: PathBuf,
        #[arg(long, short, default_value = "map")]
        out: PathBuf,
        #[command(flatten)]
        overrides: Overrides,
        /// Also write the accumulated cloud.
        #[arg(long, value_enum)]
        cloud: Option<CloudFormat>,
        /// Rasterize each frame and write their composite.
        #[arg(long, value_enum)]
        series: Option<SeriesMode>,
    },
    /// Render the height-map messages carried in a capture.
    Heightmaps {
        capture: PathBuf,
        #[arg(long, short, default_value = "height_maps")]
        out: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
pub struct Overrides {
    #[arg(long)]
    pub cell_size: Option<f64>,
    #[arg(long, value_enum)]
    pub aggregation: Option<AggregationArg>,
    #[arg(long)]
    pub voxel_size: Option<f64>,
    /// Express the map in this frame (index in time order).
    #[arg(long)]
    pub reference_frame: Option<usize>,
    #[arg(long)]
    pub merge_window: Option<f64>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum AggregationArg {
    Max,
    Min,
    Mean,
    Count,
}

impl From<AggregationArg> for Aggregation {
    fn from(arg: AggregationArg) -> Self {
        match arg {
            AggregationArg::Max => Aggregation::Max,
            AggregationArg::Min => Aggregation::Min,
            AggregationArg::Mean => Aggregation::Mean,
            AggregationArg::Count => Aggregation::Count,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudFormat {
    Pcd,
    PcdBinary,
    Ply,
    PlyBinary,
    Xyz,
}

impl CloudFormat {
    pub fn extension(self) -> &'static str {
        match self {
            CloudFormat::Pcd | CloudFormat::PcdBinary => "pcd",
            CloudFormat::Ply | CloudFormat::PlyBinary => "ply",
            CloudFormat::Xyz => "xyz",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesMode {
    /// Use the `[combine]` section of the config.
    Config,
    Overlay,
    Blend,
    Tile,
}

impl SeriesMode {
    pub fn combine_mode(self, configured: &CombineMode) -> CombineMode {
        match self {
            SeriesMode::Config => configured.clone(),
            SeriesMode::Overlay => CombineMode::Overlay,
            SeriesMode::Blend => CombineMode::Blend { weights: None },
            SeriesMode::Tile => CombineMode::SideBySide {
                axis: ConcatAxis::Horizontal,
            },
        }
    }
}

impl Overrides {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(size) = self.cell_size {
            config.raster.cell_size = size;
        }
        if let Some(agg) = self.aggregation {
            config.raster.aggregation = agg.into();
        }
        if let Some(size) = self.voxel_size {
            config.accumulate.voxel_size = Some(size);
        }
        if let Some(index) = self.reference_frame {
            config.accumulate.reference = lidarmap_accumulate::Reference::Frame(index);
        }
        if let Some(window) = self.merge_window {
            config.assembly.merge_window = window;
        }
    }
}
