use std::path::{Path, PathBuf};

use lidarmap_accumulate::{AccumulateOptions, Reference};
use lidarmap_assembly::AssemblyConfig;
use lidarmap_io::DecodeOptions;
use lidarmap_raster::{Colormap, CombineMode, RasterParams, RenderOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulateConfig {
    pub reference: Reference,
    pub pose_tolerance: f64,
    pub voxel_size: Option<f64>,
    /// Keeps only accumulated points with `z` in `[min, max]` before rasterizing.
    pub z_range: Option<[f64; 2]>,
}

impl Default for AccumulateConfig {
    fn default() -> Self {
        let options = AccumulateOptions::default();
        Self {
            reference: Reference::Identity,
            pose_tolerance: options.pose_tolerance,
            voxel_size: options.voxel_size,
            z_range: None,
        }
    }
}

impl AccumulateConfig {
    pub fn options(&self) -> AccumulateOptions {
        AccumulateOptions {
            pose_tolerance: self.pose_tolerance,
            voxel_size: self.voxel_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// One image per entry.
    pub colormaps: Vec<Colormap>,
    pub range: Option<[f64; 2]>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            colormaps: vec![Colormap::Gray, Colormap::Jet],
            range: None,
        }
    }
}

impl RenderConfig {
    pub fn options(&self) -> impl Iterator<Item = RenderOptions> + '_ {
        self.colormaps.iter().map(|&colormap| RenderOptions {
            colormap,
            range: self.range,
        })
    }
}

/// Every stage's settings. All sections and fields are optional in TOML.
///
/// ```toml
/// [assembly]
/// merge_window = 0.05
///
/// [accumulate]
/// reference = { frame = 0 }
/// voxel_size = 0.05
///
/// [raster]
/// cell_size = 0.25
/// aggregation = "max"
///
/// [combine]
/// mode = "blend"
/// weights = [1.0, 2.0]
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub decode: DecodeOptions,
    pub assembly: AssemblyConfig,
    pub accumulate: AccumulateConfig,
    pub raster: RasterParams,
    pub render: RenderConfig,
    pub combine: CombineMode,
}

fn check_tolerance(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("must be finite and >= 0, got {value}")))
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Rejects settings that would fail or panic mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decode
            .descriptor
            .layout
            .validate()
            .map_err(|reason| invalid("decode.descriptor.layout", reason))?;

        check_tolerance("assembly.merge_window", self.assembly.merge_window)?;
        check_tolerance("assembly.pose_tolerance", self.assembly.pose_tolerance)?;
        check_tolerance("accumulate.pose_tolerance", self.accumulate.pose_tolerance)?;
        if let Some(size) = self.accumulate.voxel_size {
            if !(size.is_finite() && size > 0.0) {
                return Err(invalid("accumulate.voxel_size", format!("must be finite and > 0, got {size}")));
            }
        }
        if let Some([lo, hi]) = self.accumulate.z_range {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(invalid("accumulate.z_range", format!("[{lo}, {hi}] is not a range")));
            }
        }

        self.raster
            .validate()
            .map_err(|e| invalid("raster", e.to_string()))?;
        for options in self.render.options() {
            options.validate().map_err(|e| invalid("render", e.to_string()))?;
        }
        self.combine
            .validate()
            .map_err(|e| invalid("combine", e.to_string()))?;
        Ok(())
    }
}
