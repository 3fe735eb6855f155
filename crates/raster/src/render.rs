use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use lidarmap_core::CellGrid;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::colormap::Colormap;

/// Gray pixel value reserved for no-data cells; valid cells use `1..=255`.
pub const GRAY_NO_DATA: u8 = 0;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("scale sidecar: {0}")]
    Json(#[from] serde_json::Error),

    #[error("render range [{min}, {max}] must be finite with min <= max")]
    InvalidRange { min: f64, max: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub colormap: Colormap,
    /// Fixed value range; the grid's own range when `None`.
    pub range: Option<[f64; 2]>,
}

impl RenderOptions {
    pub fn new(colormap: Colormap) -> Self {
        Self {
            colormap,
            range: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some([min, max]);
        self
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        match self.range {
            Some([min, max]) if !(min.is_finite() && max.is_finite() && min <= max) => {
                Err(RenderError::InvalidRange { min, max })
            }
            _ => Ok(()),
        }
    }
}

/// How cell values were mapped to pixels. Written next to every image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleInfo {
    /// Value mapped to the lowest data pixel; `None` when the grid had no data.
    pub min: Option<f64>,
    /// Value mapped to the highest data pixel.
    pub max: Option<f64>,
    pub bit_depth: u8,
    /// Pixel value (every channel) used for no-data cells.
    pub no_data_value: u8,
    pub colormap: Colormap,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub image: DynamicImage,
    pub scale: ScaleInfo,
}

impl RenderedImage {
    /// Writes the image as PNG and its [`ScaleInfo`] as pretty JSON next to it
    /// (same stem, `.json` extension). Returns the sidecar path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf, RenderError> {
        let path = path.as_ref();
        self.image.save_with_format(path, ImageFormat::Png)?;

        let sidecar = scale_sidecar_path(path);
        let mut writer = BufWriter::new(File::create(&sidecar)?);
        serde_json::to_writer_pretty(&mut writer, &self.scale)?;
        debug!(image = %path.display(), sidecar = %sidecar.display(), "wrote rendered image");
        Ok(sidecar)
    }
}

pub fn scale_sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}

/// Linear map of `v` from `[min, max]` to `[0, 1]`; a flat range maps to 1.
fn normalize(v: f64, min: f64, max: f64) -> f64 {
    if max > min {
        ((v - min) / (max - min)).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Renders a grid as an image, row 0 of the grid at the bottom so +Y is up.
///
/// Gray output keeps 0 for no-data and spreads valid values over 1..=255;
/// colormapped output paints no-data black.
pub fn render<G: CellGrid>(grid: &G, options: &RenderOptions) -> Result<RenderedImage, RenderError> {
    options.validate()?;
    let range = options
        .range
        .map(|[lo, hi]| (lo, hi))
        .or_else(|| grid.value_range());
    let (w, h) = (grid.width(), grid.height());
    let sample = |x: u32, y: u32| grid.cell(x, h - 1 - y);

    let image = match options.colormap {
        Colormap::Gray => DynamicImage::ImageLuma8(GrayImage::from_fn(w, h, |x, y| {
            Luma([match (sample(x, y), range) {
                (Some(v), Some((lo, hi))) => 1 + (normalize(v, lo, hi) * 254.0).round() as u8,
                _ => GRAY_NO_DATA,
            }])
        })),
        cmap => DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb(match (sample(x, y), range) {
                (Some(v), Some((lo, hi))) => cmap.rgb(normalize(v, lo, hi)),
                _ => [GRAY_NO_DATA; 3],
            })
        })),
    };

    let scale = ScaleInfo {
        min: range.map(|r| r.0),
        max: range.map(|r| r.1),
        bit_depth: 8,
        no_data_value: GRAY_NO_DATA,
        colormap: options.colormap,
        width: w,
        height: h,
    };
    info!(width = w, height = h, min = ?scale.min, max = ?scale.max, colormap = ?scale.colormap, "rendered grid");
    Ok(RenderedImage { image, scale })
}
