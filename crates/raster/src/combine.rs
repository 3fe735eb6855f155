use lidarmap_core::{CellGrid, CompositeImage, LayerProvenance, RasterGrid};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CombineError {
    #[error("combine needs at least one layer")]
    NoLayers,

    #[error("layer {layer} is {width}x{height}, expected {expected_width}x{expected_height} ({reason})")]
    GeometryMismatch {
        layer: usize,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
        reason: &'static str,
    },

    #[error("{weights} weights given for {layers} layers")]
    WeightCountMismatch { weights: usize, layers: usize },

    #[error("weight {index} = {value} must be finite and >= 0")]
    InvalidWeight { index: usize, value: f64 },

    #[error("concatenated layers exceed {max} cells along one axis")]
    TooLarge { max: u32 },
}

/// Direction in which side-by-side layers are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcatAxis {
    /// Left to right; heights must match.
    #[default]
    Horizontal,
    /// Bottom to top; widths must match.
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CombineMode {
    /// Later layers' valid cells replace earlier ones.
    #[default]
    Overlay,
    SideBySide {
        #[serde(default)]
        axis: ConcatAxis,
    },
    /// Per-cell weighted mean over the layers with data; uniform weights
    /// when `weights` is `None`.
    Blend {
        #[serde(default)]
        weights: Option<Vec<f64>>,
    },
}

impl CombineMode {
    /// Checks what can be checked without the layers.
    pub fn validate(&self) -> Result<(), CombineError> {
        if let CombineMode::Blend { weights: Some(w) } = self {
            check_weights(w)?;
        }
        Ok(())
    }
}

fn check_weights(weights: &[f64]) -> Result<(), CombineError> {
    match weights
        .iter()
        .enumerate()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        Some((index, &value)) => Err(CombineError::InvalidWeight { index, value }),
        None => Ok(()),
    }
}

fn provenance(layer: usize, grid: &RasterGrid, offset: [u32; 2], weight: Option<f64>) -> LayerProvenance {
    LayerProvenance {
        layer,
        origin: grid.origin(),
        cell_size: grid.cell_size(),
        width: grid.width(),
        height: grid.height(),
        offset,
        weight,
    }
}

fn require_same_geometry(layers: &[RasterGrid]) -> Result<(), CombineError> {
    let first = &layers[0];
    for (layer, grid) in layers.iter().enumerate().skip(1) {
        if !grid.same_geometry(first) {
            let reason = if grid.width() != first.width() || grid.height() != first.height() {
                "size differs"
            } else if grid.cell_size() != first.cell_size() {
                "cell size differs"
            } else {
                "origin differs"
            };
            return Err(CombineError::GeometryMismatch {
                layer,
                width: grid.width(),
                height: grid.height(),
                expected_width: first.width(),
                expected_height: first.height(),
                reason,
            });
        }
    }
    Ok(())
}

fn overlay(layers: &[RasterGrid]) -> Result<CompositeImage, CombineError> {
    require_same_geometry(layers)?;
    let first = &layers[0];
    let mut cells = first.cells().to_vec();
    for grid in &layers[1..] {
        for (out, cell) in cells.iter_mut().zip(grid.cells()) {
            if cell.is_some() {
                *out = *cell;
            }
        }
    }
    Ok(CompositeImage {
        width: first.width(),
        height: first.height(),
        cells,
        layers: layers
            .iter()
            .enumerate()
            .map(|(i, g)| provenance(i, g, [0, 0], None))
            .collect(),
    })
}

/// Sum of the layer lengths along the concatenation axis.
fn concat_len(lengths: impl IntoIterator<Item = u32>) -> Result<u32, CombineError> {
    lengths
        .into_iter()
        .try_fold(0u32, |total, n| total.checked_add(n))
        .ok_or(CombineError::TooLarge { max: u32::MAX })
}

fn side_by_side(layers: &[RasterGrid], axis: ConcatAxis) -> Result<CompositeImage, CombineError> {
    let first = &layers[0];
    for (layer, grid) in layers.iter().enumerate().skip(1) {
        let fits = match axis {
            ConcatAxis::Horizontal => grid.height() == first.height(),
            ConcatAxis::Vertical => grid.width() == first.width(),
        };
        if !fits {
            return Err(CombineError::GeometryMismatch {
                layer,
                width: grid.width(),
                height: grid.height(),
                expected_width: first.width(),
                expected_height: first.height(),
                reason: match axis {
                    ConcatAxis::Horizontal => "heights differ",
                    ConcatAxis::Vertical => "widths differ",
                },
            });
        }
    }

    let (width, height) = match axis {
        ConcatAxis::Horizontal => (concat_len(layers.iter().map(|g| g.width()))?, first.height()),
        ConcatAxis::Vertical => (first.width(), concat_len(layers.iter().map(|g| g.height()))?),
    };
    let mut cells = vec![None; width as usize * height as usize];
    let mut provenances = Vec::with_capacity(layers.len());
    let mut offset = [0u32; 2];

    for (layer, grid) in layers.iter().enumerate() {
        let w = grid.width() as usize;
        for row in 0..grid.height() as usize {
            let src = &grid.cells()[row * w..(row + 1) * w];
            let start = (offset[1] as usize + row) * width as usize + offset[0] as usize;
            cells[start..start + w].copy_from_slice(src);
        }
        provenances.push(provenance(layer, grid, offset, None));
        match axis {
            ConcatAxis::Horizontal => offset[0] += grid.width(),
            ConcatAxis::Vertical => offset[1] += grid.height(),
        }
    }

    Ok(CompositeImage {
        width,
        height,
        cells,
        layers: provenances,
    })
}

fn blend(layers: &[RasterGrid], weights: Option<&[f64]>) -> Result<CompositeImage, CombineError> {
    require_same_geometry(layers)?;
    let weights: Vec<f64> = match weights {
        Some(w) if w.len() != layers.len() => {
            return Err(CombineError::WeightCountMismatch {
                weights: w.len(),
                layers: layers.len(),
            })
        }
        Some(w) => {
            check_weights(w)?;
            w.to_vec()
        }
        None => vec![1.0; layers.len()],
    };

    let first = &layers[0];
    let n = first.cells().len();
    let mut sum = vec![0.0f64; n];
    let mut total = vec![0.0f64; n];
    for (grid, &w) in layers.iter().zip(&weights) {
        for (i, cell) in grid.cells().iter().enumerate() {
            if let Some(v) = cell {
                sum[i] += w * v;
                total[i] += w;
            }
        }
    }

    // A cell whose contributing weights sum to zero has nothing to average.
    let cells = sum
        .iter()
        .zip(&total)
        .map(|(&s, &t)| (t > 0.0).then(|| s / t).filter(|v| v.is_finite()))
        .collect();

    Ok(CompositeImage {
        width: first.width(),
        height: first.height(),
        cells,
        layers: layers
            .iter()
            .zip(&weights)
            .enumerate()
            .map(|(i, (g, &w))| provenance(i, g, [0, 0], Some(w)))
            .collect(),
    })
}

/// Merges ordered grids into one composite.
///
/// `Overlay` and `Blend` require identical geometry across layers;
/// `SideBySide` only requires the non-concatenated dimension to match.
/// No-data never overwrites data and never contributes to a blend.
#[instrument(skip_all, fields(layers = layers.len(), mode = ?mode))]
pub fn combine(layers: &[RasterGrid], mode: &CombineMode) -> Result<CompositeImage, CombineError> {
    if layers.is_empty() {
        return Err(CombineError::NoLayers);
    }
    let composite = match mode {
        CombineMode::Overlay => overlay(layers)?,
        CombineMode::SideBySide { axis } => side_by_side(layers, *axis)?,
        CombineMode::Blend { weights } => blend(layers, weights.as_deref())?,
    };
    debug!(
        width = composite.width,
        height = composite.height,
        valid = composite.valid_count(),
        "combined layers"
    );
    Ok(composite)
}
