use serde::{Deserialize, Serialize};

use crate::CellGrid;

/// Where one input layer landed in a composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerProvenance {
    /// Position of the layer in the combiner's input.
    pub layer: usize,
    pub origin: [f64; 2],
    pub cell_size: f64,
    pub width: u32,
    pub height: u32,
    /// Column/row of the layer's first cell inside the composite.
    pub offset: [u32; 2],
    pub weight: Option<f64>,
}

/// Output of the image combiner: a value grid plus the layers it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeImage {
    pub width: u32,
    pub height: u32,
    pub cells: Vec<Option<f64>>,
    pub layers: Vec<LayerProvenance>,
}

impl CellGrid for CompositeImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn cells(&self) -> &[Option<f64>] {
        &self.cells
    }
}
