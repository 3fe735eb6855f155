use serde::Serialize;

use crate::{CellGrid, ValidationError};

/// Regular XY grid of optional values produced by rasterization.
///
/// Cells are row-major: `cells[row * width + col]`, row 0 starting at
/// `origin[1]`. `cell_size` and the dimensions are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RasterGrid {
    origin: [f64; 2],
    cell_size: f64,
    width: u32,
    height: u32,
    cells: Vec<Option<f64>>,
}

impl RasterGrid {
    /// An all-no-data grid.
    pub fn new(
        origin: [f64; 2],
        cell_size: f64,
        width: u32,
        height: u32,
    ) -> Result<Self, ValidationError> {
        let n = width as usize * height as usize;
        Self::from_cells(origin, cell_size, width, height, vec![None; n])
    }

    pub fn from_cells(
        origin: [f64; 2],
        cell_size: f64,
        width: u32,
        height: u32,
        cells: Vec<Option<f64>>,
    ) -> Result<Self, ValidationError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(ValidationError::NonPositiveCellSize(cell_size));
        }
        for (field, value) in [("origin.x", origin[0]), ("origin.y", origin[1])] {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite { field, value });
            }
        }
        if width == 0 || height == 0 {
            return Err(ValidationError::EmptyGrid { width, height });
        }
        let expected = width as usize * height as usize;
        if cells.len() != expected {
            return Err(ValidationError::CellCountMismatch {
                width,
                height,
                expected,
                actual: cells.len(),
            });
        }
        if let Some(v) = cells.iter().flatten().find(|v| !v.is_finite()) {
            return Err(ValidationError::NonFinite {
                field: "cell",
                value: *v,
            });
        }
        Ok(Self {
            origin,
            cell_size,
            width,
            height,
            cells,
        })
    }

    pub fn origin(&self) -> [f64; 2] {
        self.origin
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn index(&self, col: u32, row: u32) -> Option<usize> {
        (col < self.width && row < self.height)
            .then(|| row as usize * self.width as usize + col as usize)
    }

    /// Stores `value` at `(col, row)`; out-of-range coordinates are ignored.
    pub fn set(&mut self, col: u32, row: u32, value: Option<f64>) {
        if let Some(i) = self.index(col, row) {
            self.cells[i] = value.filter(|v| v.is_finite());
        }
    }

    /// Cell containing world coordinate `(x, y)`, if inside the grid.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        let col = ((x - self.origin[0]) / self.cell_size).floor();
        let row = ((y - self.origin[1]) / self.cell_size).floor();
        if col < 0.0 || row < 0.0 || col >= self.width as f64 || row >= self.height as f64 {
            return None;
        }
        Some((col as u32, row as u32))
    }

    pub fn cell_center(&self, col: u32, row: u32) -> [f64; 2] {
        [
            self.origin[0] + (col as f64 + 0.5) * self.cell_size,
            self.origin[1] + (row as f64 + 0.5) * self.cell_size,
        ]
    }

    /// Same origin, cell size and dimensions.
    pub fn same_geometry(&self, other: &RasterGrid) -> bool {
        self.origin == other.origin
            && self.cell_size == other.cell_size
            && self.width == other.width
            && self.height == other.height
    }

    pub fn into_cells(self) -> Vec<Option<f64>> {
        self.cells
    }
}

impl CellGrid for RasterGrid {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_grid_is_all_no_data() {
        let g = RasterGrid::new([0.0, 0.0], 0.5, 3, 2).unwrap();
        assert_eq!(g.cells().len(), 6);
        assert_eq!(g.valid_count(), 0);
        assert_eq!(g.value_range(), None);
    }

    #[test]
    fn rejects_bad_cell_size() {
        assert_eq!(
            RasterGrid::new([0.0, 0.0], 0.0, 1, 1),
            Err(ValidationError::NonPositiveCellSize(0.0))
        );
        assert!(RasterGrid::new([0.0, 0.0], f64::NAN, 1, 1).is_err());
        assert!(RasterGrid::new([0.0, 0.0], -1.0, 1, 1).is_err());
    }

    #[test]
    fn rejects_cell_count_mismatch() {
        let err = RasterGrid::from_cells([0.0, 0.0], 1.0, 2, 2, vec![None; 3]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::CellCountMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn zero_is_a_valid_value() {
        let mut g = RasterGrid::new([0.0, 0.0], 1.0, 2, 2).unwrap();
        g.set(1, 0, Some(0.0));
        assert_eq!(g.cell(1, 0), Some(0.0));
        assert_eq!(g.cell(0, 0), None);
        assert_eq!(g.valid_count(), 1);
    }

    #[test]
    fn cell_of_maps_world_coordinates() {
        let g = RasterGrid::new([10.0, -5.0], 2.0, 4, 3).unwrap();
        assert_eq!(g.cell_of(10.0, -5.0), Some((0, 0)));
        assert_eq!(g.cell_of(13.9, -1.1), Some((1, 1)));
        assert_eq!(g.cell_of(18.0, 0.0), None);
        assert_eq!(g.cell_of(9.99, 0.0), None);
        assert_eq!(g.cell_center(0, 0), [11.0, -4.0]);
    }

    #[test]
    fn value_range_skips_no_data() {
        let g = RasterGrid::from_cells(
            [0.0, 0.0],
            1.0,
            3,
            1,
            vec![Some(-2.0), None, Some(7.5)],
        )
        .unwrap();
        assert_eq!(g.value_range(), Some((-2.0, 7.5)));
    }
}
