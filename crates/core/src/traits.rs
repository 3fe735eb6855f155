/// Row-major grid of optional cell values, `None` meaning no-data.
pub trait CellGrid {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn cells(&self) -> &[Option<f64>];

    fn cell(&self, col: u32, row: u32) -> Option<f64> {
        if col >= self.width() || row >= self.height() {
            return None;
        }
        self.cells()[row as usize * self.width() as usize + col as usize]
    }

    /// Minimum and maximum over valid cells.
    fn value_range(&self) -> Option<(f64, f64)> {
        self.cells()
            .iter()
            .flatten()
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
            })
    }

    fn valid_count(&self) -> usize {
        self.cells().iter().filter(|c| c.is_some()).count()
    }
}
