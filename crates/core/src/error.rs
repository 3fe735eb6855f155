use thiserror::Error;

/// Rejected value at a data-model boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("non-finite {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("cell size must be finite and > 0, got {0}")]
    NonPositiveCellSize(f64),

    #[error("grid dimensions must be non-zero, got {width}x{height}")]
    EmptyGrid { width: u32, height: u32 },

    #[error("{width}x{height} grid needs {expected} cells, got {actual}")]
    CellCountMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("{width}x{height} grid exceeds the limit of {limit} cells")]
    GridTooLarge { width: u64, height: u64, limit: u64 },

    #[error("pose needs 16 matrix elements, got {0}")]
    PoseLength(usize),
}
