use std::fmt;
use std::ops::Range;

use lidarmap_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeErrorKind {
    /// The capture ended in the middle of a record.
    Truncated,
    /// Framing or count fields disagree with the bytes present.
    MalformedHeader,
    /// The capture as a whole cannot be read with this descriptor.
    UnsupportedFormat,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorKind::Truncated => write!(f, "truncated record"),
            DecodeErrorKind::MalformedHeader => write!(f, "malformed header"),
            DecodeErrorKind::UnsupportedFormat => write!(f, "unsupported format"),
        }
    }
}

/// A corrupt span of the capture, or a fatal format mismatch.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} at bytes {start}..{end}: {detail}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub start: usize,
    pub end: usize,
    pub detail: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, span: Range<usize>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            start: span.start,
            end: span.end,
            detail: detail.into(),
        }
    }

    pub fn truncated(span: Range<usize>, detail: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::Truncated, span, detail)
    }

    pub fn malformed(span: Range<usize>, detail: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::MalformedHeader, span, detail)
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::new(DecodeErrorKind::UnsupportedFormat, 0..0, detail)
    }

    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind != DecodeErrorKind::UnsupportedFormat
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("record {record} point {point}: layout requires {channel} but the point has none")]
    MissingChannel {
        record: usize,
        point: usize,
        channel: &'static str,
    },

    #[error("record {record} point {point}: {channel} = {value} does not fit the layout type")]
    ValueOutOfRange {
        record: usize,
        point: usize,
        channel: &'static str,
        value: f64,
    },

    #[error("record {record} has {points} points, more than a u32 count holds")]
    TooManyPoints { record: usize, points: usize },

    #[error("invalid layout: {0}")]
    Layout(String),
}

#[derive(Debug, Error)]
pub enum FrameJsonError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("point {index}: expected [x, y, z, intensity?, ring?], got {len} values")]
    PointArity { index: usize, len: usize },

    #[error("point {index}: {source}")]
    Point {
        index: usize,
        source: ValidationError,
    },

    #[error("invalid frame: {0}")]
    Validation(#[from] ValidationError),
}
