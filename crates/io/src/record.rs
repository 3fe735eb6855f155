use lidarmap_core::{Pose, RasterGrid};

/// A point as it came off the wire, before canonicalization.
///
/// Channels keep the range of their wire type: intensity may be a `u8`
/// count, a `u16` or a float; ring may exceed what the canonical `u8` holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: Option<f64>,
    pub ring: Option<u32>,
}

impl RawPoint {
    pub fn xyz(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            intensity: None,
            ring: None,
        }
    }
}

/// One decoded scan message.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    /// Byte offset of the message in the capture.
    pub offset: usize,
    /// Seconds, if the message carried a timestamp.
    pub timestamp: Option<f64>,
    pub pose: Option<Pose>,
    pub points: Vec<RawPoint>,
}

/// A pre-rasterized height map carried in the capture.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMapRecord {
    pub offset: usize,
    pub timestamp: Option<f64>,
    pub grid: RasterGrid,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRecord {
    Scan(ScanRecord),
    HeightMap(HeightMapRecord),
}

impl DecodedRecord {
    pub fn offset(&self) -> usize {
        match self {
            DecodedRecord::Scan(s) => s.offset,
            DecodedRecord::HeightMap(h) => h.offset,
        }
    }

    pub fn as_scan(&self) -> Option<&ScanRecord> {
        match self {
            DecodedRecord::Scan(s) => Some(s),
            DecodedRecord::HeightMap(_) => None,
        }
    }
}
