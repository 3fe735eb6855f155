//! JSON metadata for height maps exported from a capture.
//!
//! One document per map keeps the georeferencing (stamp, origin,
//! resolution) that the PNG itself cannot carry. An index document lists
//! every map of a capture in order.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use lidarmap_core::CellGrid;
use serde::{Deserialize, Serialize};

use crate::error::FrameJsonError;
use crate::record::HeightMapRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeightMapMetadata {
    /// Position among the capture's height maps.
    pub index: usize,
    /// Byte offset of the message in the capture.
    pub offset: usize,
    pub stamp: Option<f64>,
    pub resolution: f64,
    pub origin: [f64; 2],
    pub width: u32,
    pub height: u32,
    pub valid_cells: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl HeightMapMetadata {
    pub fn new(index: usize, map: &HeightMapRecord) -> Self {
        let range = map.grid.value_range();
        Self {
            index,
            offset: map.offset,
            stamp: map.timestamp,
            resolution: map.grid.cell_size(),
            origin: map.grid.origin(),
            width: map.grid.width(),
            height: map.grid.height(),
            valid_cells: map.grid.valid_count(),
            min: range.map(|r| r.0),
            max: range.map(|r| r.1),
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), FrameJsonError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

pub fn write_height_map_metadata(
    path: impl AsRef<Path>,
    metadata: &HeightMapMetadata,
) -> Result<(), FrameJsonError> {
    write_json(path.as_ref(), metadata)
}

/// Writes the metadata of every map as one JSON array.
pub fn write_height_map_index(
    path: impl AsRef<Path>,
    metadata: &[HeightMapMetadata],
) -> Result<(), FrameJsonError> {
    write_json(path.as_ref(), metadata)
}

pub fn read_height_map_index(path: impl AsRef<Path>) -> Result<Vec<HeightMapMetadata>, FrameJsonError> {
    Ok(serde_json::from_reader(std::io::BufReader::new(File::open(path)?))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidarmap_core::RasterGrid;

    fn map() -> HeightMapRecord {
        HeightMapRecord {
            offset: 40,
            timestamp: Some(2.5),
            grid: RasterGrid::from_cells([1.0, -2.0], 0.05, 2, 1, vec![Some(0.25), None]).unwrap(),
        }
    }

    #[test]
    fn metadata_carries_georeferencing() {
        let meta = HeightMapMetadata::new(3, &map());
        assert_eq!(meta.index, 3);
        assert_eq!(meta.offset, 40);
        assert_eq!(meta.stamp, Some(2.5));
        assert_eq!(meta.origin, [1.0, -2.0]);
        assert_eq!(meta.resolution, 0.05);
        assert_eq!((meta.width, meta.height, meta.valid_cells), (2, 1, 1));
        assert_eq!((meta.min, meta.max), (Some(0.25), Some(0.25)));
    }

    #[test]
    fn index_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("height_maps.json");
        let all = vec![HeightMapMetadata::new(0, &map()), HeightMapMetadata::new(1, &map())];
        write_height_map_index(&path, &all).unwrap();
        assert_eq!(read_height_map_index(&path).unwrap(), all);

        let single = dir.path().join("height_map_000.json");
        write_height_map_metadata(&single, &all[0]).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(single).unwrap()).unwrap();
        assert_eq!(value["stamp"], 2.5);
        assert_eq!(value["origin"][1], -2.0);
    }
}
