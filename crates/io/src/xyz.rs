use lidarmap_core::{CloudBuilder, PointCloud, PointRecord};
use std::fs;
use std::io::{self, BufWriter, Write as _};
use std::path::Path;

/// Writes one `x y z intensity` line per point; a missing intensity is `nan`.
pub fn write_xyz(path: impl AsRef<Path>, cloud: &PointCloud) -> io::Result<()> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    for p in cloud.iter_records() {
        match p.intensity {
            Some(i) => writeln!(out, "{} {} {} {i}", p.x, p.y, p.z)?,
            None => writeln!(out, "{} {} {} nan", p.x, p.y, p.z)?,
        }
    }
    out.flush()
}

/// Reads whitespace-separated `x y z [intensity]` lines. A `nan` intensity
/// reads back as missing.
pub fn read_xyz(path: impl AsRef<Path>) -> io::Result<PointCloud> {
    let text = fs::read_to_string(path)?;
    let mut builder = CloudBuilder::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = line
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: {e}", line_no + 1),
                )
            })?;
        let mut p = match values.as_slice() {
            [x, y, z, ..] => PointRecord::new(*x, *y, *z),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line {}: expected at least 3 values", line_no + 1),
                ))
            }
        };
        p.intensity = values.get(3).filter(|i| !i.is_nan()).map(|&i| i as f32);
        builder.push(p);
    }
    Ok(builder.finish())
}
