use lidarmap_core::{CloudBuilder, PointCloud, PointRecord, RING_NONE};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

/// Reads a PCD file (ASCII or binary format).
///
/// `x`, `y` and `z` are required; `intensity` and `ring` are picked up when
/// present. Other fields are skipped.
pub fn read_pcd(path: impl AsRef<Path>) -> io::Result<PointCloud> {
    let raw = fs::read(path)?;

    let data_offset = find_data_line_end(&raw).ok_or_else(|| invalid("PCD file missing DATA line"))?;
    let header = std::str::from_utf8(&raw[..data_offset])
        .map_err(|_| invalid("PCD header is not valid UTF-8"))?;
    let header = Header::parse(header)?;
    let body = &raw[data_offset..];

    match header.format {
        DataFormat::Ascii => read_pcd_ascii(body, &header),
        DataFormat::Binary => read_pcd_binary(body, &header),
    }
}

/// Writes a PCD file in ASCII format.
pub fn write_pcd(path: impl AsRef<Path>, cloud: &PointCloud) -> io::Result<()> {
    let channels = Channels::of(cloud);
    let mut out = header(cloud, &channels, "ascii");

    for p in cloud.iter_records() {
        // Infallible on String.
        let _ = write!(out, "{} {} {}", p.x, p.y, p.z);
        if channels.intensity {
            let _ = write!(out, " {}", p.intensity.unwrap_or(f32::NAN));
        }
        if channels.ring {
            let _ = write!(out, " {}", p.ring.unwrap_or(RING_NONE));
        }
        out.push('\n');
    }

    fs::write(path, out)
}

/// Writes a PCD file in binary format.
pub fn write_pcd_binary(path: impl AsRef<Path>, cloud: &PointCloud) -> io::Result<()> {
    let channels = Channels::of(cloud);
    let header = header(cloud, &channels, "binary");
    let mut buf = Vec::with_capacity(header.len() + cloud.len() * channels.point_size());
    buf.extend_from_slice(header.as_bytes());

    for i in 0..cloud.len() {
        buf.extend_from_slice(&cloud.x()[i].to_le_bytes());
        buf.extend_from_slice(&cloud.y()[i].to_le_bytes());
        buf.extend_from_slice(&cloud.z()[i].to_le_bytes());
        if channels.intensity {
            buf.extend_from_slice(&cloud.intensity()[i].to_le_bytes());
        }
        if channels.ring {
            buf.push(cloud.ring()[i]);
        }
    }

    fs::write(path, buf)
}

// --- Internal helpers ---

/// Optional columns a cloud actually carries.
struct Channels {
    intensity: bool,
    ring: bool,
}

impl Channels {
    fn of(cloud: &PointCloud) -> Self {
        Self {
            intensity: cloud.has_intensity(),
            ring: cloud.ring().iter().any(|&r| r != RING_NONE),
        }
    }

    fn point_size(&self) -> usize {
        24 + if self.intensity { 4 } else { 0 } + if self.ring { 1 } else { 0 }
    }
}

fn header(cloud: &PointCloud, channels: &Channels, data: &str) -> String {
    let mut fields = vec!["x", "y", "z"];
    let mut sizes = vec!["8", "8", "8"];
    let mut types = vec!["F", "F", "F"];
    if channels.intensity {
        fields.push("intensity");
        sizes.push("4");
        types.push("F");
    }
    if channels.ring {
        fields.push("ring");
        sizes.push("1");
        types.push("U");
    }
    let counts = vec!["1"; fields.len()];

    let mut out = String::new();
    out.push_str("# .PCD v0.7 - Point Cloud Data file format\n");
    out.push_str("VERSION 0.7\n");
    out.push_str(&format!("FIELDS {}\n", fields.join(" ")));
    out.push_str(&format!("SIZE {}\n", sizes.join(" ")));
    out.push_str(&format!("TYPE {}\n", types.join(" ")));
    out.push_str(&format!("COUNT {}\n", counts.join(" ")));
    out.push_str(&format!("WIDTH {}\n", cloud.len()));
    out.push_str("HEIGHT 1\n");
    out.push_str("VIEWPOINT 0 0 0 1 0 0 0\n");
    out.push_str(&format!("POINTS {}\n", cloud.len()));
    out.push_str(&format!("DATA {data}\n"));
    out
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[derive(Debug, PartialEq)]
enum DataFormat {
    Ascii,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Field {
    size: usize,
    kind: u8,
}

impl Field {
    fn read(&self, b: &[u8]) -> Option<f64> {
        let arr = |n: usize| b.get(..n);
        Some(match (self.kind, self.size) {
            (b'F', 4) => f32::from_le_bytes(arr(4)?.try_into().ok()?) as f64,
            (b'F', 8) => f64::from_le_bytes(arr(8)?.try_into().ok()?),
            (b'U', 1) => *b.first()? as f64,
            (b'U', 2) => u16::from_le_bytes(arr(2)?.try_into().ok()?) as f64,
            (b'U', 4) => u32::from_le_bytes(arr(4)?.try_into().ok()?) as f64,
            (b'I', 1) => i8::from_le_bytes(arr(1)?.try_into().ok()?) as f64,
            (b'I', 2) => i16::from_le_bytes(arr(2)?.try_into().ok()?) as f64,
            (b'I', 4) => i32::from_le_bytes(arr(4)?.try_into().ok()?) as f64,
            _ => return None,
        })
    }
}

struct Header {
    format: DataFormat,
    points: usize,
    names: Vec<String>,
    fields: Vec<Field>,
}

impl Header {
    fn parse(text: &str) -> io::Result<Self> {
        let mut format = None;
        let mut points = None;
        let mut width = None;
        let mut names = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let mut sizes: Vec<usize> = Vec::new();
        let mut types: Vec<u8> = Vec::new();

        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else { continue };
            let rest: Vec<&str> = parts.collect();
            let count = |what: &str| -> io::Result<usize> {
                rest.first()
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| invalid(format!("invalid {what} value")))
            };
            match key {
                "FIELDS" => names = rest.iter().map(|s| s.to_string()).collect(),
                "SIZE" => {
                    sizes = rest
                        .iter()
                        .map(|s| s.parse().map_err(|_| invalid("invalid SIZE value")))
                        .collect::<io::Result<_>>()?
                }
                "TYPE" => types = rest.iter().filter_map(|s| s.bytes().next()).collect(),
                "POINTS" => points = Some(count("POINTS")?),
                "WIDTH" => width = Some(count("WIDTH")?),
                "DATA" => {
                    format = Some(match rest.first().copied() {
                        Some("ascii") => DataFormat::Ascii,
                        Some("binary") => DataFormat::Binary,
                        other => {
                            return Err(io::Error::new(
                                io::ErrorKind::Unsupported,
                                format!("unsupported PCD DATA format: {}", other.unwrap_or("")),
                            ))
                        }
                    })
                }
                _ => {}
            }
        }

        let format = format.ok_or_else(|| invalid("PCD file missing DATA line"))?;
        let points = points
            .or(width)
            .ok_or_else(|| invalid("PCD file missing POINTS/WIDTH header"))?;
        if sizes.is_empty() {
            sizes = vec![4; names.len()];
        }
        if types.is_empty() {
            types = vec![b'F'; names.len()];
        }
        if sizes.len() != names.len() || types.len() != names.len() {
            return Err(invalid("FIELDS, SIZE and TYPE disagree in length"));
        }
        for n in ["x", "y", "z"] {
            if !names.iter().any(|f| f == n) {
                return Err(invalid("PCD file missing x, y, z fields"));
            }
        }
        let fields = sizes
            .into_iter()
            .zip(types)
            .map(|(size, kind)| Field { size, kind })
            .collect();

        Ok(Self {
            format,
            points,
            names,
            fields,
        })
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    fn to_record(&self, values: &[f64]) -> PointRecord {
        let get = |name: &str| self.index(name).and_then(|i| values.get(i).copied());
        let mut p = PointRecord::new(
            get("x").unwrap_or(f64::NAN),
            get("y").unwrap_or(f64::NAN),
            get("z").unwrap_or(f64::NAN),
        );
        p.intensity = get("intensity").map(|v| v as f32).filter(|v| !v.is_nan());
        p.ring = get("ring")
            .filter(|r| (0.0..RING_NONE as f64).contains(r))
            .map(|r| r as u8);
        p
    }
}

/// Finds the byte offset just past the newline ending the DATA line.
fn find_data_line_end(raw: &[u8]) -> Option<usize> {
    let data_marker = b"DATA";
    for i in 0..raw.len().saturating_sub(data_marker.len() - 1) {
        if (i == 0 || raw[i - 1] == b'\n') && raw[i..].starts_with(data_marker) {
            if let Some(offset) = raw[i..].iter().position(|&b| b == b'\n') {
                return Some(i + offset + 1);
            }
            return Some(raw.len());
        }
    }
    None
}

fn read_pcd_ascii(body: &[u8], header: &Header) -> io::Result<PointCloud> {
    let content = std::str::from_utf8(body)
        .map_err(|e| invalid(format!("invalid UTF-8: {}", e)))?;

    let mut builder = CloudBuilder::with_capacity(header.points);
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = line
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| invalid(format!("invalid PCD value: {e}")))?;
        if values.len() < header.names.len() {
            return Err(invalid(format!(
                "PCD row has {} values, expected {}",
                values.len(),
                header.names.len()
            )));
        }
        builder.push(header.to_record(&values));
    }
    Ok(builder.finish())
}

fn read_pcd_binary(body: &[u8], header: &Header) -> io::Result<PointCloud> {
    let point_size: usize = header.fields.iter().map(|f| f.size).sum();
    let expected_size = header.points * point_size;
    if body.len() < expected_size {
        return Err(invalid(format!(
            "binary PCD data too short: have {} bytes, expected {} ({} points x {} bytes)",
            body.len(),
            expected_size,
            header.points,
            point_size
        )));
    }

    let mut builder = CloudBuilder::with_capacity(header.points);
    let mut values = vec![0.0; header.fields.len()];
    for chunk in body[..expected_size].chunks_exact(point_size.max(1)) {
        let mut at = 0;
        for (v, field) in values.iter_mut().zip(&header.fields) {
            *v = field
                .read(&chunk[at..])
                .ok_or_else(|| invalid(format!("unsupported PCD field type {}{}", field.kind as char, field.size)))?;
            at += field.size;
        }
        builder.push(header.to_record(&values));
    }
    Ok(builder.finish())
}
