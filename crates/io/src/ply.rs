use lidarmap_core::{CloudBuilder, PointCloud, PointRecord, RING_NONE};
use std::fs;
use std::io::{self, BufWriter, Write as _};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
}

/// Property type as declared in the PLY header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropType {
    Double,
    Float,
    Ushort,
    Uchar,
}

impl PropType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "double" | "float64" => Some(PropType::Double),
            "float" | "float32" => Some(PropType::Float),
            "ushort" | "uint16" => Some(PropType::Ushort),
            "uchar" | "uint8" => Some(PropType::Uchar),
            _ => None,
        }
    }

    fn byte_size(self) -> usize {
        match self {
            PropType::Double => 8,
            PropType::Float => 4,
            PropType::Ushort => 2,
            PropType::Uchar => 1,
        }
    }

    fn read_le(self, b: &[u8]) -> f64 {
        match self {
            PropType::Double => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
            PropType::Float => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            PropType::Ushort => u16::from_le_bytes([b[0], b[1]]) as f64,
            PropType::Uchar => b[0] as f64,
        }
    }
}

/// Parsed header information.
struct PlyHeader {
    format: PlyFormat,
    vertex_count: usize,
    property_names: Vec<String>,
    property_types: Vec<PropType>,
    header_end_offset: usize, // byte offset just after "end_header\n"
}

impl PlyHeader {
    fn index(&self, name: &str) -> Option<usize> {
        self.property_names.iter().position(|n| n == name)
    }

    fn to_record(&self, values: &[f64]) -> PointRecord {
        let get = |name: &str| self.index(name).map(|i| values[i]);
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

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn parse_ply_header(data: &[u8]) -> io::Result<PlyHeader> {
    let end_marker = b"end_header\n";
    let header_end =
        find_bytes(data, end_marker).ok_or_else(|| invalid("missing end_header in PLY file"))?;
    let header_end_offset = header_end + end_marker.len();

    let header_text = std::str::from_utf8(&data[..header_end])
        .map_err(|_| invalid("PLY header not valid UTF-8"))?;

    let mut format = None;
    let mut vertex_count: usize = 0;
    let mut property_names: Vec<String> = Vec::new();
    let mut property_types: Vec<PropType> = Vec::new();
    let mut in_vertex_element = false;

    let mut lines = header_text.lines().map(str::trim);
    if lines.next() != Some("ply") {
        return Err(invalid("file does not start with 'ply'"));
    }

    for line in lines {
        if line.starts_with("format") {
            if line.contains("ascii") {
                format = Some(PlyFormat::Ascii);
            } else if line.contains("binary_little_endian") {
                format = Some(PlyFormat::BinaryLittleEndian);
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("unsupported PLY format: {}", line),
                ));
            }
        } else if line.starts_with("element vertex") {
            in_vertex_element = true;
            vertex_count = line
                .split_whitespace()
                .nth(2)
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| invalid("invalid element vertex line"))?;
        } else if line.starts_with("element") {
            in_vertex_element = false;
        } else if line.starts_with("property") && in_vertex_element {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                let ptype = PropType::parse(parts[1]).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::Unsupported,
                        format!("unsupported property type: {}", parts[1]),
                    )
                })?;
                property_types.push(ptype);
                property_names.push(parts[2].to_string());
            }
        }
    }

    let format = format.ok_or_else(|| invalid("PLY format line missing"))?;

    Ok(PlyHeader {
        format,
        vertex_count,
        property_names,
        property_types,
        header_end_offset,
    })
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub fn read_ply(path: impl AsRef<Path>) -> io::Result<PointCloud> {
    let data = fs::read(&path)?;
    let header = parse_ply_header(&data)?;

    if ["x", "y", "z"].iter().any(|n| header.index(n).is_none()) {
        return Err(invalid("PLY file missing required x, y, z properties"));
    }

    let body = &data[header.header_end_offset..];
    let n_props = header.property_types.len();
    let mut builder = CloudBuilder::with_capacity(header.vertex_count);
    let mut values = vec![0.0; n_props];

    match header.format {
        PlyFormat::Ascii => {
            let body =
                std::str::from_utf8(body).map_err(|_| invalid("PLY body not valid UTF-8"))?;
            for line in body
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .take(header.vertex_count)
            {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < n_props {
                    return Err(invalid(format!(
                        "vertex line has {} values, expected {}",
                        parts.len(),
                        n_props
                    )));
                }
                for (v, s) in values.iter_mut().zip(&parts) {
                    *v = s
                        .parse::<f64>()
                        .map_err(|e| invalid(format!("invalid PLY value: {e}")))?;
                }
                builder.push(header.to_record(&values));
            }
            if builder.len() < header.vertex_count {
                return Err(invalid(format!(
                    "PLY declares {} vertices, found {}",
                    header.vertex_count,
                    builder.len()
                )));
            }
        }
        PlyFormat::BinaryLittleEndian => {
            let stride: usize = header.property_types.iter().map(|t| t.byte_size()).sum();
            let needed = stride * header.vertex_count;
            if body.len() < needed {
                return Err(invalid(format!(
                    "binary PLY body too short: have {} bytes, expected {}",
                    body.len(),
                    needed
                )));
            }
            for vertex in body[..needed].chunks_exact(stride.max(1)) {
                let mut at = 0;
                for (v, t) in values.iter_mut().zip(&header.property_types) {
                    *v = t.read_le(&vertex[at..]);
                    at += t.byte_size();
                }
                builder.push(header.to_record(&values));
            }
        }
    }

    Ok(builder.finish())
}

fn write_header(
    out: &mut impl io::Write,
    format: &str,
    cloud: &PointCloud,
    with_intensity: bool,
    with_ring: bool,
) -> io::Result<()> {
    writeln!(out, "ply")?;
    writeln!(out, "format {} 1.0", format)?;
    writeln!(out, "element vertex {}", cloud.len())?;
    writeln!(out, "property double x")?;
    writeln!(out, "property double y")?;
    writeln!(out, "property double z")?;
    if with_intensity {
        writeln!(out, "property float intensity")?;
    }
    if with_ring {
        writeln!(out, "property uchar ring")?;
    }
    writeln!(out, "end_header")
}

fn has_ring(cloud: &PointCloud) -> bool {
    cloud.ring().iter().any(|&r| r != RING_NONE)
}

/// Writes an ASCII PLY; intensity and ring are written when any point has them.
pub fn write_ply(path: impl AsRef<Path>, cloud: &PointCloud) -> io::Result<()> {
    let (with_intensity, with_ring) = (cloud.has_intensity(), has_ring(cloud));
    let mut out = BufWriter::new(fs::File::create(path)?);
    write_header(&mut out, "ascii", cloud, with_intensity, with_ring)?;

    for i in 0..cloud.len() {
        write!(out, "{} {} {}", cloud.x()[i], cloud.y()[i], cloud.z()[i])?;
        if with_intensity {
            write!(out, " {}", cloud.intensity()[i])?;
        }
        if with_ring {
            write!(out, " {}", cloud.ring()[i])?;
        }
        writeln!(out)?;
    }

    out.flush()
}

/// Writes a binary little-endian PLY.
pub fn write_ply_binary(path: impl AsRef<Path>, cloud: &PointCloud) -> io::Result<()> {
    let (with_intensity, with_ring) = (cloud.has_intensity(), has_ring(cloud));
    let mut out = BufWriter::new(fs::File::create(path)?);
    write_header(&mut out, "binary_little_endian", cloud, with_intensity, with_ring)?;

    for i in 0..cloud.len() {
        out.write_all(&cloud.x()[i].to_le_bytes())?;
        out.write_all(&cloud.y()[i].to_le_bytes())?;
        out.write_all(&cloud.z()[i].to_le_bytes())?;
        if with_intensity {
            out.write_all(&cloud.intensity()[i].to_le_bytes())?;
        }
        if with_ring {
            out.write_all(&[cloud.ring()[i]])?;
        }
    }

    out.flush()
}
