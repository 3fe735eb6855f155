//! MessagePack message streams as written by the robot recorder.
//!
//! A stream is a plain concatenation of maps. Each map is one of a flat
//! `points` scan, a PointCloud2-style packed scan, or a pre-rasterized
//! height map; anything else is reported as [`MessageKind::Unknown`].

use std::fmt;

use lidarmap_core::{Pose, RasterGrid};
use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::capture::MessageKind;
use crate::descriptor::{Endianness, FieldSpec, ScalarType};
use crate::error::DecodeError;
use crate::record::{HeightMapRecord, RawPoint, ScanRecord};

/// Height values at or above this are no-data in recorded height maps.
pub const HEIGHT_MAP_NO_DATA: f64 = 1e9;

pub(crate) fn is_map_marker(b: u8) -> bool {
    (0x80..=0x8f).contains(&b) || b == 0xde || b == 0xdf
}

/// Longest candidate message examined while resynchronising after corrupt
/// bytes. Larger messages are still read in sequence, but resync skips them.
pub const RESYNC_LOOKAHEAD: usize = 64 << 20;

/// Whether `bytes` open a map whose first key is a short identifier string,
/// as every recorded message does. Constant time; used to pick resync
/// candidates before paying for a full [`measure_map`].
pub(crate) fn starts_like_message(bytes: &[u8]) -> bool {
    let (entries, header) = match bytes.first() {
        Some(&b @ 0x80..=0x8f) => ((b & 0x0f) as usize, 1),
        Some(0xde) if bytes.len() >= 3 => (u16::from_be_bytes([bytes[1], bytes[2]]) as usize, 3),
        Some(0xdf) if bytes.len() >= 5 => {
            (u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize, 5)
        }
        _ => return false,
    };
    if entries == 0 {
        return false;
    }
    let key = &bytes[header..];
    let (len, start) = match key.first() {
        Some(&b @ 0xa0..=0xbf) => ((b & 0x1f) as usize, 1),
        Some(0xd9) if key.len() >= 2 => (key[1] as usize, 2),
        _ => return false,
    };
    (2..=32).contains(&len)
        && key
            .get(start..start + len)
            .is_some_and(|name| name.iter().all(|c| c.is_ascii_alphanumeric() || *c == b'_'))
}

/// Outcome of measuring one MessagePack value.
pub(crate) enum Measure {
    Complete(usize),
    /// Ran out of bytes before the value ended.
    Incomplete,
    Invalid,
}

/// Length in bytes of the map starting at `bytes[0]`.
pub(crate) fn measure_map(bytes: &[u8]) -> Measure {
    if !matches!(bytes.first(), Some(b) if is_map_marker(*b)) {
        return Measure::Invalid;
    }
    let mut rest = bytes;
    let result = {
        let mut de = rmp_serde::Deserializer::new(&mut rest);
        IgnoredAny::deserialize(&mut de)
    };
    match result {
        Ok(_) => Measure::Complete(bytes.len() - rest.len()),
        Err(rmp_serde::decode::Error::InvalidMarkerRead(e))
        | Err(rmp_serde::decode::Error::InvalidDataRead(e))
            if e.kind() == std::io::ErrorKind::UnexpectedEof =>
        {
            Measure::Incomplete
        }
        Err(_) => Measure::Invalid,
    }
}

#[derive(Deserialize)]
struct KeyPresence {
    points: Option<IgnoredAny>,
    point_step: Option<IgnoredAny>,
    data: Option<IgnoredAny>,
    width: Option<IgnoredAny>,
    height: Option<IgnoredAny>,
    resolution: Option<IgnoredAny>,
}

/// Classifies a complete map by the keys it carries.
pub(crate) fn classify(message: &[u8]) -> MessageKind {
    let Ok(p) = rmp_serde::from_slice::<KeyPresence>(message) else {
        return MessageKind::Unknown;
    };
    let has_data = p.data.is_some();
    if has_data && p.width.is_some() && p.height.is_some() && p.resolution.is_some() {
        MessageKind::HeightMap
    } else if has_data && p.point_step.is_some() {
        MessageKind::PackedScan
    } else if p.points.is_some() {
        MessageKind::Scan
    } else {
        MessageKind::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
enum Stamp {
    Seconds(f64),
    Parts {
        #[serde(alias = "secs")]
        sec: i64,
        #[serde(alias = "nsecs", alias = "nanosec", default)]
        nsec: u32,
    },
}

impl Stamp {
    fn seconds(self) -> f64 {
        match self {
            Stamp::Seconds(s) => s,
            Stamp::Parts { sec, nsec } => sec as f64 + nsec as f64 * 1e-9,
        }
    }
}

/// Binary payload that may arrive as `bin` or as an array of byte values.
#[derive(Debug, Default)]
struct Bytes(Vec<u8>);

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Bytes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("binary data or a list of byte values")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Bytes, E> {
                Ok(Bytes(v.to_vec()))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Bytes, E> {
                Ok(Bytes(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Bytes, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    out.push(b);
                }
                Ok(Bytes(out))
            }
        }

        deserializer.deserialize_any(BytesVisitor)
    }
}

#[derive(Deserialize)]
struct ScanMessage {
    points: Vec<f64>,
    #[serde(default = "default_point_fields")]
    point_fields: usize,
    stamp: Option<Stamp>,
    timestamp: Option<Stamp>,
    pose: Option<Vec<f64>>,
}

fn default_point_fields() -> usize {
    4
}

#[derive(Deserialize)]
struct PackedField {
    name: String,
    offset: usize,
    datatype: u8,
}

#[derive(Deserialize)]
struct PackedScanMessage {
    point_step: usize,
    data: Bytes,
    #[serde(default)]
    fields: Vec<PackedField>,
    #[serde(default)]
    is_bigendian: bool,
    stamp: Option<Stamp>,
    timestamp: Option<Stamp>,
    pose: Option<Vec<f64>>,
}

#[derive(Deserialize)]
struct HeightMapMessage {
    data: Vec<f64>,
    width: u32,
    height: u32,
    resolution: f64,
    #[serde(default)]
    origin: Vec<f64>,
    stamp: Option<Stamp>,
    timestamp: Option<Stamp>,
}

fn timestamp(stamp: Option<Stamp>, timestamp: Option<Stamp>) -> Option<f64> {
    stamp.or(timestamp).map(Stamp::seconds)
}

fn pose(values: Option<Vec<f64>>, span: std::ops::Range<usize>) -> Result<Option<Pose>, DecodeError> {
    values
        .map(|v| Pose::from_row_major(&v))
        .transpose()
        .map_err(|e| DecodeError::malformed(span, e.to_string()))
}

fn parse<'a, T: Deserialize<'a>>(
    message: &'a [u8],
    offset: usize,
    kind: MessageKind,
) -> Result<T, DecodeError> {
    rmp_serde::from_slice(message).map_err(|e| {
        DecodeError::malformed(offset..offset + message.len(), format!("{kind} message: {e}"))
    })
}

pub(crate) fn decode_scan(message: &[u8], offset: usize) -> Result<ScanRecord, DecodeError> {
    let span = offset..offset + message.len();
    let msg: ScanMessage = parse(message, offset, MessageKind::Scan)?;
    let n = msg.point_fields;
    if !(3..=5).contains(&n) {
        return Err(DecodeError::malformed(
            span,
            format!("point_fields = {n}, expected 3 to 5"),
        ));
    }
    if msg.points.len() % n != 0 {
        return Err(DecodeError::malformed(
            span,
            format!(
                "{} point values is not a multiple of {n} fields",
                msg.points.len()
            ),
        ));
    }

    let points = msg
        .points
        .chunks_exact(n)
        .map(|p| RawPoint {
            x: p[0],
            y: p[1],
            z: p[2],
            intensity: p.get(3).copied(),
            // Fractional or negative ring values cannot be a channel index.
            ring: p
                .get(4)
                .map(|r| if *r >= 0.0 && r.fract() == 0.0 { *r as u32 } else { u32::MAX }),
        })
        .collect();

    Ok(ScanRecord {
        offset,
        timestamp: timestamp(msg.stamp, msg.timestamp),
        pose: pose(msg.pose, span)?,
        points,
    })
}

pub(crate) fn decode_packed_scan(
    message: &[u8],
    offset: usize,
) -> Result<ScanRecord, DecodeError> {
    let span = offset..offset + message.len();
    let msg: PackedScanMessage = parse(message, offset, MessageKind::PackedScan)?;
    let step = msg.point_step;
    if step == 0 || msg.data.0.len() % step != 0 {
        return Err(DecodeError::malformed(
            span,
            format!("{} data bytes with point_step {step}", msg.data.0.len()),
        ));
    }

    let field = |name: &str| -> Result<Option<FieldSpec>, DecodeError> {
        let Some(f) = msg.fields.iter().find(|f| f.name == name) else {
            return Ok(None);
        };
        let scalar = ScalarType::from_ros_datatype(f.datatype).ok_or_else(|| {
            DecodeError::malformed(
                span.clone(),
                format!("field {name} has unsupported datatype {}", f.datatype),
            )
        })?;
        if f.offset + scalar.byte_size() > step {
            return Err(DecodeError::malformed(
                span.clone(),
                format!("field {name} extends past point_step {step}"),
            ));
        }
        Ok(Some(FieldSpec::new(f.offset, scalar)))
    };

    let default_xyz = |offset| FieldSpec::new(offset, ScalarType::F32);
    let (x, y, z) = if msg.fields.is_empty() {
        if step < 12 {
            return Err(DecodeError::malformed(
                span,
                format!("point_step {step} too small for x, y, z"),
            ));
        }
        (default_xyz(0), default_xyz(4), default_xyz(8))
    } else {
        let missing = || DecodeError::malformed(span.clone(), "fields lack one of x, y, z");
        (
            field("x")?.ok_or_else(missing)?,
            field("y")?.ok_or_else(missing)?,
            field("z")?.ok_or_else(missing)?,
        )
    };
    let intensity = field("intensity")?;
    let ring = match field("ring")? {
        Some(r) => Some(r),
        None => field("channel")?,
    };

    let endianness = if msg.is_bigendian {
        Endianness::Big
    } else {
        Endianness::Little
    };
    let points = msg
        .data
        .0
        .chunks_exact(step)
        .map(|p| RawPoint {
            x: x.scalar.read(&p[x.offset..], endianness),
            y: y.scalar.read(&p[y.offset..], endianness),
            z: z.scalar.read(&p[z.offset..], endianness),
            intensity: intensity.map(|f| f.scalar.read(&p[f.offset..], endianness)),
            ring: ring.map(|f| f.scalar.read(&p[f.offset..], endianness) as u32),
        })
        .collect();

    Ok(ScanRecord {
        offset,
        timestamp: timestamp(msg.stamp, msg.timestamp),
        pose: pose(msg.pose, span)?,
        points,
    })
}

pub(crate) fn decode_height_map(
    message: &[u8],
    offset: usize,
) -> Result<HeightMapRecord, DecodeError> {
    let span = offset..offset + message.len();
    let msg: HeightMapMessage = parse(message, offset, MessageKind::HeightMap)?;
    let origin = match msg.origin.as_slice() {
        [] => [0.0, 0.0],
        [x, y, ..] => [*x, *y],
        [_] => {
            return Err(DecodeError::malformed(span, "origin needs x and y"));
        }
    };
    let cells = msg
        .data
        .into_iter()
        .map(|v| (v.is_finite() && v < HEIGHT_MAP_NO_DATA).then_some(v))
        .collect();
    let grid = RasterGrid::from_cells(origin, msg.resolution, msg.width, msg.height, cells)
        .map_err(|e| DecodeError::malformed(span, e.to_string()))?;

    Ok(HeightMapRecord {
        offset,
        timestamp: timestamp(msg.stamp, msg.timestamp),
        grid,
    })
}
