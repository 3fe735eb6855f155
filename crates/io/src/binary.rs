//! Length-prefixed binary captures: record splitting, body decoding and the
//! re-encoder.

use lidarmap_core::Pose;

use crate::descriptor::{
    Endianness, FormatDescriptor, ScalarType, BODY_FIXED_LEN, CURRENT_VERSION, FILE_HEADER_LEN,
    FLAG_POSE, MAGIC, POSE_LEN, RECORD_PREFIX_LEN, SYNC,
};
use crate::error::{DecodeError, EncodeError};
use crate::record::{RawPoint, ScanRecord};

/// Validates the file header and returns the offset of the first record.
pub(crate) fn read_file_header(bytes: &[u8]) -> Result<usize, DecodeError> {
    if bytes.len() < FILE_HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(DecodeError::unsupported("missing LDRC file header"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != CURRENT_VERSION {
        return Err(DecodeError::unsupported(format!(
            "capture version {version}, decoder supports {CURRENT_VERSION}"
        )));
    }
    Ok(FILE_HEADER_LEN)
}

pub(crate) fn find_sync(bytes: &[u8], from: usize) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(SYNC.len())
        .position(|w| w == SYNC)
        .map(|p| p + from)
}

fn read_u32(bytes: &[u8], endianness: Endianness) -> u32 {
    ScalarType::U32.read(bytes, endianness) as u32
}

/// Splits the next record at `pos`.
///
/// Returns the record's byte range, or the corrupt span to skip together
/// with the position to resume from.
pub(crate) fn split_record(
    bytes: &[u8],
    pos: usize,
    descriptor: &FormatDescriptor,
) -> Result<std::ops::Range<usize>, (DecodeError, usize)> {
    let end = bytes.len();
    let rest = &bytes[pos..];

    if !rest.starts_with(SYNC) {
        if SYNC.starts_with(rest) {
            return Err((DecodeError::truncated(pos..end, "partial sync marker"), end));
        }
        let next = find_sync(bytes, pos + 1).unwrap_or(end);
        return Err((
            DecodeError::malformed(pos..next, "expected SCAN sync marker"),
            next,
        ));
    }

    // Where to resume if this record turns out to be unusable.
    let resync = || find_sync(bytes, pos + SYNC.len());

    if rest.len() < RECORD_PREFIX_LEN + BODY_FIXED_LEN {
        return Err(match resync() {
            Some(next) => (
                DecodeError::malformed(pos..next, "record shorter than its fixed header"),
                next,
            ),
            None => (
                DecodeError::truncated(pos..end, "capture ends inside record header"),
                end,
            ),
        });
    }

    let e = descriptor.endianness;
    let body_len = read_u32(&rest[4..], e) as usize;
    let body_start = pos + RECORD_PREFIX_LEN;
    let body_end = body_start.saturating_add(body_len);

    if body_end > end {
        return Err(match resync() {
            Some(next) => (
                DecodeError::malformed(
                    pos..next,
                    format!("body length {body_len} overruns the next record"),
                ),
                next,
            ),
            None => (
                DecodeError::truncated(
                    pos..end,
                    format!("body length {body_len}, {} bytes remain", end - body_start),
                ),
                end,
            ),
        });
    }

    let body = &bytes[body_start..body_end];
    let consistent = body.len() >= BODY_FIXED_LEN && {
        let point_count = read_u32(&body[8..], e) as usize;
        let has_pose = body[12] & FLAG_POSE != 0;
        descriptor.body_len(point_count, has_pose) == Some(body_len)
    };
    if !consistent {
        let next = resync().unwrap_or(end);
        return Err((
            DecodeError::malformed(
                pos..next,
                format!("body length {body_len} disagrees with point count and layout"),
            ),
            next,
        ));
    }

    Ok(pos..body_end)
}

/// Decodes a record previously accepted by [`split_record`].
pub(crate) fn decode_record(
    record: &[u8],
    offset: usize,
    descriptor: &FormatDescriptor,
) -> ScanRecord {
    let e = descriptor.endianness;
    let layout = &descriptor.layout;
    let body = &record[RECORD_PREFIX_LEN..];

    let timestamp = ScalarType::F64.read(body, e);
    let point_count = read_u32(&body[8..], e) as usize;
    let flags = body[12];

    let mut cursor = BODY_FIXED_LEN;
    let pose = (flags & FLAG_POSE != 0).then(|| {
        let mut values = [0.0; 16];
        for (i, v) in values.iter_mut().enumerate() {
            *v = ScalarType::F64.read(&body[cursor + i * 8..], e);
        }
        cursor += POSE_LEN;
        Pose::from_row_major(&values).unwrap_or_default()
    });

    let points = body[cursor..]
        .chunks_exact(layout.stride)
        .take(point_count)
        .map(|p| RawPoint {
            x: layout.x.scalar.read(&p[layout.x.offset..], e),
            y: layout.y.scalar.read(&p[layout.y.offset..], e),
            z: layout.z.scalar.read(&p[layout.z.offset..], e),
            intensity: layout.intensity.map(|f| f.scalar.read(&p[f.offset..], e)),
            ring: layout.ring.map(|f| f.scalar.read(&p[f.offset..], e) as u32),
        })
        .collect();

    ScanRecord {
        offset,
        timestamp: Some(timestamp),
        pose,
        points,
    }
}

/// Writes a complete capture: file header followed by one record per scan.
///
/// Padding bytes inside the point stride are written as zero. Records
/// without a timestamp are written with `0.0`.
pub fn encode_capture(
    records: &[ScanRecord],
    descriptor: &FormatDescriptor,
) -> Result<Vec<u8>, EncodeError> {
    descriptor.layout.validate().map_err(EncodeError::Layout)?;

    let mut out = Vec::with_capacity(FILE_HEADER_LEN);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&descriptor.version.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    for (ri, record) in records.iter().enumerate() {
        encode_record(ri, record, descriptor, &mut out)?;
    }
    Ok(out)
}

fn encode_record(
    ri: usize,
    record: &ScanRecord,
    descriptor: &FormatDescriptor,
    out: &mut Vec<u8>,
) -> Result<(), EncodeError> {
    let e = descriptor.endianness;
    let layout = &descriptor.layout;
    let count = u32::try_from(record.points.len()).map_err(|_| EncodeError::TooManyPoints {
        record: ri,
        points: record.points.len(),
    })?;
    let body_len = descriptor
        .body_len(record.points.len(), record.pose.is_some())
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(EncodeError::TooManyPoints {
            record: ri,
            points: record.points.len(),
        })?;

    out.extend_from_slice(SYNC);
    ScalarType::U32.write(body_len as f64, e, out);
    ScalarType::F64.write(record.timestamp.unwrap_or(0.0), e, out);
    ScalarType::U32.write(count as f64, e, out);
    out.push(if record.pose.is_some() { FLAG_POSE } else { 0 });
    if let Some(pose) = &record.pose {
        for v in pose.to_row_major() {
            ScalarType::F64.write(v, e, out);
        }
    }

    let mut scratch = Vec::with_capacity(8);
    for (pi, p) in record.points.iter().enumerate() {
        let start = out.len();
        out.resize(start + layout.stride, 0);

        let mut fields = vec![
            ("x", layout.x, Some(p.x)),
            ("y", layout.y, Some(p.y)),
            ("z", layout.z, Some(p.z)),
        ];
        if let Some(f) = layout.intensity {
            fields.push(("intensity", f, p.intensity));
        }
        if let Some(f) = layout.ring {
            fields.push(("ring", f, p.ring.map(f64::from)));
        }

        for (channel, field, value) in fields {
            let value = value.ok_or(EncodeError::MissingChannel {
                record: ri,
                point: pi,
                channel,
            })?;
            scratch.clear();
            if !field.scalar.write(value, e, &mut scratch) {
                return Err(EncodeError::ValueOutOfRange {
                    record: ri,
                    point: pi,
                    channel,
                    value,
                });
            }
            let at = start + field.offset;
            out[at..at + scratch.len()].copy_from_slice(&scratch);
        }
    }
    Ok(())
}
