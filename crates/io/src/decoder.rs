use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::binary;
use crate::capture::{CaptureReader, Framing, MessageKind, RawMessage};
use crate::descriptor::FormatDescriptor;
use crate::error::{DecodeError, DecodeErrorKind};
use crate::msgpack;
use crate::record::DecodedRecord;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    pub framing: Framing,
    /// Layout of binary captures; ignored for MessagePack streams.
    pub descriptor: FormatDescriptor,
}

/// What the decoder skipped on the way through a capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeReport {
    pub messages: usize,
    pub scans: usize,
    pub height_maps: usize,
    pub unknown: usize,
    pub corrupt: Vec<DecodeError>,
}

impl DecodeReport {
    pub fn corrupt_bytes(&self) -> usize {
        self.corrupt.iter().map(|e| e.end - e.start).sum()
    }

    pub fn count_of(&self, kind: DecodeErrorKind) -> usize {
        self.corrupt.iter().filter(|e| e.kind == kind).count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub records: Vec<DecodedRecord>,
    pub report: DecodeReport,
}

impl Decoded {
    pub fn scans(&self) -> impl Iterator<Item = &crate::ScanRecord> + '_ {
        self.records.iter().filter_map(DecodedRecord::as_scan)
    }
}

/// A capture held in memory, decodable any number of times.
#[derive(Debug, Clone)]
pub struct Capture<'a> {
    reader: CaptureReader<'a>,
}

impl<'a> Capture<'a> {
    pub fn new(bytes: &'a [u8], options: &DecodeOptions) -> Result<Self, DecodeError> {
        let reader = CaptureReader::new(bytes, options.framing, &options.descriptor)?;
        Ok(Self { reader })
    }

    pub fn framing(&self) -> Framing {
        self.reader.framing()
    }

    /// Raw messages from the start of the capture.
    pub fn messages(&self) -> CaptureReader<'a> {
        self.reader.clone()
    }

    /// Typed records from the start of the capture. Unknown messages are
    /// passed over; corrupt spans come through as `Err`.
    pub fn records(&self) -> impl Iterator<Item = Result<DecodedRecord, DecodeError>> + 'a {
        let framing = self.framing();
        let descriptor = self.reader.descriptor().clone();
        self.messages()
            .filter_map(move |m| m.and_then(|raw| decode_message(&raw, framing, &descriptor)).transpose())
    }
}

/// Decodes one message. `Ok(None)` for messages of unknown kind.
pub fn decode_message(
    raw: &RawMessage<'_>,
    framing: Framing,
    descriptor: &FormatDescriptor,
) -> Result<Option<DecodedRecord>, DecodeError> {
    if framing == Framing::Binary {
        let record = binary::decode_record(raw.bytes, raw.offset, descriptor);
        return Ok(Some(DecodedRecord::Scan(record)));
    }
    let record = match raw.kind {
        MessageKind::Scan => DecodedRecord::Scan(msgpack::decode_scan(raw.bytes, raw.offset)?),
        MessageKind::PackedScan => {
            DecodedRecord::Scan(msgpack::decode_packed_scan(raw.bytes, raw.offset)?)
        }
        MessageKind::HeightMap => {
            DecodedRecord::HeightMap(msgpack::decode_height_map(raw.bytes, raw.offset)?)
        }
        MessageKind::Unknown => return Ok(None),
    };
    Ok(Some(record))
}

/// Decodes a whole capture.
///
/// Only an unreadable capture as a whole is an error. Corrupt spans and
/// messages that fail to decode are skipped and listed in the report.
#[instrument(skip_all, fields(bytes = bytes.len()))]
pub fn decode(bytes: &[u8], options: &DecodeOptions) -> Result<Decoded, DecodeError> {
    let capture = Capture::new(bytes, options)?;
    let framing = capture.framing();
    let mut records = Vec::new();
    let mut report = DecodeReport::default();

    for item in capture.messages() {
        let decoded = item.and_then(|raw| {
            report.messages += 1;
            debug!(offset = raw.offset, len = raw.bytes.len(), kind = %raw.kind, "message");
            decode_message(&raw, framing, &options.descriptor)
        });
        match decoded {
            Ok(Some(record)) => {
                match &record {
                    DecodedRecord::Scan(_) => report.scans += 1,
                    DecodedRecord::HeightMap(_) => report.height_maps += 1,
                }
                records.push(record);
            }
            Ok(None) => report.unknown += 1,
            Err(err) => {
                warn!(kind = %err.kind, start = err.start, end = err.end, detail = %err.detail, "skipping corrupt span");
                report.corrupt.push(err);
            }
        }
    }

    info!(
        ?framing,
        scans = report.scans,
        height_maps = report.height_maps,
        unknown = report.unknown,
        corrupt = report.corrupt.len(),
        "decoded capture"
    );
    Ok(Decoded { records, report })
}
