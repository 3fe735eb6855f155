//! Splitting a capture into raw messages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::binary;
use crate::descriptor::{FormatDescriptor, CURRENT_VERSION, MAGIC};
use crate::error::DecodeError;
use crate::msgpack::{self, Measure};

/// How messages are delimited in a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Sniff the first bytes.
    #[default]
    Auto,
    /// `LDRC` header followed by length-prefixed `SCAN` records.
    Binary,
    /// Concatenated MessagePack maps.
    #[serde(alias = "msgpack")]
    MessagePack,
}

impl Framing {
    /// Resolves `Auto` against the start of a capture.
    pub fn detect(bytes: &[u8]) -> Option<Framing> {
        if bytes.starts_with(MAGIC) {
            Some(Framing::Binary)
        } else if bytes.first().is_some_and(|b| msgpack::is_map_marker(*b)) {
            Some(Framing::MessagePack)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Scan,
    PackedScan,
    HeightMap,
    Unknown,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Scan => "scan",
            MessageKind::PackedScan => "packed-scan",
            MessageKind::HeightMap => "height-map",
            MessageKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One message's bytes, still undecoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage<'a> {
    pub kind: MessageKind,
    pub offset: usize,
    pub bytes: &'a [u8],
}

/// Iterator over the messages of a capture.
///
/// Corrupt spans are yielded as `Err` and the reader continues at the next
/// recoverable boundary, so iteration always reaches the end of the input.
/// Cloning the reader restarts from the clone's position.
#[derive(Debug, Clone)]
pub struct CaptureReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    framing: Framing,
    descriptor: FormatDescriptor,
}

impl<'a> CaptureReader<'a> {
    /// Fails with `UnsupportedFormat` when the framing cannot be determined or
    /// the binary header names a version this reader does not know.
    pub fn new(
        bytes: &'a [u8],
        framing: Framing,
        descriptor: &FormatDescriptor,
    ) -> Result<Self, DecodeError> {
        let framing = match framing {
            Framing::Auto if bytes.is_empty() => Framing::MessagePack,
            Framing::Auto => Framing::detect(bytes).ok_or_else(|| {
                DecodeError::unsupported("capture starts with neither LDRC nor a MessagePack map")
            })?,
            other => other,
        };

        let pos = match framing {
            Framing::Binary => {
                if descriptor.version != CURRENT_VERSION {
                    return Err(DecodeError::unsupported(format!(
                        "descriptor version {}",
                        descriptor.version
                    )));
                }
                descriptor
                    .layout
                    .validate()
                    .map_err(DecodeError::unsupported)?;
                binary::read_file_header(bytes)?
            }
            _ => 0,
        };

        Ok(Self {
            bytes,
            pos,
            framing,
            descriptor: descriptor.clone(),
        })
    }

    /// The framing in effect after auto-detection.
    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn descriptor(&self) -> &FormatDescriptor {
        &self.descriptor
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn next_binary(&mut self) -> Result<RawMessage<'a>, DecodeError> {
        match binary::split_record(self.bytes, self.pos, &self.descriptor) {
            Ok(range) => {
                self.pos = range.end;
                Ok(RawMessage {
                    kind: MessageKind::Scan,
                    offset: range.start,
                    bytes: &self.bytes[range],
                })
            }
            Err((err, resume)) => {
                self.pos = resume;
                Err(err)
            }
        }
    }

    fn next_msgpack(&mut self) -> Result<RawMessage<'a>, DecodeError> {
        let start = self.pos;
        let end = self.bytes.len();
        let incomplete = match msgpack::measure_map(&self.bytes[start..]) {
            Measure::Complete(n) => {
                self.pos = start + n;
                let bytes = &self.bytes[start..start + n];
                return Ok(RawMessage {
                    kind: msgpack::classify(bytes),
                    offset: start,
                    bytes,
                });
            }
            Measure::Incomplete => true,
            Measure::Invalid => false,
        };

        match self.resync_msgpack(start + 1) {
            Some(next) => {
                self.pos = next;
                Err(DecodeError::malformed(
                    start..next,
                    "bytes do not form a MessagePack map",
                ))
            }
            None => {
                self.pos = end;
                if incomplete {
                    Err(DecodeError::truncated(start..end, "capture ends inside a message"))
                } else {
                    Err(DecodeError::malformed(
                        start..end,
                        "no decodable message until end of capture",
                    ))
                }
            }
        }
    }

    /// First offset at or after `from` where a complete, recognised message
    /// starts. Each candidate is measured over at most
    /// [`msgpack::RESYNC_LOOKAHEAD`] bytes, and only offsets that open a map
    /// with an identifier key are measured at all.
    fn resync_msgpack(&self, from: usize) -> Option<usize> {
        (from..self.bytes.len()).find(|&i| {
            let tail = &self.bytes[i..];
            if !msgpack::starts_like_message(tail) {
                return false;
            }
            let window = &tail[..tail.len().min(msgpack::RESYNC_LOOKAHEAD)];
            match msgpack::measure_map(window) {
                Measure::Complete(n) => msgpack::classify(&window[..n]) != MessageKind::Unknown,
                _ => false,
            }
        })
    }
}

impl<'a> Iterator for CaptureReader<'a> {
    type Item = Result<RawMessage<'a>, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        Some(match self.framing {
            Framing::Binary => self.next_binary(),
            _ => self.next_msgpack(),
        })
    }
}

impl std::iter::FusedIterator for CaptureReader<'_> {}
