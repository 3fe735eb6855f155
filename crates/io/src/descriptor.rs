//! Versioned description of the length-prefixed binary capture format.
//!
//! ```text
//! file   := "LDRC" version:u16le reserved:u16le record*
//! record := "SCAN" body_len:u32 body
//! body   := timestamp:f64 point_count:u32 flags:u8 [pose:16*f64] point*
//! ```
//!
//! Record fields use the descriptor's endianness; the file header is always
//! little-endian. `flags` bit 0 marks a row-major pose. Each point is `stride`
//! bytes laid out by [`PointLayout`].

use serde::{Deserialize, Serialize};

pub const MAGIC: &[u8; 4] = b"LDRC";
pub const SYNC: &[u8; 4] = b"SCAN";
pub const FILE_HEADER_LEN: usize = 8;
pub const RECORD_PREFIX_LEN: usize = 8;
/// timestamp + point_count + flags
pub const BODY_FIXED_LEN: usize = 13;
pub const POSE_LEN: usize = 16 * 8;
pub const FLAG_POSE: u8 = 0x01;
pub const CURRENT_VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    U8,
    U16,
    U32,
    F32,
    F64,
}

impl ScalarType {
    pub fn byte_size(self) -> usize {
        match self {
            ScalarType::U8 => 1,
            ScalarType::U16 => 2,
            ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    /// Maps a PointCloud2 `datatype` code.
    pub fn from_ros_datatype(code: u8) -> Option<Self> {
        match code {
            2 => Some(ScalarType::U8),
            4 => Some(ScalarType::U16),
            6 => Some(ScalarType::U32),
            7 => Some(ScalarType::F32),
            8 => Some(ScalarType::F64),
            _ => None,
        }
    }

    /// Reads one value; `bytes` must hold at least [`ScalarType::byte_size`] bytes.
    pub fn read(self, bytes: &[u8], endianness: Endianness) -> f64 {
        macro_rules! read_as {
            ($t:ty, $n:expr) => {{
                let mut buf = [0u8; $n];
                buf.copy_from_slice(&bytes[..$n]);
                match endianness {
                    Endianness::Little => <$t>::from_le_bytes(buf) as f64,
                    Endianness::Big => <$t>::from_be_bytes(buf) as f64,
                }
            }};
        }
        match self {
            ScalarType::U8 => bytes[0] as f64,
            ScalarType::U16 => read_as!(u16, 2),
            ScalarType::U32 => read_as!(u32, 4),
            ScalarType::F32 => read_as!(f32, 4),
            ScalarType::F64 => read_as!(f64, 8),
        }
    }

    /// Appends `value` in this representation. Integer types return `false`
    /// when `value` is not an integer that fits.
    pub fn write(self, value: f64, endianness: Endianness, out: &mut Vec<u8>) -> bool {
        macro_rules! write_as {
            ($v:expr) => {{
                let v = $v;
                match endianness {
                    Endianness::Little => out.extend_from_slice(&v.to_le_bytes()),
                    Endianness::Big => out.extend_from_slice(&v.to_be_bytes()),
                }
            }};
        }
        let fits = |max: f64| value.fract() == 0.0 && (0.0..=max).contains(&value);
        match self {
            ScalarType::U8 if fits(u8::MAX as f64) => out.push(value as u8),
            ScalarType::U16 if fits(u16::MAX as f64) => write_as!(value as u16),
            ScalarType::U32 if fits(u32::MAX as f64) => write_as!(value as u32),
            ScalarType::F32 => write_as!(value as f32),
            ScalarType::F64 => write_as!(value),
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub offset: usize,
    pub scalar: ScalarType,
}

impl FieldSpec {
    pub fn new(offset: usize, scalar: ScalarType) -> Self {
        Self { offset, scalar }
    }

    fn end(&self) -> usize {
        self.offset + self.scalar.byte_size()
    }
}

/// Byte layout of one point struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointLayout {
    pub stride: usize,
    pub x: FieldSpec,
    pub y: FieldSpec,
    pub z: FieldSpec,
    #[serde(default)]
    pub intensity: Option<FieldSpec>,
    #[serde(default)]
    pub ring: Option<FieldSpec>,
}

impl PointLayout {
    /// `x y z` as `f32`, 12 bytes.
    pub fn xyz_f32() -> Self {
        Self {
            stride: 12,
            x: FieldSpec::new(0, ScalarType::F32),
            y: FieldSpec::new(4, ScalarType::F32),
            z: FieldSpec::new(8, ScalarType::F32),
            intensity: None,
            ring: None,
        }
    }

    /// `x y z intensity` as `f32`, 16 bytes. The recorder's default.
    pub fn xyzi_f32() -> Self {
        Self {
            stride: 16,
            intensity: Some(FieldSpec::new(12, ScalarType::F32)),
            ..Self::xyz_f32()
        }
    }

    /// `x y z intensity` as `f32` plus a `u16` ring, 18 bytes.
    pub fn xyzir_f32() -> Self {
        Self {
            stride: 18,
            ring: Some(FieldSpec::new(16, ScalarType::U16)),
            ..Self::xyzi_f32()
        }
    }

    /// Checks that every field fits in the stride and has a usable type.
    pub fn validate(&self) -> Result<(), String> {
        if self.stride == 0 {
            return Err("point stride must be > 0".to_string());
        }
        for (name, field) in [("x", &self.x), ("y", &self.y), ("z", &self.z)] {
            if !matches!(field.scalar, ScalarType::F32 | ScalarType::F64) {
                return Err(format!("{name} must be f32 or f64"));
            }
            if field.end() > self.stride {
                return Err(format!("{name} extends past stride {}", self.stride));
            }
        }
        if let Some(f) = &self.intensity {
            if f.scalar == ScalarType::F64 || f.scalar == ScalarType::U32 {
                return Err("intensity must be u8, u16 or f32".to_string());
            }
            if f.end() > self.stride {
                return Err(format!("intensity extends past stride {}", self.stride));
            }
        }
        if let Some(f) = &self.ring {
            if !matches!(f.scalar, ScalarType::U8 | ScalarType::U16) {
                return Err("ring must be u8 or u16".to_string());
            }
            if f.end() > self.stride {
                return Err(format!("ring extends past stride {}", self.stride));
            }
        }
        Ok(())
    }
}

impl Default for PointLayout {
    fn default() -> Self {
        Self::xyzi_f32()
    }
}

/// Contract between a capture file and the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub version: u16,
    #[serde(default)]
    pub endianness: Endianness,
    #[serde(default)]
    pub layout: PointLayout,
}

impl FormatDescriptor {
    pub fn new(layout: PointLayout) -> Self {
        Self {
            version: CURRENT_VERSION,
            endianness: Endianness::Little,
            layout,
        }
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Body length implied by a header.
    pub fn body_len(&self, point_count: usize, has_pose: bool) -> Option<usize> {
        point_count
            .checked_mul(self.layout.stride)?
            .checked_add(BODY_FIXED_LEN + if has_pose { POSE_LEN } else { 0 })
    }
}

impl Default for FormatDescriptor {
    fn default() -> Self {
        Self::new(PointLayout::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for layout in [
            PointLayout::xyz_f32(),
            PointLayout::xyzi_f32(),
            PointLayout::xyzir_f32(),
        ] {
            assert!(layout.validate().is_ok(), "{layout:?}");
        }
    }

    #[test]
    fn field_past_stride_is_rejected() {
        let mut layout = PointLayout::xyzi_f32();
        layout.stride = 14;
        assert!(layout.validate().is_err());
    }

    #[test]
    fn integer_coordinates_are_rejected() {
        let mut layout = PointLayout::xyz_f32();
        layout.x.scalar = ScalarType::U16;
        assert!(layout.validate().is_err());
    }

    #[test]
    fn scalar_roundtrip_both_endiannesses() {
        for endianness in [Endianness::Little, Endianness::Big] {
            for (scalar, value) in [
                (ScalarType::U8, 200.0),
                (ScalarType::U16, 513.0),
                (ScalarType::U32, 70_000.0),
                (ScalarType::F32, -1.5),
                (ScalarType::F64, 1e-9),
            ] {
                let mut buf = Vec::new();
                assert!(scalar.write(value, endianness, &mut buf));
                assert_eq!(buf.len(), scalar.byte_size());
                assert_eq!(scalar.read(&buf, endianness), value);
            }
        }
    }

    #[test]
    fn integer_write_rejects_out_of_range() {
        let mut buf = Vec::new();
        assert!(!ScalarType::U8.write(256.0, Endianness::Little, &mut buf));
        assert!(!ScalarType::U16.write(1.5, Endianness::Little, &mut buf));
        assert!(buf.is_empty());
    }

    #[test]
    fn descriptor_parses_from_json() {
        let json = r#"{"version":1,"endianness":"big","layout":{"stride":12,
            "x":{"offset":0,"scalar":"f32"},"y":{"offset":4,"scalar":"f32"},
            "z":{"offset":8,"scalar":"f32"}}}"#;
        let d: FormatDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.endianness, Endianness::Big);
        assert_eq!(d.layout, PointLayout::xyz_f32());
        assert_eq!(d.body_len(2, true), Some(13 + 128 + 24));
    }
}
