#![forbid(unsafe_code)]

pub mod binary;
pub mod capture;
pub mod decoder;
pub mod descriptor;
pub mod error;
pub mod frame_json;
pub mod height_map_meta;
pub mod msgpack;
pub mod pcd;
pub mod ply;
pub mod record;
pub mod xyz;

pub use binary::encode_capture;
pub use capture::{CaptureReader, Framing, MessageKind, RawMessage};
pub use decoder::{decode, decode_message, Capture, DecodeOptions, DecodeReport, Decoded};
pub use descriptor::{Endianness, FieldSpec, FormatDescriptor, PointLayout, ScalarType};
pub use error::{DecodeError, DecodeErrorKind, EncodeError, FrameJsonError};
pub use frame_json::{
    frame_from_json, frame_to_json, read_frame, read_frame_file, read_frame_stream, write_frame,
    write_frame_file,
};
pub use height_map_meta::{
    read_height_map_index, write_height_map_index, write_height_map_metadata, HeightMapMetadata,
};
pub use msgpack::HEIGHT_MAP_NO_DATA;
pub use pcd::{read_pcd, write_pcd, write_pcd_binary};
pub use ply::{read_ply, write_ply, write_ply_binary};
pub use record::{DecodedRecord, HeightMapRecord, RawPoint, ScanRecord};
pub use xyz::{read_xyz, write_xyz};
