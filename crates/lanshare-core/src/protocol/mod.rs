//! Protocol module containing the control-stream messages, their framing, and
//! the per-file data stream header.

pub mod control;
pub mod file_header;
pub mod messages;

pub use control::{
    decode_body, decode_frame, decode_frame_len, encode_frame, ControlCodecError,
    FRAME_PREFIX_LEN, MAX_FRAME_LEN,
};
pub use file_header::{
    decode_header, decode_name, decode_name_len, encode_header, FileHeaderError,
    FIXED_HEADER_LEN, NAME_LEN_FIELD, SIZE_FIELD,
};
pub use messages::*;
