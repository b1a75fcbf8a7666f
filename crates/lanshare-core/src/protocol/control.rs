//! Length-delimited JSON framing for the control stream.
//!
//! Wire format:
//! ```text
//! [len:4][json:len]
//! ```
//! `len` is a big-endian `u32` counting only the JSON bytes.  Frames larger
//! than [`MAX_FRAME_LEN`] are refused on both encode and decode so a hostile
//! peer cannot make us allocate an arbitrary buffer.

use thiserror::Error;

use crate::protocol::messages::ControlMessage;

/// Size of the length prefix in bytes.
pub const FRAME_PREFIX_LEN: usize = 4;

/// Largest JSON body accepted in one frame (64 KiB).
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Errors that can occur while framing control messages.
#[derive(Debug, Error, PartialEq)]
pub enum ControlCodecError {
    /// The buffer ends before the frame does.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The declared or encoded body exceeds [`MAX_FRAME_LEN`].
    #[error("control frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    FrameTooLarge(usize),

    /// The body is not a valid [`ControlMessage`].
    #[error("malformed control message: {0}")]
    Malformed(String),
}

/// Encodes one message as a length-prefixed frame.
///
/// # Errors
///
/// Returns [`ControlCodecError::FrameTooLarge`] if the JSON body is bigger
/// than [`MAX_FRAME_LEN`].
pub fn encode_frame(msg: &ControlMessage) -> Result<Vec<u8>, ControlCodecError> {
    let body = serde_json::to_vec(msg).map_err(|e| ControlCodecError::Malformed(e.to_string()))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(ControlCodecError::FrameTooLarge(body.len()));
    }

    let mut buf = Vec::with_capacity(FRAME_PREFIX_LEN + body.len());
    buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Reads the body length from a frame prefix, enforcing [`MAX_FRAME_LEN`].
///
/// Stream readers call this after reading exactly [`FRAME_PREFIX_LEN`] bytes
/// and before allocating the body buffer.
///
/// # Errors
///
/// Returns [`ControlCodecError::FrameTooLarge`] for oversized declarations.
pub fn decode_frame_len(prefix: [u8; FRAME_PREFIX_LEN]) -> Result<usize, ControlCodecError> {
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ControlCodecError::FrameTooLarge(len));
    }
    Ok(len)
}

/// Decodes one frame body (the bytes after the prefix).
///
/// # Errors
///
/// Returns [`ControlCodecError::Malformed`] if the body is not a valid message.
pub fn decode_body(body: &[u8]) -> Result<ControlMessage, ControlCodecError> {
    serde_json::from_slice(body).map_err(|e| ControlCodecError::Malformed(e.to_string()))
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the message and the number of bytes consumed, so the caller can
/// advance their read cursor.
///
/// # Errors
///
/// Returns [`ControlCodecError`] if the bytes are truncated, oversized, or do
/// not contain a valid message.
pub fn decode_frame(bytes: &[u8]) -> Result<(ControlMessage, usize), ControlCodecError> {
    if bytes.len() < FRAME_PREFIX_LEN {
        return Err(ControlCodecError::InsufficientData {
            needed: FRAME_PREFIX_LEN,
            available: bytes.len(),
        });
    }

    let len = decode_frame_len([bytes[0], bytes[1], bytes[2], bytes[3]])?;
    let total = FRAME_PREFIX_LEN + len;
    if bytes.len() < total {
        return Err(ControlCodecError::InsufficientData {
            needed: total,
            available: bytes.len(),
        });
    }

    let msg = decode_body(&bytes[FRAME_PREFIX_LEN..total])?;
    Ok((msg, total))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
