//! Binary header written at the start of every per-file data stream.
//!
//! Wire format:
//! ```text
//! [name_len:2][name:name_len][size:8][payload:size]
//! ```
//! All integers are big-endian.  `name` is the UTF-8 relative path with `/`
//! separators.  The header is self-contained per stream, so files may be sent
//! sequentially or concurrently without any shared framing state.

use thiserror::Error;

use crate::domain::file_meta::{FileMeta, FileMetaError, MAX_NAME_LEN};

/// Size of the name-length field.
pub const NAME_LEN_FIELD: usize = 2;

/// Size of the file-size field.
pub const SIZE_FIELD: usize = 8;

/// Header bytes excluding the name itself.
pub const FIXED_HEADER_LEN: usize = NAME_LEN_FIELD + SIZE_FIELD;

/// Errors that can occur while encoding or decoding a file header.
#[derive(Debug, Error, PartialEq)]
pub enum FileHeaderError {
    /// The buffer ends before the header does.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// A zero name length was declared.
    #[error("file header declares an empty name")]
    EmptyName,

    /// The name is not valid UTF-8.
    #[error("file name is not valid UTF-8")]
    InvalidUtf8,

    /// The name decoded but is not an acceptable relative path.
    #[error(transparent)]
    InvalidMeta(#[from] FileMetaError),
}

/// Encodes the header for `meta`.
///
/// # Errors
///
/// Returns [`FileHeaderError::InvalidMeta`] if the path does not validate,
/// including names longer than the `u16` length field can carry.
pub fn encode_header(meta: &FileMeta) -> Result<Vec<u8>, FileHeaderError> {
    meta.validate()?;
    let name = meta.relative_path.as_bytes();
    // validate() bounds the name to MAX_NAME_LEN, which is u16::MAX.
    let name_len = u16::try_from(name.len())
        .map_err(|_| FileMetaError::PathTooLong(name.len()))?;

    let mut buf = Vec::with_capacity(FIXED_HEADER_LEN + name.len());
    buf.extend_from_slice(&name_len.to_be_bytes());
    buf.extend_from_slice(name);
    buf.extend_from_slice(&meta.size.to_be_bytes());
    Ok(buf)
}

/// Decodes a header from the beginning of `bytes`.
///
/// Returns the metadata and the number of header bytes consumed; payload
/// bytes start at that offset.
///
/// # Errors
///
/// Returns [`FileHeaderError`] if the header is truncated, the name is empty
/// or not UTF-8, or the path fails validation.
pub fn decode_header(bytes: &[u8]) -> Result<(FileMeta, usize), FileHeaderError> {
    require_len(bytes, NAME_LEN_FIELD)?;
    let name_len = decode_name_len([bytes[0], bytes[1]])?;

    let size_offset = NAME_LEN_FIELD + name_len;
    let total = size_offset + SIZE_FIELD;
    require_len(bytes, total)?;

    let name = decode_name(&bytes[NAME_LEN_FIELD..size_offset])?;
    let size = read_u64(bytes, size_offset);

    let meta = FileMeta {
        relative_path: name,
        size,
    };
    meta.validate()?;
    Ok((meta, total))
}

/// Interprets the name-length field, rejecting a zero length.
///
/// Stream readers call this before allocating the name buffer.
///
/// # Errors
///
/// Returns [`FileHeaderError::EmptyName`] for a zero length.
pub fn decode_name_len(field: [u8; NAME_LEN_FIELD]) -> Result<usize, FileHeaderError> {
    let len = usize::from(u16::from_be_bytes(field));
    debug_assert!(len <= MAX_NAME_LEN);
    if len == 0 {
        return Err(FileHeaderError::EmptyName);
    }
    Ok(len)
}

/// Decodes name bytes into a `String`.
///
/// # Errors
///
/// Returns [`FileHeaderError::InvalidUtf8`] for non-UTF-8 input.
pub fn decode_name(bytes: &[u8]) -> Result<String, FileHeaderError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| FileHeaderError::InvalidUtf8)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_len(buf: &[u8], needed: usize) -> Result<(), FileHeaderError> {
    if buf.len() < needed {
        Err(FileHeaderError::InsufficientData {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Caller must have checked that `offset + 8` bytes are available.
fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut field = [0u8; SIZE_FIELD];
    field.copy_from_slice(&buf[offset..offset + SIZE_FIELD]);
    u64::from_be_bytes(field)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
