//! One file per unidirectional stream:
//!
//! ```text
//! [name_len:2][name:name_len][size:8][payload:size]
//! ```
//!
//! The header layout lives in [`lanshare_core::protocol::file_header`]; this
//! module moves it and the payload over async streams.  The declared size is
//! untrusted on the receiving side: exactly that many bytes are read, never
//! more, and a short stream is an error.
//!
//! Every individual read and write is bounded by an idle deadline.  A peer
//! that stops sending mid-file fails the copy after `idle` instead of holding
//! the stream open; connection keep-alives would otherwise mask the stall.

use std::future::Future;
use std::io;
use std::time::Duration;

use lanshare_core::protocol::{
    decode_name, decode_name_len, encode_header, FileHeaderError, NAME_LEN_FIELD,
};
use lanshare_core::FileMeta;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the buffer payload bytes are copied through.
const COPY_BUFFER: usize = 64 * 1024;

/// Error type for data stream operations.
#[derive(Debug, Error)]
pub enum FileStreamError {
    /// The header could not be encoded or is invalid.
    #[error("invalid file header: {0}")]
    Header(#[from] FileHeaderError),

    /// Reading or writing the stream (or the local file) failed.
    #[error("file stream I/O error: {0}")]
    Io(#[from] io::Error),

    /// No progress was made on one read or write within the idle deadline.
    #[error("{step} made no progress for {idle:?}")]
    Stalled { step: &'static str, idle: Duration },

    /// The stream ended before the declared payload size was reached.
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },

    /// The local source file yielded fewer bytes than announced.
    #[error("source ended after {read} of {expected} bytes (file shrank?)")]
    SourceShrank { expected: u64, read: u64 },
}

/// Awaits one I/O step, failing with [`FileStreamError::Stalled`] after `idle`.
async fn within<T>(
    idle: Duration,
    step: &'static str,
    io: impl Future<Output = io::Result<T>>,
) -> Result<T, FileStreamError> {
    tokio::time::timeout(idle, io)
        .await
        .map_err(|_| FileStreamError::Stalled { step, idle })?
        .map_err(FileStreamError::Io)
}

/// Copies up to `limit` bytes, one bounded read and one bounded write at a
/// time.  Returns the number of bytes copied; fewer than `limit` means the
/// input ended.
async fn copy_bounded<R, W>(
    input: &mut R,
    out: &mut W,
    limit: u64,
    idle: Duration,
) -> Result<u64, FileStreamError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER.min(usize::try_from(limit).unwrap_or(COPY_BUFFER))];
    let mut copied = 0u64;
    while copied < limit {
        let want = usize::try_from(limit - copied).map_or(buf.len(), |left| left.min(buf.len()));
        let n = within(idle, "read", input.read(&mut buf[..want])).await?;
        if n == 0 {
            break;
        }
        within(idle, "write", out.write_all(&buf[..n])).await?;
        copied += n as u64;
    }
    Ok(copied)
}

/// Writes the header for `meta`, then exactly `meta.size` bytes from
/// `source`.  Returns the payload byte count.
///
/// # Errors
///
/// [`FileStreamError::SourceShrank`] if `source` runs out early,
/// [`FileStreamError::Stalled`] if the peer stops accepting data for `idle`,
/// otherwise header and I/O errors.
pub async fn write_file<W, R>(
    out: &mut W,
    meta: &FileMeta,
    mut source: R,
    idle: Duration,
) -> Result<u64, FileStreamError>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let header = encode_header(meta)?;
    within(idle, "write header", out.write_all(&header)).await?;

    let copied = copy_bounded(&mut source, out, meta.size, idle).await?;
    if copied < meta.size {
        return Err(FileStreamError::SourceShrank {
            expected: meta.size,
            read: copied,
        });
    }
    within(idle, "flush", out.flush()).await?;
    Ok(copied)
}

/// Reads and validates one stream header.
///
/// # Errors
///
/// [`FileStreamError::Header`] for an empty, non-UTF-8, or unsafe name,
/// [`FileStreamError::Io`] if the stream ends inside the header, and
/// [`FileStreamError::Stalled`] if a header field does not arrive within
/// `idle`.
pub async fn read_header<R>(input: &mut R, idle: Duration) -> Result<FileMeta, FileStreamError>
where
    R: AsyncRead + Unpin,
{
    let mut len_field = [0u8; NAME_LEN_FIELD];
    within(idle, "read header", input.read_exact(&mut len_field)).await?;
    let name_len = decode_name_len(len_field)?;

    let mut name = vec![0u8; name_len];
    within(idle, "read header", input.read_exact(&mut name)).await?;
    let relative_path = decode_name(&name)?;

    let size = within(idle, "read header", input.read_u64()).await?;

    let meta = FileMeta {
        relative_path,
        size,
    };
    meta.validate().map_err(FileHeaderError::from)?;
    Ok(meta)
}

/// Copies exactly `size` payload bytes from `input` to `out`.
///
/// # Errors
///
/// [`FileStreamError::Truncated`] if `input` ends early and
/// [`FileStreamError::Stalled`] if it goes quiet for `idle`.
pub async fn read_payload<R, W>(
    input: &mut R,
    out: &mut W,
    size: u64,
    idle: Duration,
) -> Result<u64, FileStreamError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = copy_bounded(input, out, size, idle).await?;
    if copied < size {
        return Err(FileStreamError::Truncated {
            expected: size,
            received: copied,
        });
    }
    within(idle, "flush", out.flush()).await?;
    Ok(copied)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
