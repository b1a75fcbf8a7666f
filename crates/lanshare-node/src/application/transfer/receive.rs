//! Receiving side: validate the offer, then write each data stream to disk.
//!
//! A payload lands in `<name>.lanshare-part` and is renamed into place only
//! after exactly the declared number of bytes arrived and were synced.  The
//! part file is deleted on any failure, so a destination path either holds a
//! complete file or is untouched by this transfer.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanshare_core::{ControlMessage, FileMeta};
use quinn::{Connection, RecvStream};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::offer::{normalized_name, validate_offer};
use super::{TransferError, TransferSummary, PART_SUFFIX};
use crate::application::pairing::PairedSession;
use crate::infrastructure::transport::control::unexpected;
use crate::infrastructure::transport::file_stream::{read_header, read_payload};
use crate::infrastructure::transport::{CloseCode, TransportError};

/// Waits for the sender's offer, accepts or refuses it, and writes every
/// offered file under `dest_dir`.
///
/// Consumes the session: after sending `Complete` it waits (up to the I/O
/// timeout) for the sender to close, then closes with [`CloseCode::Done`].
/// Any error closes with [`CloseCode::TransferAborted`].
///
/// # Errors
///
/// [`TransferError::InvalidOffer`] when the offer is refused (the sender is
/// told why), otherwise any other [`TransferError`].
pub async fn receive_files(
    mut session: PairedSession,
    dest_dir: &Path,
    max_file_size: u64,
) -> Result<TransferSummary, TransferError> {
    let attempt = Uuid::new_v4();
    let span = info_span!("transfer", %attempt, role = "receiver", peer = %session.peer.label);

    match run(&mut session, dest_dir, max_file_size)
        .instrument(span)
        .await
    {
        Ok(summary) => {
            info!(
                files = summary.files,
                bytes = summary.bytes,
                dest = %dest_dir.display(),
                "transfer complete"
            );
            session.close(CloseCode::Done);
            Ok(summary)
        }
        Err(e) => {
            warn!(error = %e, "transfer aborted");
            session.close(CloseCode::TransferAborted);
            Err(e)
        }
    }
}

async fn run(
    session: &mut PairedSession,
    dest_dir: &Path,
    max_file_size: u64,
) -> Result<TransferSummary, TransferError> {
    let io_timeout = session.config.io_timeout;

    // The sender may still be in its own verify prompt.
    let offer_deadline = session.config.verify_timeout + io_timeout;
    let files = match session.control.recv_within(offer_deadline, "offer").await? {
        ControlMessage::Offer { files } => files,
        other => return Err(unexpected("offer", &other).into()),
    };

    let verdict = match validate_offer(&files, max_file_size) {
        Ok(()) => tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(dest_err(dest_dir)),
        Err(reason) => Err(reason.into()),
    };
    if let Err(e) = verdict {
        warn!(reason = %e, "refusing offer");
        session
            .control
            .send(&ControlMessage::OfferRejected {
                reason: e.to_string(),
            })
            .await?;
        session.control.finish();
        linger(&session.connection, io_timeout).await;
        return Err(e);
    }

    session.control.send(&ControlMessage::OfferAccepted).await?;
    info!(files = files.len(), "offer accepted");

    let mut pending: HashMap<String, u64> = files
        .iter()
        .map(|meta| (normalized_name(meta), meta.size))
        .collect();
    let mut summary = TransferSummary::default();

    while !pending.is_empty() {
        let mut stream = tokio::time::timeout(io_timeout, session.connection.accept_uni())
            .await
            .map_err(|_| TransportError::Timeout("accept data stream"))?
            .map_err(TransportError::from)?;

        match receive_one(&mut stream, dest_dir, &mut pending, io_timeout).await {
            Ok(bytes) => {
                summary.files += 1;
                summary.bytes += bytes;
            }
            Err(e) => {
                let _ = stream.stop(CloseCode::TransferAborted.varint());
                return Err(e);
            }
        }
    }

    session
        .control
        .send(&ControlMessage::Complete {
            files: summary.files,
            bytes: summary.bytes,
        })
        .await?;
    session.control.finish();
    linger(&session.connection, io_timeout).await;
    Ok(summary)
}

/// Reads one data stream into place.  Returns the payload byte count.
///
/// Every read from the stream is bounded by `idle`, so a sender that goes
/// quiet mid-file fails the transfer and its part file is removed.
async fn receive_one(
    stream: &mut RecvStream,
    dest_dir: &Path,
    pending: &mut HashMap<String, u64>,
    idle: Duration,
) -> Result<u64, TransferError> {
    let meta = read_header(stream, idle).await?;
    let name = normalized_name(&meta);
    match pending.remove(&name) {
        Some(size) if size == meta.size => {}
        Some(size) => {
            return Err(TransferError::OfferMismatch {
                name,
                reason: format!("offered {size} bytes, stream declares {}", meta.size),
            })
        }
        None => {
            return Err(TransferError::OfferMismatch {
                name,
                reason: "not offered or already received".to_string(),
            })
        }
    }

    let target = destination_path(dest_dir, &meta);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(dest_err(parent))?;
    }

    let part = part_path(&target);
    let result = write_part(stream, &part, &target, meta.size, idle).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&part).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %part.display(), error = %e, "could not remove part file");
            }
        }
    } else {
        debug!(name = %name, bytes = meta.size, "file received");
    }
    result
}

async fn write_part(
    stream: &mut RecvStream,
    part: &Path,
    target: &Path,
    size: u64,
    idle: Duration,
) -> Result<u64, TransferError> {
    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(dest_err(part))?;
    let bytes = read_payload(stream, &mut file, size, idle).await?;
    file.sync_all().await.map_err(dest_err(part))?;
    drop(file);
    tokio::fs::rename(part, target)
        .await
        .map_err(dest_err(target))?;
    Ok(bytes)
}

/// `dest_dir` joined with each component of an already validated name.
fn destination_path(dest_dir: &Path, meta: &FileMeta) -> PathBuf {
    meta.components()
        .fold(dest_dir.to_path_buf(), |path, component| path.join(component))
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

fn dest_err(path: &Path) -> impl FnOnce(io::Error) -> TransferError {
    let path = path.to_path_buf();
    move |source| TransferError::Destination { path, source }
}

/// Gives the peer time to read our last control message and close first.
async fn linger(connection: &Connection, timeout: Duration) {
    if tokio::time::timeout(timeout, connection.closed()).await.is_err() {
        debug!("peer did not close within the I/O timeout");
    }
}
