//! Sending side: build an offer from local paths and stream it.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lanshare_core::{ControlMessage, FileMeta};
use quinn::Connection;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{TransferError, TransferSummary};
use crate::application::pairing::PairedSession;
use crate::infrastructure::transport::control::unexpected;
use crate::infrastructure::transport::file_stream::write_file;
use crate::infrastructure::transport::{CloseCode, FileStreamError, TransportError};

/// Turns command-line paths into `(absolute_path, FileMeta)` pairs.
///
/// A file is offered under its own name; a directory is walked recursively
/// and its files are offered as `dir/sub/file` with `/` separators, in
/// sorted order.  Symlinks and special files inside directories are skipped.
/// Empty directories produce no entries.
///
/// This performs blocking filesystem calls.
///
/// # Errors
///
/// [`TransferError::Source`] for unreadable paths,
/// [`TransferError::UnsendablePath`] for paths without a UTF-8 name, and
/// [`TransferError::DuplicateName`] when two inputs collide.
pub fn collect_files(paths: &[PathBuf]) -> Result<Vec<(PathBuf, FileMeta)>, TransferError> {
    let mut files = Vec::new();
    for path in paths {
        let absolute = std::fs::canonicalize(path).map_err(source_err(path))?;
        let name = utf8_name(&absolute)?;
        let metadata = std::fs::metadata(&absolute).map_err(source_err(&absolute))?;
        if metadata.is_dir() {
            walk_dir(&absolute, &name, &mut files)?;
        } else if metadata.is_file() {
            files.push((absolute, FileMeta::new(name, metadata.len())?));
        } else {
            return Err(TransferError::UnsendablePath {
                path: path.clone(),
                reason: "not a regular file or directory".to_string(),
            });
        }
    }

    let mut seen = HashSet::new();
    for (_, meta) in &files {
        if !seen.insert(meta.relative_path.as_str()) {
            return Err(TransferError::DuplicateName(meta.relative_path.clone()));
        }
    }
    Ok(files)
}

fn walk_dir(
    dir: &Path,
    prefix: &str,
    files: &mut Vec<(PathBuf, FileMeta)>,
) -> Result<(), TransferError> {
    let mut entries = std::fs::read_dir(dir)
        .map_err(source_err(dir))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(source_err(dir))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type().map_err(source_err(&path))?;
        let name = format!("{prefix}/{}", utf8_name(&path)?);
        if file_type.is_dir() {
            walk_dir(&path, &name, files)?;
        } else if file_type.is_file() {
            let len = entry.metadata().map_err(source_err(&path))?.len();
            files.push((path, FileMeta::new(name, len)?));
        } else {
            debug!(path = %path.display(), "skipping symlink or special file");
        }
    }
    Ok(())
}

fn utf8_name(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| TransferError::UnsendablePath {
            path: path.to_path_buf(),
            reason: "no UTF-8 file name".to_string(),
        })
}

fn source_err(path: &Path) -> impl FnOnce(io::Error) -> TransferError {
    let path = path.to_path_buf();
    move |source| TransferError::Source { path, source }
}

/// Offers `files` to the peer and, once accepted, streams each one on its
/// own unidirectional stream.
///
/// Consumes the session: it is closed with [`CloseCode::Done`] after the
/// receiver confirms with `Complete`, or with
/// [`CloseCode::TransferAborted`] on any error.
///
/// # Errors
///
/// Any [`TransferError`]; notably [`TransferError::OfferRejected`] when the
/// receiver refuses the offer.
pub async fn send_files(
    mut session: PairedSession,
    files: &[(PathBuf, FileMeta)],
) -> Result<TransferSummary, TransferError> {
    let attempt = Uuid::new_v4();
    let span = info_span!("transfer", %attempt, role = "sender", peer = %session.peer.label);

    match run(&mut session, files).instrument(span).await {
        Ok(summary) => {
            info!(files = summary.files, bytes = summary.bytes, "transfer complete");
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
    files: &[(PathBuf, FileMeta)],
) -> Result<TransferSummary, TransferError> {
    let offer: Vec<FileMeta> = files.iter().map(|(_, meta)| meta.clone()).collect();
    let offered_bytes = offer.iter().fold(0u64, |acc, meta| acc.saturating_add(meta.size));
    session
        .control
        .send(&ControlMessage::Offer { files: offer })
        .await?;

    // The receiver may still be in its own verify prompt.
    let reply_deadline = session.config.verify_timeout + session.config.io_timeout;
    match session.control.recv_within(reply_deadline, "offer reply").await? {
        ControlMessage::OfferAccepted => {}
        ControlMessage::OfferRejected { reason } => {
            return Err(TransferError::OfferRejected(reason))
        }
        other => return Err(unexpected("offer_accepted", &other).into()),
    }
    info!(files = files.len(), bytes = offered_bytes, "offer accepted");

    let mut summary = TransferSummary::default();
    for (path, meta) in files {
        let sent = send_one(&session.connection, session.config.io_timeout, path, meta).await?;
        summary.files += 1;
        summary.bytes += sent;
    }

    match session.control.recv("complete").await? {
        ControlMessage::Complete { files, bytes }
            if files == summary.files && bytes == summary.bytes => {}
        ControlMessage::Complete { files, bytes } => {
            return Err(TransferError::Incomplete {
                files,
                bytes,
                expected_files: summary.files,
                expected_bytes: summary.bytes,
            })
        }
        other => return Err(unexpected("complete", &other).into()),
    }
    Ok(summary)
}

async fn send_one(
    connection: &Connection,
    io_timeout: Duration,
    path: &Path,
    meta: &FileMeta,
) -> Result<u64, TransferError> {
    let file = tokio::fs::File::open(path).await.map_err(source_err(path))?;
    let mut stream = tokio::time::timeout(io_timeout, connection.open_uni())
        .await
        .map_err(|_| TransportError::Timeout("open data stream"))?
        .map_err(TransportError::from)?;

    match write_file(&mut stream, meta, file, io_timeout).await {
        Ok(sent) => {
            stream
                .finish()
                .map_err(|e| FileStreamError::Io(io::Error::new(io::ErrorKind::NotConnected, e)))?;
            debug!(name = %meta.relative_path, bytes = sent, "file sent");
            Ok(sent)
        }
        Err(e) => {
            // Reset rather than finish so the receiver sees an abort.
            let _ = stream.reset(CloseCode::TransferAborted.varint());
            Err(e.into())
        }
    }
}
