//! File transfer over a paired session.
//!
//! ```text
//! sender                              receiver
//!   Offer{files} ───────────────────►   validate every entry
//!                ◄─────────────────── OfferAccepted | OfferRejected{reason}
//!   uni stream: header + payload ────►  <name>.lanshare-part ─► rename
//!   ... one stream per file, in offer order ...
//!                ◄─────────────────── Complete{files, bytes}
//!   close(Done)
//! ```
//!
//! The sender closes the connection only after `Complete` arrives, because a
//! QUIC close discards stream data still in flight.
//!
//! # Sub-modules
//!
//! - **`send`** – walks local paths into an offer and streams the files.
//! - **`receive`** – validates the offer and writes each stream to disk.
//! - **`offer`** – the receiver's acceptance rules for an offer.

use std::io;
use std::path::PathBuf;

use lanshare_core::FileMetaError;
use thiserror::Error;

use crate::infrastructure::transport::{ControlError, FileStreamError, TransportError};

pub mod offer;
pub mod receive;
pub mod send;

pub use offer::{validate_offer, OfferError};
pub use receive::receive_files;
pub use send::{collect_files, send_files};

/// Suffix of the temporary file a payload is written to before it is renamed
/// into place.
pub const PART_SUFFIX: &str = ".lanshare-part";

/// Totals for one finished transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: u64,
    pub bytes: u64,
}

/// Error type for transfer operations.  Any of these aborts the whole
/// transfer; partially sent files are never resumed.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The control dialogue failed.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Opening or accepting a data stream failed, or the connection dropped.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A data stream was malformed, truncated, or failed mid-copy.
    #[error(transparent)]
    Stream(#[from] FileStreamError),

    /// A local path could not be read while building or sending the offer.
    #[error("cannot read {path}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A destination file or directory could not be written.
    #[error("cannot write {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A local path has no usable relative name.
    #[error("cannot send {path}: {reason}")]
    UnsendablePath { path: PathBuf, reason: String },

    /// A relative name built from local paths is invalid.
    #[error(transparent)]
    InvalidName(#[from] FileMetaError),

    /// Two local paths map to the same relative name.
    #[error("more than one file would be sent as {0}")]
    DuplicateName(String),

    /// The receiver refused the offer.
    #[error("peer rejected the offer: {0}")]
    OfferRejected(String),

    /// We refused the sender's offer.
    #[error("refused offer: {0}")]
    InvalidOffer(#[from] OfferError),

    /// A data stream announced a file that is not (or no longer) in the
    /// offer, or with a different size.
    #[error("stream for {name} does not match the offer: {reason}")]
    OfferMismatch { name: String, reason: String },

    /// The receiver's totals differ from what was sent.
    #[error("peer reported {files} files / {bytes} bytes, expected {expected_files} / {expected_bytes}")]
    Incomplete {
        files: u64,
        bytes: u64,
        expected_files: u64,
        expected_bytes: u64,
    },
}
