//! Acceptance rules for an incoming offer.
//!
//! Every entry is checked before the receiver answers, so a bad offer is
//! refused as a whole and nothing touches the disk.

use std::collections::BTreeSet;

use lanshare_core::{FileMeta, FileMetaError};
use thiserror::Error;

/// Why an offer was refused.  The `Display` text is what goes back to the
/// sender in `OfferRejected{reason}`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OfferError {
    #[error("invalid name {name:?}: {source}")]
    InvalidEntry {
        name: String,
        #[source]
        source: FileMetaError,
    },

    #[error("{name} is {size} bytes, limit is {max}")]
    TooLarge { name: String, size: u64, max: u64 },

    #[error("{0} is offered more than once")]
    Duplicate(String),

    /// One entry is a file and another entry would need it to be a directory.
    #[error("{file} is offered as a file but {nested} lives inside it")]
    PathConflict { file: String, nested: String },
}

/// Canonical form of a relative name: components joined with `/`.
pub fn normalized_name(meta: &FileMeta) -> String {
    meta.components().collect::<Vec<_>>().join("/")
}

/// Checks every entry of an offer against the path rules, the per-file size
/// cap, duplicates, and file-versus-directory conflicts.
///
/// # Errors
///
/// Returns the first violation found.
pub fn validate_offer(files: &[FileMeta], max_file_size: u64) -> Result<(), OfferError> {
    let mut names = BTreeSet::new();
    for meta in files {
        meta.validate().map_err(|source| OfferError::InvalidEntry {
            name: meta.relative_path.clone(),
            source,
        })?;
        if meta.size > max_file_size {
            return Err(OfferError::TooLarge {
                name: meta.relative_path.clone(),
                size: meta.size,
                max: max_file_size,
            });
        }
        let name = normalized_name(meta);
        if !names.insert(name.clone()) {
            return Err(OfferError::Duplicate(name));
        }
    }

    // Names sharing a "dir/" prefix sort directly after "dir".
    for name in &names {
        let prefix = format!("{name}/");
        if let Some(nested) = names.range(prefix.clone()..).next() {
            if nested.starts_with(&prefix) {
                return Err(OfferError::PathConflict {
                    file: name.clone(),
                    nested: nested.clone(),
                });
            }
        }
    }
    Ok(())
}
