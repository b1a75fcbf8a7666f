//! Per-file metadata: the relative name a file will be written under on the
//! receiving host and its exact size in bytes.
//!
//! Relative paths always use `/` as separator on the wire, whatever the
//! sender's platform.  A path received from a peer is untrusted: before it is
//! joined onto a download directory it must pass [`FileMeta::validate`], which
//! refuses anything that could escape that directory.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest relative path representable in the stream header's `u16` field.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Reasons a [`FileMeta`] is refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileMetaError {
    #[error("relative path is empty")]
    EmptyPath,

    #[error("relative path is {0} bytes, longer than the {MAX_NAME_LEN}-byte header limit")]
    PathTooLong(usize),

    #[error("relative path {0:?} is absolute")]
    AbsolutePath(String),

    #[error("relative path {0:?} escapes the destination directory")]
    PathTraversal(String),

    #[error("relative path {0:?} contains a NUL byte")]
    NulByte(String),

    #[error("relative path {0:?} contains an empty component")]
    EmptyComponent(String),
}

/// Name and size of one file in a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileMeta {
    pub relative_path: String,
    pub size: u64,
}

impl FileMeta {
    /// Builds a validated `FileMeta`.
    ///
    /// # Errors
    ///
    /// Returns a [`FileMetaError`] describing why the path is unacceptable.
    pub fn new(relative_path: impl Into<String>, size: u64) -> Result<Self, FileMetaError> {
        let meta = Self {
            relative_path: relative_path.into(),
            size,
        };
        meta.validate()?;
        Ok(meta)
    }

    /// Checks that the relative path is safe to join onto a destination
    /// directory and fits the stream header.
    ///
    /// # Errors
    ///
    /// Returns the first rule the path violates.
    pub fn validate(&self) -> Result<(), FileMetaError> {
        let path = self.relative_path.as_str();
        if path.is_empty() {
            return Err(FileMetaError::EmptyPath);
        }
        if path.len() > MAX_NAME_LEN {
            return Err(FileMetaError::PathTooLong(path.len()));
        }
        if path.contains('\0') {
            return Err(FileMetaError::NulByte(path.to_string()));
        }
        if path.starts_with('/') || path.starts_with('\\') || has_drive_prefix(path) {
            return Err(FileMetaError::AbsolutePath(path.to_string()));
        }
        for component in path.split(['/', '\\']) {
            match component {
                "" => return Err(FileMetaError::EmptyComponent(path.to_string())),
                "." | ".." => return Err(FileMetaError::PathTraversal(path.to_string())),
                _ => {}
            }
        }
        Ok(())
    }

    /// Iterates over the components of the relative path.  Both `/` and `\`
    /// separate components, matching [`validate`](Self::validate).
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.relative_path.split(['/', '\\'])
    }
}

/// `C:` style prefixes are absolute on Windows receivers.
fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

// ── Tests ─────────────────────────────────────────────────────────────────────
