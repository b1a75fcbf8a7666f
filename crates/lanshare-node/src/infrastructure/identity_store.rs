//! Persistence of the device [`Identity`] as a PKCS#8 PEM file.
//!
//! The key is loaded once at startup and then passed around as
//! `Arc<Identity>`; nothing re-reads the file mid-process.
//!
//! Loading distinguishes "no key yet" from "key present but unreadable".  Only
//! the former may lead to a fresh key: regenerating over a corrupt file would
//! silently change our fingerprint and orphan every pin remote peers hold.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use lanshare_core::{Identity, IdentityError};
use thiserror::Error;
use tracing::{info, warn};

/// Errors from loading or saving the device key.
#[derive(Debug, Error)]
pub enum IdentityStoreError {
    /// No key file exists at the path.
    #[error("no identity key at {0}")]
    NotFound(PathBuf),

    /// The file exists but does not decode as an Ed25519 PKCS#8 key.
    #[error("identity key at {path} is corrupt; refusing to replace it: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: IdentityError,
    },

    /// The key could not be encoded for writing.
    #[error(transparent)]
    Encode(IdentityError),

    /// Any other file-system failure.
    #[error("I/O error accessing identity key at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Loads the identity stored at `path`.
///
/// # Errors
///
/// [`IdentityStoreError::NotFound`] when the file is absent,
/// [`IdentityStoreError::Corrupt`] when it cannot be decoded, and
/// [`IdentityStoreError::Io`] for every other read failure.
pub fn load(path: &Path) -> Result<Identity, IdentityStoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(IdentityStoreError::NotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(IdentityStoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let corrupt = |source| IdentityStoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    };
    let pem = String::from_utf8(bytes)
        .map_err(|e| corrupt(IdentityError::Corrupt(format!("not PEM text: {e}"))))?;
    Identity::from_pkcs8_pem(&pem).map_err(corrupt)
}

/// Loads the identity at `path`, generating and saving a new one only if no
/// key file exists yet.
///
/// # Errors
///
/// Every [`load`] error except `NotFound` is returned unchanged, plus any
/// failure to write the new key.
pub fn load_or_create(path: &Path) -> Result<Identity, IdentityStoreError> {
    match load(path) {
        Ok(identity) => {
            info!(fingerprint = %identity.fingerprint(), "loaded device identity");
            Ok(identity)
        }
        Err(IdentityStoreError::NotFound(_)) => {
            let identity = Identity::generate();
            save(path, &identity)?;
            info!(
                fingerprint = %identity.fingerprint(),
                path = %path.display(),
                "generated new device identity"
            );
            Ok(identity)
        }
        Err(e) => {
            warn!("device identity unusable: {e}");
            Err(e)
        }
    }
}

/// Writes `identity` to `path` with owner-only permissions on Unix.
///
/// # Errors
///
/// Returns [`IdentityStoreError::Encode`] or [`IdentityStoreError::Io`].
pub fn save(path: &Path, identity: &Identity) -> Result<(), IdentityStoreError> {
    let io_err = |source| IdentityStoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }

    let pem = identity.to_pkcs8_pem().map_err(IdentityStoreError::Encode)?;
    fs::write(path, pem).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path).map_err(io_err)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms).map_err(io_err)?;
    }

    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_path() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("lanshare_id_test_{}", Uuid::new_v4()));
        let path = dir.join("device_key.pem");
        (dir, path)
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let (_dir, path) = scratch_path();
        assert!(matches!(load(&path), Err(IdentityStoreError::NotFound(_))));
    }

    #[test]
    fn test_load_or_create_generates_then_reuses() {
        // Arrange
        let (dir, path) = scratch_path();

        // Act
        let first = load_or_create(&path).unwrap();
        let second = load_or_create(&path).unwrap();

        // Assert
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert!(path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_or_create_never_overwrites_corrupt_key() {
        // Arrange
        let (dir, path) = scratch_path();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "not a key").unwrap();

        // Act
        let result = load_or_create(&path);

        // Assert
        assert!(matches!(result, Err(IdentityStoreError::Corrupt { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not a key");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_binary_key_file_is_corrupt_not_io() {
        // Arrange
        let (dir, path) = scratch_path();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();

        // Act
        let loaded = load(&path);
        let created = load_or_create(&path);

        // Assert
        assert!(matches!(loaded, Err(IdentityStoreError::Corrupt { .. })));
        assert!(matches!(created, Err(IdentityStoreError::Corrupt { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), [0xff, 0xfe, 0x00, 0x80]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, path) = scratch_path();
        save(&path, &Identity::generate()).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        std::fs::remove_dir_all(&dir).ok();
    }
}
