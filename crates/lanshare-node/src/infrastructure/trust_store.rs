//! Durable store of pinned peers: fingerprint → human-readable label.
//!
//! File format (`trusted_peers.toml`):
//!
//! ```toml
//! version = 1
//!
//! [peers]
//! 3f2a91c0d4e5b6a7980112233445566a = "alice-laptop"
//! ```
//!
//! # Durability
//!
//! [`TrustStore::add`] and [`TrustStore::remove`] only return `Ok` once the
//! new content has reached the disk: the whole file is written to a sibling
//! temp file, `fsync`ed, and atomically renamed over the old one.  The
//! in-memory map is updated after the rename, so a failed write leaves both
//! the file and the map exactly as they were.
//!
//! # Concurrency
//!
//! Every operation goes through one `tokio::sync::Mutex`, so concurrent
//! pairing attempts see a consistent map and their writes never interleave.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use lanshare_core::Fingerprint;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// On-disk format version written by this release.
pub const TRUST_STORE_VERSION: u32 = 1;

/// Error type for trust store operations.
#[derive(Debug, Error)]
pub enum TrustStoreError {
    /// A file-system operation failed.
    #[error("I/O error accessing trust store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file exists but cannot be parsed.  Pins are never silently dropped,
    /// so this is fatal rather than treated as an empty store.
    #[error("trust store at {path} is unreadable: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The file was written by a newer release.
    #[error("trust store at {path} has unsupported version {version}")]
    UnsupportedVersion { path: PathBuf, version: u32 },

    #[error("failed to serialize trust store: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct TrustFile {
    version: u32,
    #[serde(default)]
    peers: BTreeMap<String, String>,
}

/// Persisted mapping from peer fingerprint to label.
#[derive(Debug)]
pub struct TrustStore {
    path: PathBuf,
    peers: Mutex<BTreeMap<Fingerprint, String>>,
}

impl TrustStore {
    /// Opens the store at `path`.  A missing file is an empty store; it is
    /// created on the first [`add`](Self::add).
    ///
    /// # Errors
    ///
    /// [`TrustStoreError::Corrupt`] or [`TrustStoreError::UnsupportedVersion`]
    /// when an existing file cannot be used, [`TrustStoreError::Io`] for read
    /// failures.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, TrustStoreError> {
        let path = path.into();
        let peers = match tokio::fs::read_to_string(&path).await {
            Ok(content) => parse(&path, &content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(TrustStoreError::Io { path, source }),
        };

        debug!(path = %path.display(), pinned = peers.len(), "opened trust store");
        Ok(Self {
            path,
            peers: Mutex::new(peers),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the label pinned for `fingerprint`, if any.
    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<String> {
        self.peers.lock().await.get(fingerprint).cloned()
    }

    /// Pins `fingerprint` under `label`, replacing any previous label.
    ///
    /// Returns only after the change is durable on disk.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError::Io`] if the file could not be written; the
    /// store is unchanged in that case.
    pub async fn add(&self, fingerprint: &Fingerprint, label: &str) -> Result<(), TrustStoreError> {
        let mut peers = self.peers.lock().await;
        if peers.get(fingerprint).map(String::as_str) == Some(label) {
            return Ok(());
        }

        let mut next = peers.clone();
        next.insert(fingerprint.clone(), label.to_string());
        persist(&self.path, &next).await?;
        *peers = next;

        info!(fingerprint = %fingerprint, label, "pinned peer");
        Ok(())
    }

    /// Unpins `fingerprint`.  Returns the removed label, or `None` if the
    /// fingerprint was not pinned.
    ///
    /// # Errors
    ///
    /// Returns [`TrustStoreError::Io`] if the file could not be written.
    pub async fn remove(&self, fingerprint: &Fingerprint) -> Result<Option<String>, TrustStoreError> {
        let mut peers = self.peers.lock().await;
        if !peers.contains_key(fingerprint) {
            return Ok(None);
        }

        let mut next = peers.clone();
        let removed = next.remove(fingerprint);
        persist(&self.path, &next).await?;
        *peers = next;

        info!(fingerprint = %fingerprint, "unpinned peer");
        Ok(removed)
    }

    /// Returns all pins ordered by fingerprint.
    pub async fn list(&self) -> Vec<(Fingerprint, String)> {
        self.peers
            .lock()
            .await
            .iter()
            .map(|(fp, label)| (fp.clone(), label.clone()))
            .collect()
    }
}

fn parse(path: &Path, content: &str) -> Result<BTreeMap<Fingerprint, String>, TrustStoreError> {
    let corrupt = |reason: String| TrustStoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let file: TrustFile = toml::from_str(content).map_err(|e| corrupt(e.to_string()))?;
    if file.version > TRUST_STORE_VERSION {
        return Err(TrustStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            version: file.version,
        });
    }

    file.peers
        .into_iter()
        .map(|(fp, label)| {
            Fingerprint::parse(&fp)
                .map(|fp| (fp, label))
                .map_err(|e| corrupt(e.to_string()))
        })
        .collect()
}

/// Writes `peers` to a temp file next to `path`, syncs it, and renames it
/// into place.
async fn persist(path: &Path, peers: &BTreeMap<Fingerprint, String>) -> Result<(), TrustStoreError> {
    let file = TrustFile {
        version: TRUST_STORE_VERSION,
        peers: peers
            .iter()
            .map(|(fp, label)| (fp.to_string(), label.clone()))
            .collect(),
    };
    let content = toml::to_string_pretty(&file)?;

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;
    }

    let tmp = temp_path(path);
    let result = async {
        let mut out = tokio::fs::File::create(&tmp).await.map_err(io_err(&tmp))?;
        out.write_all(content.as_bytes()).await.map_err(io_err(&tmp))?;
        out.sync_all().await.map_err(io_err(&tmp))?;
        drop(out);
        tokio::fs::rename(&tmp, path).await.map_err(io_err(path))
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
        return result;
    }

    // Make the rename itself durable.
    #[cfg(unix)]
    {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Ok(handle) = tokio::fs::File::open(dir).await {
                let _ = handle.sync_all().await;
            }
        }
    }

    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> TrustStoreError {
    let path = path.to_path_buf();
    move |source| TrustStoreError::Io { path, source }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trusted_peers.toml".to_string());
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lanshare_core::Identity;

    fn scratch_path() -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("lanshare_trust_test_{}", Uuid::new_v4()));
        let path = dir.join("trusted_peers.toml");
        (dir, path)
    }

    fn some_fp() -> Fingerprint {
        Identity::generate().fingerprint().clone()
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let (_dir, path) = scratch_path();
        let store = TrustStore::open(&path).await.unwrap();
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_after_add_returns_label() {
        // Arrange
        let (dir, path) = scratch_path();
        let store = TrustStore::open(&path).await.unwrap();
        let fp = some_fp();

        // Act
        store.add(&fp, "alice-laptop").await.unwrap();

        // Assert
        assert_eq!(store.get(&fp).await.as_deref(), Some("alice-laptop"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let (dir, path) = scratch_path();
        let store = TrustStore::open(&path).await.unwrap();
        let fp = some_fp();

        store.add(&fp, "bob-phone").await.unwrap();
        let after_one = std::fs::read_to_string(&path).unwrap();
        store.add(&fp, "bob-phone").await.unwrap();
        let after_two = std::fs::read_to_string(&path).unwrap();

        assert_eq!(after_one, after_two);
        assert_eq!(store.list().await.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_add_overwrites_label() {
        let (dir, path) = scratch_path();
        let store = TrustStore::open(&path).await.unwrap();
        let fp = some_fp();

        store.add(&fp, "old").await.unwrap();
        store.add(&fp, "new").await.unwrap();

        assert_eq!(store.get(&fp).await.as_deref(), Some("new"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_pins_survive_reopen() {
        // Arrange
        let (dir, path) = scratch_path();
        let fp = some_fp();
        {
            let store = TrustStore::open(&path).await.unwrap();
            store.add(&fp, "alice-laptop").await.unwrap();
        }

        // Act
        let reopened = TrustStore::open(&path).await.unwrap();

        // Assert
        assert_eq!(reopened.get(&fp).await.as_deref(), Some("alice-laptop"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_remove_unpins_durably() {
        let (dir, path) = scratch_path();
        let fp = some_fp();
        let store = TrustStore::open(&path).await.unwrap();
        store.add(&fp, "x").await.unwrap();

        let removed = store.remove(&fp).await.unwrap();
        let reopened = TrustStore::open(&path).await.unwrap();

        assert_eq!(removed.as_deref(), Some("x"));
        assert_eq!(reopened.get(&fp).await, None);
        assert_eq!(store.remove(&fp).await.unwrap(), None);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error_not_an_empty_store() {
        let (dir, path) = scratch_path();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "version = 1\n[peers]\nnot-a-fingerprint = \"x\"\n").unwrap();

        let result = TrustStore::open(&path).await;

        assert!(matches!(result, Err(TrustStoreError::Corrupt { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_newer_version_is_refused() {
        let (dir, path) = scratch_path();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "version = 2\n").unwrap();

        let result = TrustStore::open(&path).await;

        assert!(matches!(
            result,
            Err(TrustStoreError::UnsupportedVersion { version: 2, .. })
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_failed_write_leaves_memory_unchanged() {
        // Arrange: open on a fresh path, then put a regular file where the
        // store's directory should be so nothing can be written there.
        let (dir, _) = scratch_path();
        let store_dir = dir.join("store");
        let store = TrustStore::open(store_dir.join("trusted_peers.toml")).await.unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&store_dir, "").unwrap();
        let fp = some_fp();

        // Act
        let result = store.add(&fp, "alice").await;

        // Assert
        assert!(matches!(result, Err(TrustStoreError::Io { .. })));
        assert_eq!(store.get(&fp).await, None);
        assert!(store.list().await.is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_failed_remove_keeps_pin() {
        // Arrange
        let (dir, path) = scratch_path();
        let store = TrustStore::open(&path).await.unwrap();
        let fp = some_fp();
        store.add(&fp, "alice").await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, "").unwrap();

        // Act
        let result = store.remove(&fp).await;

        // Assert
        assert!(matches!(result, Err(TrustStoreError::Io { .. })));
        assert_eq!(store.get(&fp).await.as_deref(), Some("alice"));
        std::fs::remove_file(&dir).ok();
    }

    #[tokio::test]
    async fn test_concurrent_adds_all_land() {
        let (dir, path) = scratch_path();
        let store = std::sync::Arc::new(TrustStore::open(&path).await.unwrap());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.add(&some_fp(), &format!("peer-{i}")).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let reopened = TrustStore::open(&path).await.unwrap();
        assert_eq!(reopened.list().await.len(), 8);
        std::fs::remove_dir_all(&dir).ok();
    }
}
