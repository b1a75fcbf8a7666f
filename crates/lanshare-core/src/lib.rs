//! # lanshare-core
//!
//! Shared library for LanShare containing the device identity, the public-key
//! fingerprint, Short Authentication String (SAS) derivation, and the wire
//! framing used on the control stream and on per-file data streams.
//!
//! This crate has zero dependencies on sockets, the filesystem, or an async
//! runtime.  The `lanshare-node` crate wires it to QUIC, mDNS and disk.
//!
//! # Architecture overview
//!
//! Two hosts on the same LAN pair without a certificate authority:
//!
//! 1. Each host owns a long-lived Ed25519 [`Identity`].  Its public key is
//!    summarised by a [`Fingerprint`].
//! 2. The hosts open an encrypted QUIC connection whose certificates are
//!    self-issued from those identities.
//! 3. Both hosts derive the same [`SasCode`] from the responder's key and two
//!    fresh nonces.  The humans compare the words out of band.
//! 4. Accepted peers are remembered by fingerprint, and files are streamed one
//!    per QUIC stream using the [`protocol::file_header`] framing.
//!
//! - **`domain`** – identity, fingerprint, SAS and file metadata.
//! - **`protocol`** – control-stream messages and their length-delimited JSON
//!   framing, plus the binary per-file stream header.

pub mod domain;
pub mod protocol;

pub use domain::file_meta::{FileMeta, FileMetaError};
pub use domain::fingerprint::{fingerprint, Fingerprint, FingerprintError};
pub use domain::identity::{Identity, IdentityError};
pub use domain::sas::{derive_sas, SasCode, SasError, SasNonce, SasWordCount};
pub use protocol::messages::{ControlMessage, Hello};

/// ALPN protocol identifier negotiated on every LanShare QUIC connection.
pub const ALPN: &[u8] = b"lanshare/1";

/// mDNS service type under which LanShare peers advertise themselves.
pub const SERVICE_TYPE: &str = "_lanshare._udp.local.";
