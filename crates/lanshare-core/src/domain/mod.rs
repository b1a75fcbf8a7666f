//! Domain entities for LanShare.
//!
//! Pure types and functions with no infrastructure dependencies: everything in
//! here can be compiled and tested without a network or a disk.

/// Long-lived Ed25519 device keypair.
pub mod identity;

/// Stable, displayable digest of a public key.
pub mod fingerprint;

/// Short Authentication String derivation.
pub mod sas;

/// Per-file metadata carried in transfer offers and stream headers.
pub mod file_meta;

mod wordlist;
