//! The human verification seam.
//!
//! Pairing never decides on its own whether an unknown peer is who the
//! operator thinks it is.  It hands a [`VerificationRequest`] (peer label,
//! TLS-derived fingerprint, SAS words) to an injected [`PeerVerifier`], which
//! typically asks the operator to compare the words shown on both devices.
//!
//! The terminal implementation lives in the infrastructure layer; tests supply
//! scripted verifiers that always accept or always reject.

use async_trait::async_trait;
use lanshare_core::{Fingerprint, SasCode};
use thiserror::Error;

/// What the operator is asked to confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    /// Label from the peer's Hello.  Self-reported, shown for context only.
    pub peer_label: String,
    /// Fingerprint of the key read from the TLS session.
    pub peer_fingerprint: Fingerprint,
    /// Words that must match the peer's screen.
    pub sas: SasCode,
}

/// The operator's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
}

/// Error type for verifier implementations.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The prompt itself failed (closed stdin, dialog crashed, ...).
    #[error("verification prompt failed: {0}")]
    Prompt(String),
}

/// Asks a human (or a script) whether to trust a peer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerVerifier: Send + Sync {
    /// Presents `request` and returns the verdict.  May wait indefinitely;
    /// callers apply their own deadline.
    async fn verify(&self, request: &VerificationRequest) -> Result<Verdict, VerifyError>;
}
