//! Short Authentication String (SAS) derivation.
//!
//! After the encrypted channel is up, both hosts show the operator a few words.
//! If the words on the two screens match, nobody is sitting in the middle of
//! the connection, because the words are bound to the responder's real public
//! key (read from the TLS session, not from anything the peer claimed) and to
//! a fresh nonce from each side.
//!
//! ```text
//! digest = SHA-256("lanshare-sas-v1" || responder_public_key || initiator_nonce || responder_nonce)
//! word[i] = WORDLIST[digest[i]]      for i in 0..word_count
//! ```
//!
//! The derivation is deterministic: both sides feed in the same triple and
//! therefore display the same words.  Fresh nonces make every session's code
//! different, so an attacker cannot replay an old comparison.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::wordlist::WORDLIST;

/// Length of a SAS nonce in bytes.
pub const NONCE_LEN: usize = 32;

/// Smallest accepted word count.
pub const MIN_SAS_WORDS: u8 = 1;

/// Largest accepted word count.
pub const MAX_SAS_WORDS: u8 = 8;

/// Word count used when none is configured.
pub const DEFAULT_SAS_WORDS: u8 = 3;

const SAS_DOMAIN: &[u8] = b"lanshare-sas-v1";

/// Errors produced by SAS types and derivation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SasError {
    /// A nonce did not decode to exactly [`NONCE_LEN`] bytes.
    #[error("invalid SAS nonce: {0}")]
    InvalidNonce(String),

    /// The requested word count is outside `MIN_SAS_WORDS..=MAX_SAS_WORDS`.
    #[error("SAS word count {0} out of range ({MIN_SAS_WORDS}..={MAX_SAS_WORDS})")]
    InvalidWordCount(u8),

    /// The responder public key is not 32 bytes.
    #[error("invalid responder public key length: {0}")]
    InvalidKeyLength(usize),
}

// ── SasNonce ──────────────────────────────────────────────────────────────────

/// A one-shot random value contributed by one side of a pairing attempt.
///
/// Serialised as lowercase hex on the control stream.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SasNonce([u8; NONCE_LEN]);

impl SasNonce {
    /// Generates a fresh nonce from the operating-system RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    /// Decodes a hex-encoded nonce.
    ///
    /// # Errors
    ///
    /// Returns [`SasError::InvalidNonce`] for non-hex input or a wrong length.
    pub fn from_hex(s: &str) -> Result<Self, SasError> {
        let decoded = hex::decode(s).map_err(|e| SasError::InvalidNonce(e.to_string()))?;
        let bytes: [u8; NONCE_LEN] = decoded.as_slice().try_into().map_err(|_| {
            SasError::InvalidNonce(format!(
                "expected {NONCE_LEN} bytes, got {}",
                decoded.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SasNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SasNonce({})", self.to_hex())
    }
}

impl TryFrom<String> for SasNonce {
    type Error = SasError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<SasNonce> for String {
    fn from(value: SasNonce) -> Self {
        value.to_hex()
    }
}

// ── SasWordCount ──────────────────────────────────────────────────────────────

/// Number of words rendered for a SAS, validated to `1..=8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SasWordCount(u8);

impl SasWordCount {
    /// # Errors
    ///
    /// Returns [`SasError::InvalidWordCount`] when `count` is out of range.
    pub fn new(count: u8) -> Result<Self, SasError> {
        if (MIN_SAS_WORDS..=MAX_SAS_WORDS).contains(&count) {
            Ok(Self(count))
        } else {
            Err(SasError::InvalidWordCount(count))
        }
    }

    pub fn get(self) -> usize {
        usize::from(self.0)
    }
}

impl Default for SasWordCount {
    fn default() -> Self {
        Self(DEFAULT_SAS_WORDS)
    }
}

impl TryFrom<u8> for SasWordCount {
    type Error = SasError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SasWordCount> for u8 {
    fn from(value: SasWordCount) -> Self {
        value.0
    }
}

// ── SasCode ───────────────────────────────────────────────────────────────────

/// The words shown to the operator on both devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasCode(Vec<&'static str>);

impl SasCode {
    pub fn words(&self) -> &[&'static str] {
        &self.0
    }
}

impl fmt::Display for SasCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("-"))
    }
}

/// Derives the SAS for one pairing attempt.
///
/// `responder_public_key` is the raw 32-byte Ed25519 key of the side that
/// accepted the connection.  The initiator reads it from the TLS session; the
/// responder uses its own.
///
/// # Errors
///
/// Returns [`SasError::InvalidKeyLength`] if the key is not 32 bytes.
pub fn derive_sas(
    responder_public_key: &[u8],
    initiator_nonce: &SasNonce,
    responder_nonce: &SasNonce,
    words: SasWordCount,
) -> Result<SasCode, SasError> {
    if responder_public_key.len() != ed25519_dalek::PUBLIC_KEY_LENGTH {
        return Err(SasError::InvalidKeyLength(responder_public_key.len()));
    }

    let mut hasher = Sha256::new();
    hasher.update(SAS_DOMAIN);
    hasher.update(responder_public_key);
    hasher.update(initiator_nonce.as_bytes());
    hasher.update(responder_nonce.as_bytes());
    let digest = hasher.finalize();

    let rendered = digest
        .iter()
        .take(words.get())
        .map(|b| WORDLIST[usize::from(*b)])
        .collect();
    Ok(SasCode(rendered))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
