//! Public-key fingerprints.
//!
//! A fingerprint is the comparable, displayable and storable form of an
//! Ed25519 public key:
//!
//! ```text
//! fingerprint = lowercase_hex( SHA-256("lanshare-fp-v1" || public_key)[0..16] )
//! ```
//!
//! The domain separator keeps a LanShare fingerprint from ever colliding with
//! a hash of the same key computed for another purpose.  Sixteen bytes (128
//! bits) keep the string short enough to read aloud in groups while leaving
//! accidental collisions out of reach.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{VerifyingKey, PUBLIC_KEY_LENGTH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of digest bytes kept in a fingerprint.
pub const FINGERPRINT_BYTES: usize = 16;

/// Length of the canonical hex form.
pub const FINGERPRINT_HEX_LEN: usize = FINGERPRINT_BYTES * 2;

const FINGERPRINT_DOMAIN: &[u8] = b"lanshare-fp-v1";

/// Errors produced when computing or parsing a fingerprint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    /// The public key is not exactly 32 bytes long.
    #[error("invalid public key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The 32 bytes do not encode a valid Ed25519 point.
    #[error("public key is not a valid Ed25519 point")]
    MalformedKey,

    /// A textual fingerprint could not be parsed.
    #[error("invalid fingerprint {0:?}: expected {FINGERPRINT_HEX_LEN} hex characters")]
    InvalidFormat(String),
}

/// Canonical fingerprint of an Ed25519 public key (32 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

/// Computes the fingerprint of a raw Ed25519 public key.
///
/// Pure and deterministic: bit-identical keys always yield the same
/// fingerprint, on every platform and in every process.
///
/// # Errors
///
/// Returns [`FingerprintError::InvalidKeyLength`] or
/// [`FingerprintError::MalformedKey`] when the key encoding is malformed.
pub fn fingerprint(public_key: &[u8]) -> Result<Fingerprint, FingerprintError> {
    let bytes: [u8; PUBLIC_KEY_LENGTH] =
        public_key
            .try_into()
            .map_err(|_| FingerprintError::InvalidKeyLength {
                expected: PUBLIC_KEY_LENGTH,
                actual: public_key.len(),
            })?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| FingerprintError::MalformedKey)?;

    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    hasher.update(bytes);
    let digest = hasher.finalize();

    Ok(Fingerprint(hex::encode(&digest[..FINGERPRINT_BYTES])))
}

impl Fingerprint {
    /// Parses a fingerprint typed by a user or read from storage.
    ///
    /// Accepts upper- or lowercase hex and ignores `:`, `-` and whitespace
    /// separators, so `ABCD-1234-...` and `abcd1234...` are equivalent.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::InvalidFormat`] if the cleaned string is not
    /// exactly [`FINGERPRINT_HEX_LEN`] hex characters.
    pub fn parse(s: &str) -> Result<Self, FingerprintError> {
        let cleaned: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-') && !c.is_whitespace())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if cleaned.len() != FINGERPRINT_HEX_LEN || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(FingerprintError::InvalidFormat(s.to_string()));
        }
        Ok(Self(cleaned))
    }

    /// Returns the canonical lowercase hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the fingerprint split into dash-separated groups of four
    /// characters for on-screen comparison, e.g. `3f2a-91c0-...`.
    pub fn grouped(&self) -> String {
        self.0
            .as_bytes()
            .chunks(4)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = FingerprintError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;

    fn public_key(seed: u8) -> [u8; 32] {
        SigningKey::from_bytes(&[seed; 32]).verifying_key().to_bytes()
    }

    #[test]
    fn test_fingerprint_is_deterministic_for_identical_keys() {
        // Arrange
        let key = public_key(7);

        // Act
        let a = fingerprint(&key).unwrap();
        let b = fingerprint(&key).unwrap();

        // Assert
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_for_different_keys() {
        let a = fingerprint(&public_key(1)).unwrap();
        let b = fingerprint(&public_key(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_has_canonical_length_and_charset() {
        let fp = fingerprint(&public_key(3)).unwrap();
        assert_eq!(fp.as_str().len(), FINGERPRINT_HEX_LEN);
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_fingerprint_is_stable_across_releases() {
        // Recompute the documented construction by hand; changing it would
        // orphan every pin already stored by remote peers.
        let key = public_key(0);
        let mut hasher = Sha256::new();
        hasher.update(b"lanshare-fp-v1");
        hasher.update(key);
        let expected = hex::encode(&hasher.finalize()[..16]);

        assert_eq!(fingerprint(&key).unwrap().as_str(), expected);
    }

    #[test]
    fn test_fingerprint_rejects_short_key() {
        let result = fingerprint(&[0u8; 31]);
        assert_eq!(
            result,
            Err(FingerprintError::InvalidKeyLength {
                expected: 32,
                actual: 31
            })
        );
    }

    #[test]
    fn test_parse_accepts_grouped_uppercase_form() {
        // Arrange
        let fp = fingerprint(&public_key(9)).unwrap();
        let typed = fp.grouped().to_uppercase();

        // Act
        let parsed = Fingerprint::parse(&typed).unwrap();

        // Assert
        assert_eq!(parsed, fp);
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let bad = "z".repeat(FINGERPRINT_HEX_LEN);
        assert!(matches!(
            Fingerprint::parse(&bad),
            Err(FingerprintError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_grouped_uses_four_character_groups() {
        let fp = fingerprint(&public_key(4)).unwrap();
        let grouped = fp.grouped();
        assert_eq!(grouped.split('-').count(), FINGERPRINT_HEX_LEN / 4);
        assert!(grouped.split('-').all(|g| g.len() == 4));
    }

    #[test]
    fn test_serde_uses_plain_string_form() {
        let fp = fingerprint(&public_key(5)).unwrap();
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.as_str()));

        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
