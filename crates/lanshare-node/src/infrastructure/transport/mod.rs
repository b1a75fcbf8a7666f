//! QUIC transport: self-signed TLS 1.3, endpoints, the control stream, and
//! per-file data streams.
//!
//! # Sub-modules
//!
//! - **`tls`** – builds the rustls client/server configs from the device
//!   [`Identity`](lanshare_core::Identity) and extracts the peer's real
//!   Ed25519 key from its certificate after the handshake.
//!
//! - **`endpoint`** – quinn endpoint construction and [`CloseOnDrop`], the
//!   guard that closes a connection on every exit path.
//!
//! - **`control`** – the ordered request/response dialogue on the single
//!   bidirectional stream.
//!
//! - **`file_stream`** – header + payload on one unidirectional stream per
//!   file.
//!
//! # Why certificate validation is disabled
//!
//! There is no CA on a LAN.  Each side presents a certificate self-issued
//! from its identity key, and the verifiers accept it without chain checks
//! while still verifying the TLS handshake signature.  That proves the peer
//! holds the private key behind the certificate.  Whether that key belongs to
//! the person you meant to reach is settled afterwards by the SAS comparison
//! or an existing pin.

use std::net::SocketAddr;

use lanshare_core::IdentityError;
use quinn::VarInt;
use thiserror::Error;

pub mod control;
pub mod endpoint;
pub mod file_stream;
pub mod tls;

pub use control::{ControlChannel, ControlError};
pub use endpoint::{client_endpoint, server_endpoint, CloseOnDrop, SERVER_NAME};
pub use file_stream::FileStreamError;

/// Application error codes sent in QUIC `CONNECTION_CLOSE` and `RESET_STREAM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Everything finished normally.
    Done,
    /// The pairing handshake failed or was rejected.
    PairingAborted,
    /// A transfer failed after pairing succeeded.
    TransferAborted,
}

impl CloseCode {
    pub fn code(self) -> u32 {
        match self {
            CloseCode::Done => 0,
            CloseCode::PairingAborted => 1,
            CloseCode::TransferAborted => 2,
        }
    }

    pub fn varint(self) -> VarInt {
        VarInt::from_u32(self.code())
    }

    pub fn reason(self) -> &'static [u8] {
        match self {
            CloseCode::Done => b"done",
            CloseCode::PairingAborted => b"pairing aborted",
            CloseCode::TransferAborted => b"transfer aborted",
        }
    }
}

/// Error type for transport setup and connection-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The identity could not be turned into TLS material.
    #[error("identity unusable for TLS: {0}")]
    Identity(#[from] IdentityError),

    /// The self-signed certificate could not be generated.
    #[error("certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),

    /// rustls rejected the configuration.
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),

    /// The TLS config cannot be used for QUIC.
    #[error("TLS config unusable for QUIC: {0}")]
    QuicCrypto(String),

    /// A timeout is too large for the QUIC idle timer.
    #[error("invalid transport timeout: {0}")]
    InvalidTimeout(String),

    /// The UDP socket could not be bound.
    #[error("failed to bind QUIC endpoint on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The dial could not be started (bad address, endpoint stopping).
    #[error("failed to start connection: {0}")]
    Connect(#[from] quinn::ConnectError),

    /// The connection failed or was closed by the peer.
    #[error("connection failed: {0}")]
    Connection(#[from] quinn::ConnectionError),

    /// A step did not complete within its deadline.
    #[error("timed out during {0}")]
    Timeout(&'static str),

    /// The peer presented no certificate.
    #[error("peer presented no certificate")]
    MissingPeerCertificate,

    /// The peer certificate's key is not Ed25519.
    #[error("peer certificate key is not Ed25519 (algorithm {0})")]
    UnexpectedKeyType(String),

    /// The peer certificate could not be parsed.
    #[error("malformed peer certificate: {0}")]
    MalformedCertificate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_codes_are_stable() {
        assert_eq!(CloseCode::Done.code(), 0);
        assert_eq!(CloseCode::PairingAborted.code(), 1);
        assert_eq!(CloseCode::TransferAborted.code(), 2);
    }

    #[test]
    fn test_close_code_varint_matches_code() {
        assert_eq!(CloseCode::TransferAborted.varint(), VarInt::from_u32(2));
    }
}
