//! quinn endpoint construction and the close-on-drop connection guard.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lanshare_core::Identity;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use quinn::{Connection, Endpoint, IdleTimeout, TransportConfig};
use tracing::debug;

use super::tls::{client_crypto, server_crypto, TlsIdentity};
use super::{CloseCode, TransportError};

/// TLS server name used on every dial.  Certificates are never checked
/// against it; it only has to be a syntactically valid DNS name.
pub const SERVER_NAME: &str = "lanshare.local";

/// Builds the shared transport parameters.
///
/// The idle timeout is twice the I/O timeout and keep-alives fire at a third
/// of it, so a connection stays up while an operator is reading the SAS.
fn transport_config(io_timeout: Duration) -> Result<Arc<TransportConfig>, TransportError> {
    let idle = IdleTimeout::try_from(io_timeout.saturating_mul(2))
        .map_err(|e| TransportError::InvalidTimeout(e.to_string()))?;

    let mut transport = TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    transport.keep_alive_interval(Some(io_timeout / 3));
    Ok(Arc::new(transport))
}

/// Creates an endpoint that accepts incoming pairing connections on `addr`.
///
/// # Errors
///
/// Returns [`TransportError`] if TLS material cannot be built or the socket
/// cannot be bound.
pub fn server_endpoint(
    identity: &Identity,
    label: &str,
    addr: SocketAddr,
    io_timeout: Duration,
) -> Result<Endpoint, TransportError> {
    let tls = TlsIdentity::from_identity(identity, label)?;
    let crypto = QuicServerConfig::try_from(server_crypto(&tls)?)
        .map_err(|e| TransportError::QuicCrypto(e.to_string()))?;

    let mut config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
    config.transport_config(transport_config(io_timeout)?);

    let endpoint =
        Endpoint::server(config, addr).map_err(|source| TransportError::Bind { addr, source })?;
    debug!(local = ?endpoint.local_addr().ok(), "server endpoint ready");
    Ok(endpoint)
}

/// Creates an endpoint for dialing peers, bound to `addr` (usually port 0).
///
/// # Errors
///
/// Returns [`TransportError`] if TLS material cannot be built or the socket
/// cannot be bound.
pub fn client_endpoint(
    identity: &Identity,
    label: &str,
    addr: SocketAddr,
    io_timeout: Duration,
) -> Result<Endpoint, TransportError> {
    let tls = TlsIdentity::from_identity(identity, label)?;
    let crypto = QuicClientConfig::try_from(client_crypto(&tls)?)
        .map_err(|e| TransportError::QuicCrypto(e.to_string()))?;

    let mut config = quinn::ClientConfig::new(Arc::new(crypto));
    config.transport_config(transport_config(io_timeout)?);

    let mut endpoint =
        Endpoint::client(addr).map_err(|source| TransportError::Bind { addr, source })?;
    endpoint.set_default_client_config(config);
    Ok(endpoint)
}

// ── CloseOnDrop ───────────────────────────────────────────────────────────────

/// Closes the wrapped connection with an application error code when
/// dropped, unless [`close`](Self::close) already did.
///
/// Holding one of these for the whole lifetime of a handshake or transfer
/// means early returns via `?`, panics, and cancellation (the future being
/// dropped) all close the connection with a meaningful code.
#[derive(Debug)]
pub struct CloseOnDrop {
    connection: Connection,
    code: CloseCode,
    armed: bool,
}

impl CloseOnDrop {
    pub fn new(connection: Connection, code: CloseCode) -> Self {
        Self {
            connection,
            code,
            armed: true,
        }
    }

    /// Changes the code used if the guard fires.
    pub fn set_code(&mut self, code: CloseCode) {
        self.code = code;
    }

    /// Closes the connection now with `code`.
    pub fn close(mut self, code: CloseCode) {
        self.armed = false;
        self.connection.close(code.varint(), code.reason());
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.armed {
            debug!(code = self.code.code(), remote = %self.connection.remote_address(), "closing connection");
            self.connection.close(self.code.varint(), self.code.reason());
        }
    }
}
