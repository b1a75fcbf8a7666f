//! TLS material and verifiers for self-issued identity certificates.
//!
//! Both the client and the server present an X.509 certificate signed by the
//! device's Ed25519 identity key.  The verifiers below skip chain validation
//! but delegate handshake-signature checks to the ring provider, so a peer
//! cannot present a certificate for a key it does not hold.

use std::sync::Arc;

use lanshare_core::{Identity, ALPN};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, SignatureScheme};

use super::TransportError;

/// OID of the Ed25519 public key algorithm (RFC 8410).
const ED25519_OID: &str = "1.3.101.112";

/// A certificate + private key pair derived from the device identity.
pub struct TlsIdentity {
    cert: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl TlsIdentity {
    /// Issues a self-signed certificate for `identity`'s key.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the key cannot be encoded or the
    /// certificate cannot be generated.
    pub fn from_identity(identity: &Identity, label: &str) -> Result<Self, TransportError> {
        let key_der = identity.to_pkcs8_der()?;
        let key_pair = KeyPair::try_from(key_der.as_slice())?;

        let mut params = CertificateParams::new(vec![super::SERVER_NAME.to_string()])?;
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, label);
        params.distinguished_name = name;

        let cert = params.self_signed(&key_pair)?;
        Ok(Self {
            cert: cert.der().clone(),
            key_der,
        })
    }

    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.cert
    }

    fn chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.cert.clone()]
    }

    fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity").finish_non_exhaustive()
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client-side rustls config: TLS 1.3 only, accept any server certificate,
/// present our own certificate for client authentication.
///
/// # Errors
///
/// Returns [`TransportError::Tls`] if rustls rejects the configuration.
pub fn client_crypto(tls: &TlsIdentity) -> Result<rustls::ClientConfig, TransportError> {
    let provider = provider();
    let mut config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
        .with_client_auth_cert(tls.chain(), tls.private_key())?;
    config.alpn_protocols = vec![ALPN.to_vec()];
    Ok(config)
}

/// Server-side rustls config: TLS 1.3 only, require and accept any client
/// certificate, present our own certificate.
///
/// # Errors
///
/// Returns [`TransportError::Tls`] if rustls rejects the configuration.
pub fn server_crypto(tls: &TlsIdentity) -> Result<rustls::ServerConfig, TransportError> {
    let provider = provider();
    let mut config = rustls::ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_client_cert_verifier(Arc::new(AcceptAnyClientCert { provider }))
        .with_single_cert(tls.chain(), tls.private_key())?;
    config.alpn_protocols = vec![ALPN.to_vec()];
    Ok(config)
}

/// Extracts the raw 32-byte Ed25519 key from a DER certificate.
///
/// # Errors
///
/// [`TransportError::MalformedCertificate`] if the DER does not parse, or
/// [`TransportError::UnexpectedKeyType`] if the key is not Ed25519.
pub fn ed25519_key_from_cert(der: &[u8]) -> Result<[u8; 32], TransportError> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| TransportError::MalformedCertificate(e.to_string()))?;
    let spki = cert.public_key();

    let algorithm = spki.algorithm.algorithm.to_id_string();
    if algorithm != ED25519_OID {
        return Err(TransportError::UnexpectedKeyType(algorithm));
    }

    <[u8; 32]>::try_from(&spki.subject_public_key.data[..])
        .map_err(|_| TransportError::MalformedCertificate("Ed25519 key is not 32 bytes".into()))
}

/// Reads the peer's real public key from an established connection.
///
/// # Errors
///
/// [`TransportError::MissingPeerCertificate`] if the peer sent none, plus the
/// errors of [`ed25519_key_from_cert`].
pub fn peer_public_key(connection: &quinn::Connection) -> Result<[u8; 32], TransportError> {
    let identity = connection
        .peer_identity()
        .ok_or(TransportError::MissingPeerCertificate)?;
    let chain = identity
        .downcast::<Vec<CertificateDer<'static>>>()
        .map_err(|_| TransportError::MissingPeerCertificate)?;
    let leaf = chain.first().ok_or(TransportError::MissingPeerCertificate)?;
    ed25519_key_from_cert(leaf.as_ref())
}

// ── Verifiers ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[derive(Debug)]
struct AcceptAnyClientCert {
    provider: Arc<CryptoProvider>,
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn offer_client_auth(&self) -> bool {
        true
    }

    fn client_auth_mandatory(&self) -> bool {
        true
    }

    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
