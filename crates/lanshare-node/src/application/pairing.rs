//! Pairing: one encrypted, peer-authenticated connection per attempt, with a
//! human standing in for the certificate authority.
//!
//! # Initiator state machine
//!
//! ```text
//! Dial ─► OpenControlStream ─► ExchangeHello ─► ExchangeSasNonce
//!   ─► ExtractPeerRealIdentity ─► DeriveSas ─► PinCheck ─┬─► Ready
//!                                                        └─► VerifyPrompt ─► Pin ─► Ready
//! ```
//!
//! The responder runs the mirror image on an accepted connection.  Any step
//! that fails ends in `Aborted`: the connection is closed with
//! [`CloseCode::PairingAborted`] by the [`CloseOnDrop`] guard, which also
//! fires when the whole future is dropped (cancellation).
//!
//! # Which key the SAS is bound to
//!
//! Both sides derive the SAS over the *responder's* public key and the two
//! nonces.  The initiator reads that key from the responder's TLS certificate;
//! the responder uses its own.  A machine in the middle would have to present
//! its own certificate to the initiator, and the two screens would then show
//! different words.
//!
//! # Trust
//!
//! The Hello message is self-reported and carries no weight.  The fingerprint
//! that gets pinned, looked up and shown to the operator is always computed
//! from the certificate the peer proved possession of during the TLS
//! handshake.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lanshare_core::{
    derive_sas, fingerprint, ControlMessage, Fingerprint, FingerprintError, Hello, Identity,
    SasCode, SasError, SasNonce, SasWordCount,
};
use quinn::{Connection, Endpoint, Incoming};
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::application::verify::{PeerVerifier, Verdict, VerificationRequest, VerifyError};
use crate::infrastructure::transport::tls::peer_public_key;
use crate::infrastructure::transport::{
    CloseCode, CloseOnDrop, ControlChannel, ControlError, TransportError, SERVER_NAME,
};
use crate::infrastructure::trust_store::{TrustStore, TrustStoreError};

/// Deadlines and SAS length for one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Deadline for every network step.
    pub io_timeout: Duration,
    /// How long the verifier may take before the answer counts as "reject".
    pub verify_timeout: Duration,
    pub sas_words: SasWordCount,
}

/// How the peer came to be trusted in this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinStatus {
    /// The fingerprint was already in the trust store; nobody was prompted.
    AlreadyPinned,
    /// The operator accepted the SAS and the pin was recorded.
    NewlyPinned,
}

/// Error type for pairing attempts.  Every variant aborts the attempt.
#[derive(Debug, Error)]
pub enum PairingError {
    /// Dial, accept, stream open, or TLS session failures.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The Hello / nonce dialogue failed or was malformed.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// The key from the peer's certificate is not a valid Ed25519 point.
    #[error("peer key unusable: {0}")]
    PeerKey(#[from] FingerprintError),

    #[error("SAS derivation failed: {0}")]
    Sas(#[from] SasError),

    /// The peer is unknown and no one is available to verify it.
    #[error("peer {fingerprint} is not pinned and no verifier is available")]
    VerifierUnavailable { fingerprint: Fingerprint },

    /// The operator answered "no", or did not answer in time.
    #[error("verification rejected for peer {fingerprint}")]
    Rejected { fingerprint: Fingerprint },

    /// The verifier itself failed.
    #[error(transparent)]
    Verifier(#[from] VerifyError),

    /// The operator accepted but the pin could not be recorded durably.
    #[error("failed to record pin: {0}")]
    TrustStore(#[from] TrustStoreError),
}

/// A verified connection, ready for file transfer.
///
/// Dropping the session closes the connection with
/// [`CloseCode::TransferAborted`]; call [`close`](Self::close) to end it with
/// a different code.
#[derive(Debug)]
pub struct PairedSession {
    pub connection: Connection,
    pub control: ControlChannel,
    /// The peer's self-reported Hello.
    pub peer: Hello,
    /// Fingerprint of the key the peer proved during the TLS handshake.
    pub peer_fingerprint: Fingerprint,
    pub sas: SasCode,
    pub pin_status: PinStatus,
    pub config: HandshakeConfig,
    guard: CloseOnDrop,
}

impl PairedSession {
    /// Closes the connection with `code`.
    pub fn close(self, code: CloseCode) {
        self.guard.close(code);
    }
}

/// Runs steps 7 to 9 of the handshake: pin check, verify prompt, pin.
///
/// An already-pinned fingerprint returns immediately without consulting the
/// verifier.  Otherwise the verifier must answer [`Verdict::Accept`] within
/// `verify_timeout`, and the pin must be durably recorded, before the peer
/// counts as trusted.
///
/// # Errors
///
/// [`PairingError::VerifierUnavailable`], [`PairingError::Rejected`] (which
/// includes the timeout case), [`PairingError::Verifier`], or
/// [`PairingError::TrustStore`].
pub async fn authorize_peer(
    trust_store: &TrustStore,
    verifier: Option<&dyn PeerVerifier>,
    request: VerificationRequest,
    verify_timeout: Duration,
) -> Result<PinStatus, PairingError> {
    if let Some(label) = trust_store.get(&request.peer_fingerprint).await {
        info!(
            fingerprint = %request.peer_fingerprint,
            pinned_as = %label,
            "peer already pinned; skipping verification"
        );
        return Ok(PinStatus::AlreadyPinned);
    }

    let Some(verifier) = verifier else {
        return Err(PairingError::VerifierUnavailable {
            fingerprint: request.peer_fingerprint,
        });
    };

    let verdict = match tokio::time::timeout(verify_timeout, verifier.verify(&request)).await {
        Ok(answer) => answer?,
        Err(_) => {
            warn!(
                fingerprint = %request.peer_fingerprint,
                "verification timed out; treating as rejected"
            );
            Verdict::Reject
        }
    };

    if verdict == Verdict::Reject {
        info!(fingerprint = %request.peer_fingerprint, "operator rejected peer");
        return Err(PairingError::Rejected {
            fingerprint: request.peer_fingerprint,
        });
    }

    trust_store
        .add(&request.peer_fingerprint, &request.peer_label)
        .await?;
    Ok(PinStatus::NewlyPinned)
}

/// Runs pairing attempts on behalf of the local device.
pub struct Pairing {
    identity: Arc<Identity>,
    trust_store: Arc<TrustStore>,
    verifier: Option<Arc<dyn PeerVerifier>>,
    label: String,
    config: HandshakeConfig,
}

impl Pairing {
    /// Creates a pairing service with no verifier: only already-pinned peers
    /// can be paired until [`with_verifier`](Self::with_verifier) is called.
    pub fn new(
        identity: Arc<Identity>,
        trust_store: Arc<TrustStore>,
        label: impl Into<String>,
        config: HandshakeConfig,
    ) -> Self {
        Self {
            identity,
            trust_store,
            verifier: None,
            label: label.into(),
            config,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn PeerVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Dials `addr` and runs the initiator side of the handshake.
    ///
    /// # Errors
    ///
    /// Any [`PairingError`]; the connection is closed before returning.
    pub async fn initiate(
        &self,
        endpoint: &Endpoint,
        addr: SocketAddr,
    ) -> Result<PairedSession, PairingError> {
        let attempt = Uuid::new_v4();
        self.run_initiator(endpoint, addr)
            .instrument(info_span!("pairing", %attempt, role = "initiator", %addr))
            .await
    }

    /// Accepts `incoming` and runs the responder side of the handshake.
    ///
    /// # Errors
    ///
    /// Any [`PairingError`]; the connection is closed before returning.
    pub async fn respond(&self, incoming: Incoming) -> Result<PairedSession, PairingError> {
        let attempt = Uuid::new_v4();
        let remote = incoming.remote_address();
        self.run_responder(incoming)
            .instrument(info_span!("pairing", %attempt, role = "responder", %remote))
            .await
    }

    async fn run_initiator(
        &self,
        endpoint: &Endpoint,
        addr: SocketAddr,
    ) -> Result<PairedSession, PairingError> {
        let io = self.config.io_timeout;

        // 1. Dial
        let connecting = endpoint
            .connect(addr, SERVER_NAME)
            .map_err(TransportError::from)?;
        let connection = tokio::time::timeout(io, connecting)
            .await
            .map_err(|_| TransportError::Timeout("dial"))?
            .map_err(TransportError::from)?;
        let guard = CloseOnDrop::new(connection.clone(), CloseCode::PairingAborted);
        debug!("transport connected");

        // 2. OpenControlStream
        let (send, recv) = tokio::time::timeout(io, connection.open_bi())
            .await
            .map_err(|_| TransportError::Timeout("open control stream"))?
            .map_err(TransportError::from)?;
        let mut control = ControlChannel::new(send, recv, io);

        // 3. ExchangeHello
        control.send(&self.own_hello()).await?;
        let peer_hello = control.recv_hello().await?;

        // 4. ExchangeSasNonce
        let own_nonce = SasNonce::generate();
        control
            .send(&ControlMessage::SasNonce { nonce: own_nonce })
            .await?;
        let peer_nonce = control.recv_nonce().await?;

        // 5. ExtractPeerRealIdentity
        let peer_key = peer_public_key(&connection)?;
        let peer_fingerprint = fingerprint(&peer_key)?;
        check_claimed_fingerprint(&peer_hello, &peer_fingerprint);

        // 6. DeriveSas over the responder's (the peer's) key
        let sas = derive_sas(&peer_key, &own_nonce, &peer_nonce, self.config.sas_words)?;

        self.finish(connection, control, guard, peer_hello, peer_fingerprint, sas)
            .await
    }

    async fn run_responder(&self, incoming: Incoming) -> Result<PairedSession, PairingError> {
        let io = self.config.io_timeout;

        let connecting = incoming.accept().map_err(TransportError::from)?;
        let connection = tokio::time::timeout(io, connecting)
            .await
            .map_err(|_| TransportError::Timeout("accept"))?
            .map_err(TransportError::from)?;
        let guard = CloseOnDrop::new(connection.clone(), CloseCode::PairingAborted);
        debug!("transport accepted");

        let (send, recv) = tokio::time::timeout(io, connection.accept_bi())
            .await
            .map_err(|_| TransportError::Timeout("accept control stream"))?
            .map_err(TransportError::from)?;
        let mut control = ControlChannel::new(send, recv, io);

        let peer_hello = control.recv_hello().await?;
        control.send(&self.own_hello()).await?;

        let peer_nonce = control.recv_nonce().await?;
        let own_nonce = SasNonce::generate();
        control
            .send(&ControlMessage::SasNonce { nonce: own_nonce })
            .await?;

        // The initiator's key comes from its TLS client certificate.
        let peer_key = peer_public_key(&connection)?;
        let peer_fingerprint = fingerprint(&peer_key)?;
        check_claimed_fingerprint(&peer_hello, &peer_fingerprint);

        // We are the responder: the SAS is bound to our own key.
        let sas = derive_sas(
            &self.identity.public_key_bytes(),
            &peer_nonce,
            &own_nonce,
            self.config.sas_words,
        )?;

        self.finish(connection, control, guard, peer_hello, peer_fingerprint, sas)
            .await
    }

    /// Steps 7 to 10, shared by both roles.
    async fn finish(
        &self,
        connection: Connection,
        control: ControlChannel,
        mut guard: CloseOnDrop,
        peer: Hello,
        peer_fingerprint: Fingerprint,
        sas: SasCode,
    ) -> Result<PairedSession, PairingError> {
        info!(
            peer = %peer.label,
            fingerprint = %peer_fingerprint,
            %sas,
            "derived short authentication string"
        );

        let request = VerificationRequest {
            peer_label: peer.label.clone(),
            peer_fingerprint: peer_fingerprint.clone(),
            sas: sas.clone(),
        };
        let pin_status = authorize_peer(
            &self.trust_store,
            self.verifier.as_deref(),
            request,
            self.config.verify_timeout,
        )
        .await?;

        info!(peer = %peer.label, ?pin_status, "pairing complete");
        guard.set_code(CloseCode::TransferAborted);
        Ok(PairedSession {
            connection,
            control,
            peer,
            peer_fingerprint,
            sas,
            pin_status,
            config: self.config,
            guard,
        })
    }

    fn own_hello(&self) -> ControlMessage {
        ControlMessage::Hello(Hello {
            label: self.label.clone(),
            fingerprint: self.identity.fingerprint().to_string(),
        })
    }
}

/// The Hello fingerprint is only a claim; a mismatch is worth a warning but
/// never changes which key is trusted.
fn check_claimed_fingerprint(hello: &Hello, actual: &Fingerprint) {
    match Fingerprint::parse(&hello.fingerprint) {
        Ok(claimed) if &claimed == actual => {}
        _ => warn!(
            claimed = %hello.fingerprint,
            actual = %actual,
            "peer Hello fingerprint does not match its TLS key"
        ),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
