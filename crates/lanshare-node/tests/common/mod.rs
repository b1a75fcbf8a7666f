//! Shared harness for the loopback integration tests: two devices, each with
//! its own identity, trust store, and scripted verifier.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lanshare_core::{Identity, SasWordCount};
use lanshare_node::application::pairing::{HandshakeConfig, PairedSession, Pairing, PairingError};
use lanshare_node::application::verify::{PeerVerifier, Verdict, VerificationRequest, VerifyError};
use lanshare_node::infrastructure::transport::{client_endpoint, server_endpoint};
use lanshare_node::infrastructure::trust_store::TrustStore;
use quinn::Endpoint;
use uuid::Uuid;

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub fn handshake_config() -> HandshakeConfig {
    HandshakeConfig {
        io_timeout: IO_TIMEOUT,
        verify_timeout: Duration::from_secs(5),
        // Eight words make an accidental SAS match between sessions negligible.
        sas_words: SasWordCount::new(8).unwrap(),
    }
}

/// Answers every request with a fixed verdict and records what it was shown.
pub struct ScriptedVerifier {
    verdict: Verdict,
    calls: AtomicUsize,
    seen: Mutex<Vec<VerificationRequest>>,
}

impl ScriptedVerifier {
    pub fn new(verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<VerificationRequest> {
        self.seen.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PeerVerifier for ScriptedVerifier {
    async fn verify(&self, request: &VerificationRequest) -> Result<Verdict, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        Ok(self.verdict)
    }
}

/// One simulated device with its own scratch directory.
pub struct Device {
    pub label: String,
    pub dir: PathBuf,
    pub identity: Arc<Identity>,
    pub trust_store: Arc<TrustStore>,
}

impl Device {
    pub async fn new(label: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("lanshare_it_{label}_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let trust_store = TrustStore::open(dir.join("trusted_peers.toml")).await.unwrap();
        Self {
            label: label.to_string(),
            dir,
            identity: Arc::new(Identity::generate()),
            trust_store: Arc::new(trust_store),
        }
    }

    pub fn pairing(&self, verifier: Option<Arc<ScriptedVerifier>>) -> Pairing {
        let pairing = Pairing::new(
            Arc::clone(&self.identity),
            Arc::clone(&self.trust_store),
            self.label.as_str(),
            handshake_config(),
        );
        match verifier {
            Some(v) => pairing.with_verifier(v),
            None => pairing,
        }
    }

    pub fn server(&self) -> Endpoint {
        server_endpoint(&self.identity, &self.label, loopback(), IO_TIMEOUT).unwrap()
    }

    pub fn client(&self) -> Endpoint {
        client_endpoint(&self.identity, &self.label, loopback(), IO_TIMEOUT).unwrap()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.dir).ok();
    }
}

pub fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Runs one initiator/responder handshake over loopback.
pub async fn pair(
    initiator: &Pairing,
    client: &Endpoint,
    responder: &Pairing,
    server: &Endpoint,
) -> (
    Result<PairedSession, PairingError>,
    Result<PairedSession, PairingError>,
) {
    let addr = server.local_addr().unwrap();
    let respond = async {
        let incoming = server.accept().await.expect("server endpoint closed");
        responder.respond(incoming).await
    };
    tokio::join!(initiator.initiate(client, addr), respond)
}
