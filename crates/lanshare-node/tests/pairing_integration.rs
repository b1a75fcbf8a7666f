//! Integration tests for the pairing handshake over real loopback QUIC.
//!
//! # Purpose
//!
//! Two simulated devices, each with its own identity, trust store, and
//! scripted verifier, run the initiator and responder handshakes against each
//! other.  The tests verify:
//!
//! - First contact: both operators are shown the same SAS, and both trust
//!   stores end up pinning the other side's TLS-derived fingerprint.
//! - Repeat contact: nobody is prompted, yet the SAS differs because the
//!   nonces are fresh.
//! - Rejection: the rejecting side pins nothing and reports `Rejected`.

mod common;

use common::{pair, Device, ScriptedVerifier};
use lanshare_node::application::pairing::{PairingError, PinStatus};
use lanshare_node::application::verify::Verdict;
use lanshare_node::infrastructure::transport::CloseCode;

#[tokio::test]
async fn test_first_pairing_shows_matching_sas_and_pins_both_sides() {
    // Arrange
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    let alice_verifier = ScriptedVerifier::new(Verdict::Accept);
    let bob_verifier = ScriptedVerifier::new(Verdict::Accept);
    let (client, server) = (alice.client(), bob.server());

    // Act
    let (initiated, responded) = pair(
        &alice.pairing(Some(alice_verifier.clone())),
        &client,
        &bob.pairing(Some(bob_verifier.clone())),
        &server,
    )
    .await;

    // Assert
    let alice_session = initiated.expect("initiator pairs");
    let bob_session = responded.expect("responder pairs");

    assert_eq!(alice_session.sas, bob_session.sas);
    assert_eq!(
        alice_verifier.last_request().unwrap().sas,
        bob_verifier.last_request().unwrap().sas
    );
    assert_eq!(alice_session.peer_fingerprint, *bob.identity.fingerprint());
    assert_eq!(bob_session.peer_fingerprint, *alice.identity.fingerprint());
    assert_eq!(alice_session.pin_status, PinStatus::NewlyPinned);
    assert_eq!(bob_session.pin_status, PinStatus::NewlyPinned);

    assert_eq!(
        alice.trust_store.get(bob.identity.fingerprint()).await.as_deref(),
        Some("bob")
    );
    assert_eq!(
        bob.trust_store.get(alice.identity.fingerprint()).await.as_deref(),
        Some("alice")
    );

    alice_session.close(CloseCode::Done);
    bob_session.close(CloseCode::Done);
}

#[tokio::test]
async fn test_repeat_pairing_skips_prompt_but_uses_fresh_sas() {
    // Arrange: a first, verified pairing
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    let alice_verifier = ScriptedVerifier::new(Verdict::Accept);
    let bob_verifier = ScriptedVerifier::new(Verdict::Accept);
    let alice_pairing = alice.pairing(Some(alice_verifier.clone()));
    let bob_pairing = bob.pairing(Some(bob_verifier.clone()));
    let (client, server) = (alice.client(), bob.server());

    let (first_a, first_b) = pair(&alice_pairing, &client, &bob_pairing, &server).await;
    let (first_a, first_b) = (first_a.unwrap(), first_b.unwrap());
    let first_sas = first_a.sas.clone();
    first_a.close(CloseCode::Done);
    first_b.close(CloseCode::Done);

    // Act: pair again over a new connection
    let (second_a, second_b) = pair(&alice_pairing, &client, &bob_pairing, &server).await;

    // Assert
    let (second_a, second_b) = (second_a.unwrap(), second_b.unwrap());
    assert_eq!(second_a.pin_status, PinStatus::AlreadyPinned);
    assert_eq!(second_b.pin_status, PinStatus::AlreadyPinned);
    assert_eq!(alice_verifier.calls(), 1, "no second prompt on the initiator");
    assert_eq!(bob_verifier.calls(), 1, "no second prompt on the responder");
    assert_eq!(second_a.sas, second_b.sas);
    assert_ne!(second_a.sas, first_sas, "new nonces give a new SAS");

    second_a.close(CloseCode::Done);
    second_b.close(CloseCode::Done);
}

#[tokio::test]
async fn test_pinned_peers_pair_without_any_verifier() {
    // Arrange: pins recorded out of band
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    alice
        .trust_store
        .add(bob.identity.fingerprint(), "bob")
        .await
        .unwrap();
    bob.trust_store
        .add(alice.identity.fingerprint(), "alice")
        .await
        .unwrap();
    let (client, server) = (alice.client(), bob.server());

    // Act
    let (a, b) = pair(&alice.pairing(None), &client, &bob.pairing(None), &server).await;

    // Assert
    assert_eq!(a.unwrap().pin_status, PinStatus::AlreadyPinned);
    assert_eq!(b.unwrap().pin_status, PinStatus::AlreadyPinned);
}

#[tokio::test]
async fn test_rejection_leaves_no_pin() {
    // Arrange
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    let (client, server) = (alice.client(), bob.server());

    // Act
    let (a, b) = pair(
        &alice.pairing(Some(ScriptedVerifier::new(Verdict::Reject))),
        &client,
        &bob.pairing(Some(ScriptedVerifier::new(Verdict::Reject))),
        &server,
    )
    .await;

    // Assert: whichever side rejects first closes the connection, so the
    // other may see the close before its own verdict.
    assert!(a.is_err());
    assert!(b.is_err());
    assert!(alice.trust_store.list().await.is_empty());
    assert!(bob.trust_store.list().await.is_empty());
}

#[tokio::test]
async fn test_responder_rejection_pins_nothing_on_responder() {
    // Arrange
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    let (client, server) = (alice.client(), bob.server());

    // Act
    let (_a, b) = pair(
        &alice.pairing(Some(ScriptedVerifier::new(Verdict::Accept))),
        &client,
        &bob.pairing(Some(ScriptedVerifier::new(Verdict::Reject))),
        &server,
    )
    .await;

    // Assert
    match b {
        Err(PairingError::Rejected { fingerprint }) => {
            assert_eq!(fingerprint, *alice.identity.fingerprint());
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(bob.trust_store.get(alice.identity.fingerprint()).await, None);
}

#[tokio::test]
async fn test_unknown_peer_without_verifier_is_refused() {
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    let (client, server) = (alice.client(), bob.server());

    let (_a, b) = pair(
        &alice.pairing(Some(ScriptedVerifier::new(Verdict::Accept))),
        &client,
        &bob.pairing(None),
        &server,
    )
    .await;

    assert!(matches!(b, Err(PairingError::VerifierUnavailable { .. })));
    assert!(bob.trust_store.list().await.is_empty());
}
