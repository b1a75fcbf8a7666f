//! Integration tests for file transfer over a paired loopback session.
//!
//! # Purpose
//!
//! These tests pair two devices for real and then run `send_files` and
//! `receive_files` against each other.  They verify:
//!
//! - The happy path: a small text file and a 1 MiB binary arrive with
//!   identical bytes, and no part files are left behind.
//! - Directories are sent recursively and recreated on the receiver.
//! - A refused offer (size cap) fails both sides and writes nothing.
//! - A sender that fails or goes quiet mid-file leaves no partial file on the
//!   receiver: neither a `.lanshare-part` file nor the target path.

mod common;

use std::path::{Path, PathBuf};

use common::{pair, Device, ScriptedVerifier, IO_TIMEOUT};
use lanshare_core::protocol::encode_header;
use lanshare_core::{ControlMessage, FileMeta};
use lanshare_node::application::pairing::PairedSession;
use lanshare_node::application::transfer::{
    collect_files, receive_files, send_files, OfferError, TransferError, TransferSummary,
    PART_SUFFIX,
};
use lanshare_node::application::verify::Verdict;
use lanshare_node::infrastructure::transport::FileStreamError;
use quinn::Endpoint;

/// Deterministic, non-repeating-looking payload.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn write(dir: &Path, rel: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, contents).unwrap();
    path
}

fn leftover_part_files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&d) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.to_string_lossy().ends_with(PART_SUFFIX) {
                found.push(path);
            }
        }
    }
    found
}

/// Pairs `sender` (initiator) with `receiver` (responder) over the given
/// endpoints, both sides accepting.
async fn paired(
    sender: &Device,
    client: &Endpoint,
    receiver: &Device,
    server: &Endpoint,
) -> (PairedSession, PairedSession) {
    let (a, b) = pair(
        &sender.pairing(Some(ScriptedVerifier::new(Verdict::Accept))),
        client,
        &receiver.pairing(Some(ScriptedVerifier::new(Verdict::Accept))),
        server,
    )
    .await;
    (a.unwrap(), b.unwrap())
}

/// Pairs `sender` with `receiver`, then transfers `paths` into `dest` with
/// the given size cap.
async fn transfer(
    sender: &Device,
    receiver: &Device,
    paths: &[PathBuf],
    dest: &Path,
    max_file_size: u64,
) -> (
    Result<TransferSummary, TransferError>,
    Result<TransferSummary, TransferError>,
) {
    let (client, server) = (sender.client(), receiver.server());
    let (sender_session, receiver_session) = paired(sender, &client, receiver, &server).await;

    let files = collect_files(paths).unwrap();
    tokio::join!(
        send_files(sender_session, &files),
        receive_files(receiver_session, dest, max_file_size)
    )
}

#[tokio::test]
async fn test_transfer_delivers_identical_files() {
    // Arrange
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    let readme = payload(42);
    let data = payload(1_048_576);
    let readme_path = write(&alice.dir, "outbox/readme.txt", &readme);
    let data_path = write(&alice.dir, "outbox/data.bin", &data);
    let dest = bob.dir.join("downloads");

    // Act
    let (sent, received) =
        transfer(&alice, &bob, &[readme_path, data_path], &dest, u64::MAX).await;

    // Assert
    let expected = TransferSummary {
        files: 2,
        bytes: 42 + 1_048_576,
    };
    assert_eq!(sent.unwrap(), expected);
    assert_eq!(received.unwrap(), expected);
    assert_eq!(std::fs::read(dest.join("readme.txt")).unwrap(), readme);
    assert_eq!(std::fs::read(dest.join("data.bin")).unwrap(), data);
    assert!(leftover_part_files(&dest).is_empty());
}

#[tokio::test]
async fn test_directory_is_recreated_on_receiver() {
    // Arrange
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    write(&alice.dir, "album/a.jpg", b"first");
    write(&alice.dir, "album/raw/b.cr2", b"second");
    write(&alice.dir, "album/empty.txt", b"");
    let dest = bob.dir.join("downloads");

    // Act
    let (sent, received) =
        transfer(&alice, &bob, &[alice.dir.join("album")], &dest, u64::MAX).await;

    // Assert
    assert_eq!(sent.unwrap().files, 3);
    assert_eq!(received.unwrap().files, 3);
    assert_eq!(std::fs::read(dest.join("album/a.jpg")).unwrap(), b"first");
    assert_eq!(std::fs::read(dest.join("album/raw/b.cr2")).unwrap(), b"second");
    assert_eq!(std::fs::read(dest.join("album/empty.txt")).unwrap(), b"");
}

#[tokio::test]
async fn test_oversized_offer_is_refused_and_nothing_is_written() {
    // Arrange
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    let small = write(&alice.dir, "small.txt", b"ok");
    let big = write(&alice.dir, "big.bin", &payload(4096));
    let dest = bob.dir.join("downloads");

    // Act
    let (sent, received) = transfer(&alice, &bob, &[small, big], &dest, 1024).await;

    // Assert
    match sent {
        Err(TransferError::OfferRejected(reason)) => assert!(reason.contains("big.bin")),
        other => panic!("expected OfferRejected, got {other:?}"),
    }
    assert!(matches!(
        received,
        Err(TransferError::InvalidOffer(OfferError::TooLarge { .. }))
    ));
    assert!(!dest.join("small.txt").exists());
    assert!(!dest.join("big.bin").exists());
}

#[tokio::test]
async fn test_source_shrinking_mid_file_leaves_nothing_on_receiver() {
    // Arrange: offer 256 KiB, then shrink the file before it is streamed.
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    let path = write(&alice.dir, "outbox/shrinks.bin", &payload(256 * 1024));
    let files = collect_files(&[path.clone()]).unwrap();
    std::fs::write(&path, payload(1024)).unwrap();
    let dest = bob.dir.join("downloads");
    let (client, server) = (alice.client(), bob.server());
    let (sender, receiver) = paired(&alice, &client, &bob, &server).await;

    // Act
    let (sent, received) = tokio::join!(
        send_files(sender, &files),
        receive_files(receiver, &dest, u64::MAX)
    );

    // Assert
    assert!(matches!(
        sent,
        Err(TransferError::Stream(FileStreamError::SourceShrank {
            expected: 262_144,
            read: 1024
        }))
    ));
    assert!(received.is_err(), "receiver accepted a truncated file");
    assert!(leftover_part_files(&dest).is_empty());
    assert!(!dest.join("shrinks.bin").exists());
}

#[tokio::test]
async fn test_stalled_sender_times_out_and_leaves_nothing_on_receiver() {
    // Arrange
    let alice = Device::new("alice").await;
    let bob = Device::new("bob").await;
    let dest = bob.dir.join("downloads");
    let (client, server) = (alice.client(), bob.server());
    let (mut sender, receiver) = paired(&alice, &client, &bob, &server).await;
    let meta = FileMeta::new("stall.bin", 10).unwrap();

    // The sender announces 10 bytes, delivers 2, then keeps the stream open
    // without writing until the receiver gives up on the connection.
    let stall = async move {
        sender
            .control
            .send(&ControlMessage::Offer {
                files: vec![meta.clone()],
            })
            .await
            .unwrap();
        let reply = sender.control.recv("offer reply").await.unwrap();
        assert_eq!(reply, ControlMessage::OfferAccepted);

        let mut stream = sender.connection.open_uni().await.unwrap();
        stream.write_all(&encode_header(&meta).unwrap()).await.unwrap();
        stream.write_all(b"ab").await.unwrap();
        let _ = tokio::time::timeout(IO_TIMEOUT * 4, sender.connection.closed()).await;
        drop(stream);
        sender
    };

    // Act
    let (received, _sender) = tokio::time::timeout(IO_TIMEOUT * 6, async {
        tokio::join!(receive_files(receiver, &dest, u64::MAX), stall)
    })
    .await
    .expect("receiver still blocked on a stalled data stream");

    // Assert
    assert!(matches!(
        received,
        Err(TransferError::Stream(FileStreamError::Stalled { .. }))
    ));
    assert!(leftover_part_files(&dest).is_empty());
    assert!(!dest.join("stall.bin").exists());
}
