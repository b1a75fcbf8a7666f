//! The control stream: length-delimited JSON [`ControlMessage`]s over the
//! single bidirectional QUIC stream of a connection.
//!
//! Every read and write runs under a deadline.  The framing helpers are
//! generic over `AsyncRead`/`AsyncWrite` so they can be exercised on an
//! in-memory duplex pipe; [`ControlChannel`] binds them to quinn streams.

use std::io;
use std::time::Duration;

use lanshare_core::protocol::{
    decode_body, decode_frame_len, encode_frame, ControlCodecError, FRAME_PREFIX_LEN,
};
use lanshare_core::{ControlMessage, Hello, SasNonce};
use quinn::{RecvStream, SendStream};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Error type for control-stream operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Reading or writing the stream failed.
    #[error("control stream I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer finished the stream before sending the expected message.
    #[error("peer closed the control stream while {0} was expected")]
    Closed(&'static str),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] ControlCodecError),

    /// A well-formed message arrived out of order.
    #[error("expected {expected}, received {received}")]
    Unexpected {
        expected: &'static str,
        received: &'static str,
    },

    /// The peer did not answer within the deadline.
    #[error("timed out waiting to {0}")]
    Timeout(String),
}

/// Writes one framed message and flushes it.
///
/// # Errors
///
/// Returns [`ControlError::Codec`] for oversized messages or
/// [`ControlError::Io`] for stream failures.
pub async fn write_message<W>(writer: &mut W, msg: &ControlMessage) -> Result<(), ControlError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message.  The length prefix is checked against the frame
/// limit before the body buffer is allocated.
///
/// # Errors
///
/// [`ControlError::Closed`] on a clean end of stream before the first prefix
/// byte, [`ControlError::Codec`] for oversized or malformed frames, and
/// [`ControlError::Io`] for everything else.
pub async fn read_message<R>(reader: &mut R, expecting: &'static str) -> Result<ControlMessage, ControlError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FRAME_PREFIX_LEN];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(ControlError::Closed(expecting))
        }
        Err(e) => return Err(e.into()),
    }

    let len = decode_frame_len(prefix)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(decode_body(&body)?)
}

/// The ordered control dialogue of one connection.
#[derive(Debug)]
pub struct ControlChannel {
    send: SendStream,
    recv: RecvStream,
    io_timeout: Duration,
}

impl ControlChannel {
    pub fn new(send: SendStream, recv: RecvStream, io_timeout: Duration) -> Self {
        Self {
            send,
            recv,
            io_timeout,
        }
    }

    /// Sends `msg` within the I/O deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] on write failure or timeout.
    pub async fn send(&mut self, msg: &ControlMessage) -> Result<(), ControlError> {
        trace!(kind = msg.kind(), "control send");
        tokio::time::timeout(self.io_timeout, write_message(&mut self.send, msg))
            .await
            .map_err(|_| ControlError::Timeout(format!("send {}", msg.kind())))?
    }

    /// Receives the next message within the I/O deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] on read failure, decode failure, or timeout.
    pub async fn recv(&mut self, expecting: &'static str) -> Result<ControlMessage, ControlError> {
        self.recv_within(self.io_timeout, expecting).await
    }

    /// Receives the next message within a caller-chosen deadline, for steps
    /// where the peer may be waiting on a human.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError`] on read failure, decode failure, or timeout.
    pub async fn recv_within(
        &mut self,
        deadline: Duration,
        expecting: &'static str,
    ) -> Result<ControlMessage, ControlError> {
        let msg = tokio::time::timeout(deadline, read_message(&mut self.recv, expecting))
            .await
            .map_err(|_| ControlError::Timeout(format!("receive {expecting}")))??;
        trace!(kind = msg.kind(), "control recv");
        Ok(msg)
    }

    /// Receives the peer's [`Hello`].
    ///
    /// # Errors
    ///
    /// [`ControlError::Unexpected`] if any other message arrives.
    pub async fn recv_hello(&mut self) -> Result<Hello, ControlError> {
        match self.recv("hello").await? {
            ControlMessage::Hello(hello) => Ok(hello),
            other => Err(unexpected("hello", &other)),
        }
    }

    /// Receives the peer's SAS nonce.
    ///
    /// # Errors
    ///
    /// [`ControlError::Unexpected`] if any other message arrives.
    pub async fn recv_nonce(&mut self) -> Result<SasNonce, ControlError> {
        match self.recv("sas_nonce").await? {
            ControlMessage::SasNonce { nonce } => Ok(nonce),
            other => Err(unexpected("sas_nonce", &other)),
        }
    }

    /// Signals that no more control messages will be sent.
    pub fn finish(&mut self) {
        // Already finished or reset streams have nothing left to signal.
        let _ = self.send.finish();
    }
}

/// Builds the error for a message that arrived out of order.
pub fn unexpected(expected: &'static str, received: &ControlMessage) -> ControlError {
    ControlError::Unexpected {
        expected,
        received: received.kind(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use lanshare_core::protocol::MAX_FRAME_LEN;

    #[tokio::test]
    async fn test_messages_arrive_in_order_over_a_pipe() {
        // Arrange
        let (mut a, mut b) = tokio::io::duplex(1024);
        let hello = ControlMessage::Hello(Hello {
            label: "alice-laptop".to_string(),
            fingerprint: "aa".repeat(16),
        });
        let nonce = ControlMessage::SasNonce {
            nonce: SasNonce::generate(),
        };

        // Act
        write_message(&mut a, &hello).await.unwrap();
        write_message(&mut a, &nonce).await.unwrap();
        let first = read_message(&mut b, "hello").await.unwrap();
        let second = read_message(&mut b, "sas_nonce").await.unwrap();

        // Assert
        assert_eq!(first, hello);
        assert_eq!(second, nonce);
    }

    #[tokio::test]
    async fn test_clean_eof_is_reported_as_closed() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let result = read_message(&mut b, "hello").await;
        assert!(matches!(result, Err(ControlError::Closed("hello"))));
    }

    #[tokio::test]
    async fn test_oversized_prefix_is_rejected_without_reading_body() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes())
            .await
            .unwrap();
        let result = read_message(&mut b, "hello").await;
        assert!(matches!(
            result,
            Err(ControlError::Codec(ControlCodecError::FrameTooLarge(_)))
        ));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_io_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"{\"ty").await.unwrap();
        drop(a);
        let result = read_message(&mut b, "hello").await;
        assert!(matches!(result, Err(ControlError::Io(_))));
    }

    #[test]
    fn test_unexpected_names_both_kinds() {
        let err = unexpected("hello", &ControlMessage::OfferAccepted);
        assert_eq!(err.to_string(), "expected hello, received offer_accepted");
    }
}
