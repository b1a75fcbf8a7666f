//! Messages exchanged on the bidirectional control stream.
//!
//! The dialogue is strictly ordered and initiator-first:
//!
//! ```text
//! initiator                          responder
//!   Hello            ───────────────►
//!                    ◄───────────────  Hello
//!   SasNonce         ───────────────►
//!                    ◄───────────────  SasNonce
//!          (both sides derive and compare the SAS)
//!   Offer{files}     ───────────────►
//!                    ◄───────────────  OfferAccepted | OfferRejected{reason}
//!   (one unidirectional stream per file)
//!                    ◄───────────────  Complete{files, bytes}
//! ```
//!
//! Every message is one JSON object with a `"type"` discriminator, framed by
//! [`crate::protocol::control`].

use serde::{Deserialize, Serialize};

use crate::domain::file_meta::FileMeta;
use crate::domain::sas::SasNonce;

/// Self-declared identity of a peer.
///
/// Carries no trust weight: the fingerprint is only what the peer *claims*.
/// Trust decisions always use the key read from the TLS session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub label: String,
    pub fingerprint: String,
}

/// One control-stream message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Hello(Hello),
    SasNonce { nonce: SasNonce },
    /// The list of files the sender is about to stream.
    Offer { files: Vec<FileMeta> },
    OfferAccepted,
    OfferRejected { reason: String },
    /// Sent by the receiver once every offered file is on disk.
    Complete { files: u64, bytes: u64 },
}

impl ControlMessage {
    /// Short name used in logs and "unexpected message" errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Hello(_) => "hello",
            ControlMessage::SasNonce { .. } => "sas_nonce",
            ControlMessage::Offer { .. } => "offer",
            ControlMessage::OfferAccepted => "offer_accepted",
            ControlMessage::OfferRejected { .. } => "offer_rejected",
            ControlMessage::Complete { .. } => "complete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_uses_type_tag() {
        let msg = ControlMessage::Hello(Hello {
            label: "alice-laptop".to_string(),
            fingerprint: "aa11".to_string(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["label"], "alice-laptop");
        assert_eq!(json["fingerprint"], "aa11");
    }

    #[test]
    fn test_unit_variant_encodes_as_bare_tag() {
        let json = serde_json::to_string(&ControlMessage::OfferAccepted).unwrap();
        assert_eq!(json, r#"{"type":"offer_accepted"}"#);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let result: Result<ControlMessage, _> = serde_json::from_str(r#"{"type":"shutdown"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_sas_nonce_with_short_hex_is_rejected() {
        let result: Result<ControlMessage, _> =
            serde_json::from_str(r#"{"type":"sas_nonce","nonce":"abcd"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_kind_names_match_wire_tags() {
        let msg = ControlMessage::Complete { files: 2, bytes: 10 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], msg.kind());
    }
}
