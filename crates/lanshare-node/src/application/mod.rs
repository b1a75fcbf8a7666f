//! Application layer use cases for a LanShare node.
//!
//! Use cases here orchestrate core types and the transport into user goals:
//! "pair with that device" and "move these files".  Human interaction is
//! reached only through the [`verify::PeerVerifier`] trait, so tests can
//! script it and the binary can put a terminal prompt behind it.
//!
//! # Sub-modules
//!
//! - **`verify`** – the verification seam: what the operator is shown and
//!   what they answer.
//!
//! - **`pairing`** – the initiator and responder handshakes, pin check, and
//!   pinning.  Produces a [`pairing::PairedSession`].
//!
//! - **`transfer`** – offer, per-file data streams, and completion on top of
//!   a paired session.

pub mod pairing;
pub mod transfer;
pub mod verify;
