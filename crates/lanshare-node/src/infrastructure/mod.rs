//! Infrastructure layer for a LanShare node.
//!
//! Contains the OS-facing adapters: configuration and key files, the trust
//! store, mDNS discovery, the QUIC/TLS transport, and the terminal prompt.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `lanshare_core`.  The application layer only reaches back in for the
//! concrete trust store, transport handles, and the configuration types.

pub mod discovery;
pub mod identity_store;
pub mod prompt;
pub mod storage;
pub mod transport;
pub mod trust_store;
