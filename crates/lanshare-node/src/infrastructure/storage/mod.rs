//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from the platform
//! directory, writes it back, and falls back to defaults on first run.  The
//! key file and trust store live in the same directory but have their own
//! modules, since their failure rules differ.

pub mod config;
