//! TOML-based configuration persistence for a LanShare node.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\LanShare\config.toml`
//! - Linux:    `~/.config/lanshare/config.toml`
//! - macOS:    `~/Library/Application Support/LanShare/config.toml`
//!
//! The device key (`device_key.pem`) and the pinned peers
//! (`trusted_peers.toml`) live next to it in the same directory.
//!
//! Example:
//!
//! ```toml
//! [node]
//! label = "alice-laptop"
//! log_level = "info"
//!
//! [network]
//! listen_port = 45000
//!
//! [pairing]
//! sas_words = 4
//!
//! [transfer]
//! download_dir = "/home/alice/Downloads/LanShare"
//! ```
//!
//! Every field has a `#[serde(default = "...")]`, and every section is
//! optional, so a missing file or one written by an older release still loads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lanshare_core::SasWordCount;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::pairing::HandshakeConfig;

/// File name of the configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// File name of the PKCS#8 device key inside the config directory.
pub const IDENTITY_FILE_NAME: &str = "device_key.pem";

/// File name of the pinned-peer store inside the config directory.
pub const TRUST_STORE_FILE_NAME: &str = "trusted_peers.toml";

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level node configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Identity of this node as shown to peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Label sent in Hello and used as the mDNS instance name.
    #[serde(default = "default_label")]
    pub label: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Listener and discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// UDP port the QUIC listener binds when receiving.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// IP address to bind to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// How long `discover` and name resolution browse for peers.
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,
}

/// Handshake timing and SAS length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairingConfig {
    /// Number of words in the Short Authentication String (1 to 8).
    #[serde(default)]
    pub sas_words: SasWordCount,
    /// Deadline for each network step of the handshake.
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    /// How long the operator has to confirm the SAS before it counts as a
    /// rejection.
    #[serde(default = "default_verify_timeout_secs")]
    pub verify_timeout_secs: u64,
}

/// Receiving side limits and destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferConfig {
    /// Where received files are written.  Defaults to
    /// `~/Downloads/LanShare` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
    /// Largest single file the receiver accepts, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_label() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "lanshare".to_string())
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen_port() -> u16 {
    45000
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_discovery_timeout_secs() -> u64 {
    3
}
fn default_io_timeout_secs() -> u64 {
    15
}
fn default_verify_timeout_secs() -> u64 {
    120
}
fn default_max_file_size() -> u64 {
    // 16 GiB
    16 * 1024 * 1024 * 1024
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            bind_address: default_bind_address(),
            discovery_timeout_secs: default_discovery_timeout_secs(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            sas_words: SasWordCount::default(),
            io_timeout_secs: default_io_timeout_secs(),
            verify_timeout_secs: default_verify_timeout_secs(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            max_file_size: default_max_file_size(),
        }
    }
}

impl NetworkConfig {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

impl PairingConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}

impl From<&PairingConfig> for HandshakeConfig {
    fn from(config: &PairingConfig) -> Self {
        Self {
            io_timeout: config.io_timeout(),
            verify_timeout: config.verify_timeout(),
            sas_words: config.sas_words,
        }
    }
}

impl TransferConfig {
    /// Resolves the download directory, falling back to
    /// `~/Downloads/LanShare` and finally `./LanShare`.
    pub fn resolved_download_dir(&self) -> PathBuf {
        if let Some(dir) = &self.download_dir {
            return dir.clone();
        }
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(|h| PathBuf::from(h).join("Downloads").join("LanShare"))
            .unwrap_or_else(|| PathBuf::from("LanShare"))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads `AppConfig` from `dir/config.toml`, returning `AppConfig::default()`
/// if the file does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(dir: &Path) -> Result<AppConfig, ConfigError> {
    let path = dir.join(CONFIG_FILE_NAME);

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Loads `AppConfig` from `dir/config.toml`, writing the defaults there
/// first if the file does not exist, so a fresh install has a file to edit.
///
/// # Errors
///
/// Any [`load_config`] or [`save_config`] error.
pub fn load_or_init_config(dir: &Path) -> Result<AppConfig, ConfigError> {
    if dir.join(CONFIG_FILE_NAME).exists() {
        return load_config(dir);
    }
    let config = AppConfig::default();
    save_config(dir, &config)?;
    Ok(config)
}

/// Persists `config` to `dir/config.toml`, creating `dir` if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(dir: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory including the `LanShare`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("LanShare"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("lanshare"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("LanShare")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
