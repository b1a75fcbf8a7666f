//! `lanshare` command-line entry point.
//!
//! Thin glue: loads configuration, identity, and trust store from the config
//! directory, then runs one subcommand.
//!
//! ```text
//! lanshare whoami
//! lanshare peers list | peers remove <fingerprint>
//! lanshare discover [--timeout SECS]
//! lanshare receive [--port PORT] [--dest DIR]
//! lanshare send [--to ADDR | --instance NAME] FILES...
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use quinn::Endpoint;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lanshare_core::{FileMeta, Fingerprint, Identity, SasCode};
use lanshare_node::application::pairing::{
    HandshakeConfig, PairedSession, Pairing, PairingError, PinStatus,
};
use lanshare_node::application::transfer::{
    collect_files, receive_files, send_files, TransferSummary,
};
use lanshare_node::infrastructure::discovery::{self, Advertiser, DiscoveredPeer};
use lanshare_node::infrastructure::identity_store;
use lanshare_node::infrastructure::prompt::TerminalVerifier;
use lanshare_node::infrastructure::storage::config::{
    self, AppConfig, IDENTITY_FILE_NAME, TRUST_STORE_FILE_NAME,
};
use lanshare_node::infrastructure::transport::{client_endpoint, server_endpoint};
use lanshare_node::infrastructure::trust_store::TrustStore;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Share files between devices on the same network.
///
/// Devices find each other over mDNS, connect over QUIC, and confirm each
/// other's identity by comparing a few words on both screens.  Confirmed
/// devices are remembered and not asked about again.
#[derive(Debug, Parser)]
#[command(name = "lanshare", version)]
struct Cli {
    /// Directory holding config.toml, the device key, and trusted peers.
    #[arg(long, global = true, env = "LANSHARE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print this device's label and fingerprint.
    Whoami,

    /// Manage remembered devices.
    Peers {
        #[command(subcommand)]
        action: PeersCommand,
    },

    /// List LanShare devices on the local network.
    Discover {
        /// Seconds to listen for announcements.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Wait for one sender, pair with it, and save the files it sends.
    Receive {
        /// UDP port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Where received files are written.
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Pair with a device and send it files or directories.
    Send {
        /// Address of the receiver, e.g. 192.168.1.20:45000.
        #[arg(long, conflicts_with = "instance")]
        to: Option<SocketAddr>,

        /// Advertised name of the receiver.
        #[arg(long)]
        instance: Option<String>,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum PeersCommand {
    /// Show every remembered device.
    List,
    /// Forget a device, so it must be verified again next time.
    Remove { fingerprint: String },
}

// ── Node context ──────────────────────────────────────────────────────────────

/// Everything a subcommand needs, loaded from the config directory.
struct Node {
    config: AppConfig,
    identity: Arc<Identity>,
    trust_store: Arc<TrustStore>,
}

impl Node {
    async fn load(dir: &Path, config: AppConfig) -> anyhow::Result<Self> {
        let key_path = dir.join(IDENTITY_FILE_NAME);
        let identity = identity_store::load_or_create(&key_path)
            .with_context(|| format!("cannot load device key {}", key_path.display()))?;
        let trust_store = TrustStore::open(dir.join(TRUST_STORE_FILE_NAME))
            .await
            .context("cannot open trusted peers")?;
        Ok(Self {
            config,
            identity: Arc::new(identity),
            trust_store: Arc::new(trust_store),
        })
    }

    fn label(&self) -> &str {
        &self.config.node.label
    }

    fn handshake(&self) -> HandshakeConfig {
        HandshakeConfig::from(&self.config.pairing)
    }

    fn pairing(&self) -> Pairing {
        Pairing::new(
            Arc::clone(&self.identity),
            Arc::clone(&self.trust_store),
            self.label(),
            self.handshake(),
        )
        .with_verifier(Arc::new(TerminalVerifier))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let dir = match cli.config_dir {
        Some(dir) => dir,
        None => config::config_dir()?,
    };
    let config = config::load_or_init_config(&dir)
        .with_context(|| format!("cannot load configuration from {}", dir.display()))?;

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let node = Node::load(&dir, config).await?;

    match cli.command {
        Command::Whoami => whoami(&node, &dir),
        Command::Peers { action } => peers(&node, action).await,
        Command::Discover { timeout } => discover(&node, timeout).await,
        Command::Receive { port, dest } => receive(&node, port, dest).await,
        Command::Send {
            to,
            instance,
            files,
        } => send(&node, to, instance, files).await,
    }
}

fn whoami(node: &Node, dir: &Path) -> anyhow::Result<()> {
    println!("label:       {}", node.label());
    println!("fingerprint: {}", node.identity.fingerprint().grouped());
    println!("config dir:  {}", dir.display());
    Ok(())
}

async fn peers(node: &Node, action: PeersCommand) -> anyhow::Result<()> {
    match action {
        PeersCommand::List => {
            let peers = node.trust_store.list().await;
            if peers.is_empty() {
                println!("No trusted devices yet.");
            }
            for (fingerprint, label) in peers {
                println!("{}  {label}", fingerprint.grouped());
            }
        }
        PeersCommand::Remove { fingerprint } => {
            let fingerprint = Fingerprint::parse(&fingerprint)
                .with_context(|| format!("not a fingerprint: {fingerprint}"))?;
            match node.trust_store.remove(&fingerprint).await? {
                Some(label) => println!("Forgot {label} ({}).", fingerprint.grouped()),
                None => println!("{} was not trusted.", fingerprint.grouped()),
            }
        }
    }
    Ok(())
}

async fn discover(node: &Node, timeout: Option<u64>) -> anyhow::Result<()> {
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| node.config.network.discovery_timeout());
    let peers = discovery::browse(timeout).await.context("mDNS browse failed")?;
    if peers.is_empty() {
        println!("No LanShare devices found.");
    }
    for peer in peers {
        let trusted = match peer.advertised_fingerprint() {
            Some(fp) => node.trust_store.get(&fp).await.is_some(),
            None => false,
        };
        println!(
            "{:<24} {:<40} {}{}",
            peer.instance,
            describe_addrs(&peer),
            peer.advertised_fingerprint()
                .map(|fp| fp.grouped())
                .unwrap_or_else(|| "-".to_string()),
            if trusted { "  (trusted)" } else { "" },
        );
    }
    Ok(())
}

fn describe_addrs(peer: &DiscoveredPeer) -> String {
    peer.socket_addrs()
        .iter()
        .map(SocketAddr::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

async fn receive(node: &Node, port: Option<u16>, dest: Option<PathBuf>) -> anyhow::Result<()> {
    let network = &node.config.network;
    let bind: SocketAddr = format!(
        "{}:{}",
        network.bind_address,
        port.unwrap_or(network.listen_port)
    )
    .parse()
    .with_context(|| format!("invalid bind address {}", network.bind_address))?;
    let dest = dest.unwrap_or_else(|| node.config.transfer.resolved_download_dir());
    let io_timeout = node.config.pairing.io_timeout();

    let endpoint = server_endpoint(&node.identity, node.label(), bind, io_timeout)
        .context("cannot start listener")?;
    let local = endpoint.local_addr()?;

    let advertisement = Advertiser::new(node.identity.fingerprint().clone())
        .advertise(node.label(), local.port(), &BTreeMap::new())
        .context("cannot advertise on the local network")?;
    info!(service = advertisement.fullname(), "advertising");
    println!(
        "Waiting for a sender as {} ({}) on port {}...",
        node.label(),
        node.identity.fingerprint().grouped(),
        local.port()
    );

    let pairing = node.pairing();
    let outcome = tokio::select! {
        result = receive_session(&pairing, &endpoint, &dest, node.config.transfer.max_file_size) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };

    if let Err(e) = advertisement.shutdown().await {
        warn!(error = %e, "could not stop advertising cleanly");
    }
    shut_down(&endpoint, io_timeout).await;

    let summary = outcome?;
    println!(
        "Received {} file(s), {} bytes into {}.",
        summary.files,
        summary.bytes,
        dest.display()
    );
    Ok(())
}

async fn receive_session(
    pairing: &Pairing,
    endpoint: &Endpoint,
    dest: &Path,
    max_file_size: u64,
) -> anyhow::Result<TransferSummary> {
    let incoming = endpoint
        .accept()
        .await
        .context("listener closed before a sender connected")?;
    let session = pairing.respond(incoming).await.context("pairing failed")?;
    report_pairing(&session);
    receive_files(session, dest, max_file_size)
        .await
        .context("transfer failed")
}

async fn send(
    node: &Node,
    to: Option<SocketAddr>,
    instance: Option<String>,
    paths: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let files = tokio::task::spawn_blocking(move || collect_files(&paths))
        .await
        .context("file scan task failed")??;
    if files.is_empty() {
        bail!("nothing to send");
    }

    let addrs = match to {
        Some(addr) => vec![addr],
        None => find_receiver(node, instance.as_deref()).await?,
    };

    let pairing = node.pairing();
    let io_timeout = node.config.pairing.io_timeout();
    let outcome = tokio::select! {
        result = send_session(node, &pairing, &addrs, &files) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };

    let (endpoint, summary) = outcome?;
    shut_down(&endpoint, io_timeout).await;
    println!("Sent {} file(s), {} bytes.", summary.files, summary.bytes);
    Ok(())
}

/// Dials each address in turn until one pairs.  Only transport failures move
/// on to the next address; anything after the TLS handshake is final.
async fn send_session(
    node: &Node,
    pairing: &Pairing,
    addrs: &[SocketAddr],
    files: &[(PathBuf, FileMeta)],
) -> anyhow::Result<(Endpoint, TransferSummary)> {
    let io_timeout = node.config.pairing.io_timeout();
    let mut last_error = None;

    for &addr in addrs {
        let local: SocketAddr = if addr.is_ipv6() {
            "[::]:0".parse()?
        } else {
            "0.0.0.0:0".parse()?
        };
        let endpoint = client_endpoint(&node.identity, node.label(), local, io_timeout)
            .context("cannot open a local socket")?;

        info!(%addr, "dialing");
        match pairing.initiate(&endpoint, addr).await {
            Ok(session) => {
                report_pairing(&session);
                let summary = send_files(session, files)
                    .await
                    .context("transfer failed")?;
                return Ok((endpoint, summary));
            }
            Err(e @ PairingError::Transport(_)) => {
                warn!(%addr, error = %e, "could not reach receiver");
                last_error = Some(e);
            }
            Err(e) => return Err(e).context("pairing failed"),
        }
    }

    Err(match last_error {
        Some(e) => anyhow::Error::new(e).context("no address of the receiver was reachable"),
        None => anyhow!("receiver has no usable address"),
    })
}

async fn find_receiver(node: &Node, instance: Option<&str>) -> anyhow::Result<Vec<SocketAddr>> {
    let timeout = node.config.network.discovery_timeout();
    let peer = match instance {
        Some(name) => discovery::resolve(name, timeout)
            .await?
            .with_context(|| format!("no LanShare device named {name} found"))?,
        None => {
            let mut peers = discovery::browse(timeout).await?;
            match peers.len() {
                0 => bail!("no LanShare devices found; use --to or --instance"),
                1 => peers.remove(0),
                _ => {
                    let names: Vec<_> = peers.iter().map(|p| p.instance.as_str()).collect();
                    bail!(
                        "several devices found ({}); pick one with --instance",
                        names.join(", ")
                    )
                }
            }
        }
    };
    info!(instance = %peer.instance, "resolved receiver");
    Ok(peer.socket_addrs())
}

fn report_pairing(session: &PairedSession) {
    println!(
        "{}",
        pairing_report(
            session.pin_status,
            &session.peer.label,
            &session.peer_fingerprint,
            &session.sas
        )
    );
}

/// What the operator sees once pairing succeeds.  Pinned peers still get
/// the SAS.
fn pairing_report(status: PinStatus, label: &str, fingerprint: &Fingerprint, sas: &SasCode) -> String {
    match status {
        PinStatus::AlreadyPinned => {
            format!("Connected to trusted device {label}.\nVerify code: {sas}")
        }
        PinStatus::NewlyPinned => {
            format!("Trusting {label} ({}) from now on.", fingerprint.grouped())
        }
    }
}

/// Lets close frames reach the peer before the process exits.
async fn shut_down(endpoint: &Endpoint, io_timeout: Duration) {
    if tokio::time::timeout(io_timeout, endpoint.wait_idle())
        .await
        .is_err()
    {
        warn!("connections did not drain before shutdown");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
