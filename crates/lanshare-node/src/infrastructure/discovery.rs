//! mDNS service advertisement and discovery.
//!
//! A receiving host registers one service instance under
//! [`lanshare_core::SERVICE_TYPE`] in the `local.` domain.  Its TXT record
//! always carries:
//!
//! | key     | value                                  |
//! |---------|----------------------------------------|
//! | `fp`    | the host's own fingerprint             |
//! | `proto` | the ALPN string (`lanshare/1`)         |
//!
//! plus any caller-supplied key/value pairs.  A sending host browses for the
//! service type and gets back `(instance, addresses, port, metadata)` tuples.
//!
//! The TXT fingerprint is a convenience for picking the right instance.  It
//! carries no trust: pairing always uses the key read from the TLS session.
//!
//! # Threading
//!
//! `mdns-sd` runs its own daemon thread.  Browsing blocks on a channel, so
//! [`browse`] moves that loop onto a blocking thread to keep it off the Tokio
//! worker threads.  [`Advertisement::stop`] also blocks while it waits for the
//! daemon to confirm; async callers use [`Advertisement::shutdown`].

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use lanshare_core::{Fingerprint, ALPN, SERVICE_TYPE};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use thiserror::Error;
use tracing::{debug, info, warn};

/// TXT key carrying the advertiser's fingerprint.
pub const TXT_FINGERPRINT: &str = "fp";

/// TXT key carrying the protocol identifier.
pub const TXT_PROTOCOL: &str = "proto";

/// How long `stop` waits for the daemon to confirm unregistration.
const UNREGISTER_WAIT: Duration = Duration::from_secs(1);

/// Set while an [`Advertisement`] is alive in this process.
static ADVERTISING: AtomicBool = AtomicBool::new(false);

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Another advertisement is still registered by this process.
    #[error("this process is already advertising a LanShare service")]
    AlreadyAdvertising,

    /// The mDNS daemon reported an error.
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    /// A blocking browse or shutdown task panicked or was cancelled.
    #[error("discovery task failed: {0}")]
    Task(String),
}

// ── Advertising ───────────────────────────────────────────────────────────────

/// Registers this host's pairing service on the local network.
#[derive(Debug, Clone)]
pub struct Advertiser {
    fingerprint: Fingerprint,
}

impl Advertiser {
    pub fn new(fingerprint: Fingerprint) -> Self {
        Self { fingerprint }
    }

    /// Publishes `instance` on `port` with the given extra TXT metadata.
    ///
    /// The returned [`Advertisement`] owns the registration: calling
    /// [`Advertisement::stop`] or dropping it unregisters the service.
    ///
    /// # Errors
    ///
    /// [`DiscoveryError::AlreadyAdvertising`] if an advertisement is still
    /// alive in this process, or [`DiscoveryError::Mdns`] if the daemon could
    /// not start or register.
    pub fn advertise(
        &self,
        instance: &str,
        port: u16,
        metadata: &BTreeMap<String, String>,
    ) -> Result<Advertisement, DiscoveryError> {
        let guard = AdvertiseGuard::acquire()?;

        let properties = txt_properties(&self.fingerprint, metadata);
        let host_name = format!("{}.local.", host_label(instance));
        let info = ServiceInfo::new(SERVICE_TYPE, instance, &host_name, "", port, properties)?
            .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        let daemon = ServiceDaemon::new()?;
        if let Err(e) = daemon.register(info) {
            let _ = daemon.shutdown();
            return Err(e.into());
        }

        info!(instance, port, service = SERVICE_TYPE, "advertising pairing service");
        Ok(Advertisement {
            daemon: Some(daemon),
            fullname,
            _guard: guard,
        })
    }
}

/// A live mDNS registration.  Unregisters on [`stop`](Self::stop) or drop.
pub struct Advertisement {
    daemon: Option<ServiceDaemon>,
    fullname: String,
    _guard: AdvertiseGuard,
}

impl std::fmt::Debug for Advertisement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advertisement")
            .field("fullname", &self.fullname)
            .field("active", &self.daemon.is_some())
            .finish()
    }
}

impl Advertisement {
    /// The full DNS-SD name, e.g. `alice-laptop._lanshare._udp.local.`.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Unregisters the service and shuts the daemon down.  Blocks for up to
    /// one second waiting for the daemon's confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Mdns`] if the daemon rejects the request.
    /// The registration guard is released either way.
    pub fn stop(mut self) -> Result<(), DiscoveryError> {
        self.release()
    }

    /// [`stop`](Self::stop) on a blocking thread, for async callers.
    ///
    /// # Errors
    ///
    /// As [`stop`](Self::stop), plus [`DiscoveryError::Task`] if the blocking
    /// task fails.
    pub async fn shutdown(self) -> Result<(), DiscoveryError> {
        tokio::task::spawn_blocking(move || self.stop())
            .await
            .map_err(|e| DiscoveryError::Task(e.to_string()))?
    }

    fn release(&mut self) -> Result<(), DiscoveryError> {
        let Some(daemon) = self.daemon.take() else {
            return Ok(());
        };

        let unregistered = daemon.unregister(&self.fullname).map(|rx| {
            if rx.recv_timeout(UNREGISTER_WAIT).is_err() {
                debug!(fullname = %self.fullname, "no unregister confirmation from mDNS daemon");
            }
        });
        let shutdown = daemon.shutdown().map(|_| ());

        info!(fullname = %self.fullname, "stopped advertising");
        unregistered?;
        shutdown?;
        Ok(())
    }
}

impl Drop for Advertisement {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("failed to unregister mDNS service on drop: {e}");
        }
    }
}

/// Process-wide token proving this process holds the single advertisement.
#[derive(Debug)]
struct AdvertiseGuard(());

impl AdvertiseGuard {
    fn acquire() -> Result<Self, DiscoveryError> {
        ADVERTISING
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(()))
            .map_err(|_| DiscoveryError::AlreadyAdvertising)
    }
}

impl Drop for AdvertiseGuard {
    fn drop(&mut self) {
        ADVERTISING.store(false, Ordering::Release);
    }
}

fn txt_properties(
    fingerprint: &Fingerprint,
    metadata: &BTreeMap<String, String>,
) -> HashMap<String, String> {
    let mut properties: HashMap<String, String> = metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    properties.insert(TXT_FINGERPRINT.to_string(), fingerprint.to_string());
    properties.insert(
        TXT_PROTOCOL.to_string(),
        String::from_utf8_lossy(ALPN).into_owned(),
    );
    properties
}

/// Turns a free-form label into a valid DNS host label.
fn host_label(instance: &str) -> String {
    let label: String = instance
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let label = label.trim_matches('-');
    if label.is_empty() {
        "lanshare".to_string()
    } else {
        label.chars().take(63).collect()
    }
}

// ── Browsing ──────────────────────────────────────────────────────────────────

/// A resolved LanShare service instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    pub instance: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub metadata: BTreeMap<String, String>,
}

impl DiscoveredPeer {
    /// The fingerprint the peer advertises, if present and well-formed.
    pub fn advertised_fingerprint(&self) -> Option<Fingerprint> {
        self.metadata
            .get(TXT_FINGERPRINT)
            .and_then(|fp| Fingerprint::parse(fp).ok())
    }

    /// Dialable socket addresses, IPv4 first.
    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = self
            .addresses
            .iter()
            .map(|ip| SocketAddr::new(*ip, self.port))
            .collect();
        addrs.sort_by_key(|a| a.is_ipv6());
        addrs
    }
}

/// Browses for `timeout` and returns every peer seen, de-duplicated by
/// instance name.
///
/// # Errors
///
/// Returns [`DiscoveryError`] if the daemon cannot start or the blocking task
/// fails.
pub async fn browse(timeout: Duration) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
    tokio::task::spawn_blocking(move || browse_blocking(timeout, |_| false))
        .await
        .map_err(|e| DiscoveryError::Task(e.to_string()))?
}

/// Browses until a peer named `instance` resolves or `timeout` elapses.
///
/// # Errors
///
/// Returns [`DiscoveryError`] if the daemon cannot start or the blocking task
/// fails.
pub async fn resolve(
    instance: &str,
    timeout: Duration,
) -> Result<Option<DiscoveredPeer>, DiscoveryError> {
    let wanted = instance.to_string();
    let peers = tokio::task::spawn_blocking(move || {
        browse_blocking(timeout, |peer| peer.instance == wanted)
    })
    .await
    .map_err(|e| DiscoveryError::Task(e.to_string()))??;
    Ok(peers.into_iter().find(|p| p.instance == instance))
}

/// The browse loop executed on a blocking thread.  Stops early once
/// `done(peer)` returns true for a resolved peer.
fn browse_blocking(
    timeout: Duration,
    done: impl Fn(&DiscoveredPeer) -> bool,
) -> Result<Vec<DiscoveredPeer>, DiscoveryError> {
    let daemon = ServiceDaemon::new()?;
    let receiver = daemon.browse(SERVICE_TYPE)?;
    let deadline = Instant::now() + timeout;
    let mut found: BTreeMap<String, DiscoveredPeer> = BTreeMap::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match receiver.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                let peer = peer_from_info(&info);
                debug!(instance = %peer.instance, port = peer.port, "resolved peer");
                let stop = done(&peer);
                merge_peer(&mut found, peer);
                if stop {
                    break;
                }
            }
            Ok(other) => debug!("mDNS event: {other:?}"),
            Err(_) => break,
        }
    }

    let _ = daemon.stop_browse(SERVICE_TYPE);
    let _ = daemon.shutdown();
    Ok(found.into_values().collect())
}

fn peer_from_info(info: &ServiceInfo) -> DiscoveredPeer {
    let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
    addresses.sort();
    DiscoveredPeer {
        instance: instance_name(info.get_fullname()),
        addresses,
        port: info.get_port(),
        metadata: info
            .get_properties()
            .iter()
            .map(|p| (p.key().to_string(), p.val_str().to_string()))
            .collect(),
    }
}

/// Merges a re-resolved instance into the result set, unioning addresses.
fn merge_peer(found: &mut BTreeMap<String, DiscoveredPeer>, peer: DiscoveredPeer) {
    match found.get_mut(&peer.instance) {
        Some(existing) => {
            for addr in peer.addresses {
                if !existing.addresses.contains(&addr) {
                    existing.addresses.push(addr);
                }
            }
            existing.addresses.sort();
            existing.port = peer.port;
            existing.metadata = peer.metadata;
        }
        None => {
            found.insert(peer.instance.clone(), peer);
        }
    }
}

/// Strips the `._lanshare._udp.local.` suffix from a full service name.
fn instance_name(fullname: &str) -> String {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
