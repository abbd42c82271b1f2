//! Client: discovery and pairing orchestration.
//!
//! The `Client` is the single entry point external callers use.  It holds the
//! session state:
//!
//! - The local IPv4 address, resolved once at construction.  A client that
//!   could not resolve it is `Offline` and refuses to scan.
//! - The result set of the last complete scan, replaced wholesale each time.
//! - The registry of paired devices, keyed by `address:port`.
//!
//! # Concurrency
//!
//! All operations take `&self`.  The registry lives behind a `std` mutex
//! that is never held across an `.await`; a key being paired is recorded as
//! pending while the connect runs, so a second `pair_device` for the same
//! key is refused instead of racing, while different keys pair in parallel.
//! Each paired device sits behind its own async mutex so pings against it
//! are serialized.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use fir_core::port::validate_port;
use fir_core::PortError;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::network::connector::{Connector, LocalAddressResolver};
use crate::infrastructure::network::device::{
    Device, DeviceError, DeviceInfo, DeviceTimeouts, PingReply,
};
use crate::infrastructure::network::scanner::{ScanError, ScanOptions, ScanResult, Scanner};

/// Coarse aggregate state for external display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// The local address is unknown.
    Offline,
    /// Ready; no device is paired.
    Open,
    /// At least one device is paired.
    Paired,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientStatus::Offline => "offline",
            ClientStatus::Open => "open",
            ClientStatus::Paired => "paired",
        };
        f.write_str(s)
    }
}

/// Error type for client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The local address could not be resolved at startup.
    #[error("client is offline: local IPv4 address unknown")]
    Offline,

    /// Another `pair_device` call for the same key has not finished.
    #[error("pairing with {0} is already in progress")]
    PairingInProgress(SocketAddrV4),

    #[error(transparent)]
    InvalidPort(#[from] PortError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Settings shared by every scan and device this client creates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    pub scan: ScanOptions,
    pub timeouts: DeviceTimeouts,
}

/// Outcome of one `scan()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    /// Devices that accepted a connection.
    pub results: Vec<ScanResult>,
    /// Probes that finished.
    pub probed: usize,
    /// Addresses the scan covered.
    pub candidates: usize,
    /// The scan was interrupted.  Interrupted scans do not replace the
    /// stored result set.
    pub cancelled: bool,
}

impl ScanSummary {
    pub fn reachable(&self) -> usize {
        self.results.len()
    }
}

struct PairedEntry<C: Connector> {
    device: Arc<AsyncMutex<Device<C>>>,
    /// Snapshot refreshed after every operation on `device`, readable without
    /// waiting on the device lock.
    info: DeviceInfo,
}

struct Registry<C: Connector> {
    paired: HashMap<SocketAddrV4, PairedEntry<C>>,
    pending: HashSet<SocketAddrV4>,
}

impl<C: Connector> Default for Registry<C> {
    fn default() -> Self {
        Self {
            paired: HashMap::new(),
            pending: HashSet::new(),
        }
    }
}

/// Releases a pending pairing key, including when the `pair_device` future
/// is dropped mid-connect.
struct PendingClaim<'a, C: Connector> {
    registry: &'a Mutex<Registry<C>>,
    key: SocketAddrV4,
}

impl<C: Connector> Drop for PendingClaim<'_, C> {
    fn drop(&mut self) {
        lock(self.registry).pending.remove(&self.key);
    }
}

/// Discovery and pairing orchestrator.
pub struct Client<C: Connector> {
    connector: Arc<C>,
    settings: ClientSettings,
    local_addr: Option<Ipv4Addr>,
    known: RwLock<Vec<ScanResult>>,
    registry: Mutex<Registry<C>>,
}

impl<C: Connector> Client<C> {
    /// Creates a client, resolving the local address once.
    ///
    /// The lookup blocks; async callers resolve with [`resolve_local_addr`]
    /// on a blocking thread and use [`Client::with_local_addr`] instead.
    pub fn new(
        connector: Arc<C>,
        resolver: &dyn LocalAddressResolver,
        settings: ClientSettings,
    ) -> Self {
        Self::with_local_addr(connector, resolve_local_addr(resolver), settings)
    }

    /// Creates a client with an already-known local address.
    pub fn with_local_addr(
        connector: Arc<C>,
        local_addr: Option<Ipv4Addr>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            connector,
            settings,
            local_addr,
            known: RwLock::new(Vec::new()),
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn local_addr(&self) -> Option<Ipv4Addr> {
        self.local_addr
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn status(&self) -> ClientStatus {
        if self.local_addr.is_none() {
            ClientStatus::Offline
        } else if lock(&self.registry).paired.is_empty() {
            ClientStatus::Open
        } else {
            ClientStatus::Paired
        }
    }

    /// Result set of the last complete scan.
    pub fn known_devices(&self) -> Vec<ScanResult> {
        self.known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of every paired device.
    pub fn paired_devices(&self) -> Vec<DeviceInfo> {
        lock(&self.registry)
            .paired
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Scans the local /24 on `port`.
    ///
    /// A complete scan replaces the stored result set.  An interrupted one
    /// leaves it untouched and returns whatever it resolved.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidPort`] before any network activity.
    /// - [`ClientError::Offline`] when the local address is unknown.
    /// - [`ClientError::Scan`] if cancelled before any probe resolved.
    pub async fn scan(
        &self,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, ClientError> {
        let port = validate_port(u32::from(port))?;
        let local = self.local_addr.ok_or(ClientError::Offline)?;

        info!(%local, port, "scanning local subnet");
        let scanner = Scanner::new(Arc::clone(&self.connector), self.settings.scan.clone());
        let report = scanner.scan(local, port, cancel).await?;

        if report.cancelled {
            warn!(
                "scan interrupted after {} of {} probes; keeping previous results",
                report.probed, report.candidates
            );
        } else {
            *self.known.write().unwrap_or_else(PoisonError::into_inner) = report.results.clone();
        }
        info!(
            "{} of {} probed addresses answered on port {port}",
            report.results.len(),
            report.probed
        );

        Ok(ScanSummary {
            results: report.results,
            probed: report.probed,
            candidates: report.candidates,
            cancelled: report.cancelled,
        })
    }

    /// Pairs with the device at `addr:port` and retains it.
    ///
    /// An already-paired key returns the existing device without dialing.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidPort`] before any network activity.
    /// - [`ClientError::PairingInProgress`] if another call for the same key
    ///   is still connecting.
    /// - [`ClientError::Device`] wrapping [`DeviceError::NoRoute`] when the
    ///   connect fails.  Nothing is retained.
    pub async fn pair_device(
        &self,
        addr: Ipv4Addr,
        port: u16,
    ) -> Result<DeviceInfo, ClientError> {
        let port = validate_port(u32::from(port))?;
        let key = SocketAddrV4::new(addr, port);

        let claim = {
            let mut registry = lock(&self.registry);
            if let Some(entry) = registry.paired.get(&key) {
                debug!(%key, "already paired");
                return Ok(entry.info.clone());
            }
            if !registry.pending.insert(key) {
                return Err(ClientError::PairingInProgress(key));
            }
            PendingClaim {
                registry: &self.registry,
                key,
            }
        };

        let mut device = Device::new(
            addr,
            port,
            Arc::clone(&self.connector),
            self.settings.timeouts,
        );
        device.pair().await?;

        let info = device.info();
        lock(&self.registry).paired.insert(
            key,
            PairedEntry {
                device: Arc::new(AsyncMutex::new(device)),
                info: info.clone(),
            },
        );
        drop(claim);

        info!(%key, "device paired");
        Ok(info)
    }

    /// Pings `addr:port`.
    ///
    /// A paired device is re-checked over its paired connection; if that
    /// fails it is dropped from the registry.  Any other address gets a
    /// temporary connection.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidPort`] or [`ClientError::Device`].
    pub async fn ping_device(
        &self,
        addr: Ipv4Addr,
        port: u16,
    ) -> Result<PingReply, ClientError> {
        let port = validate_port(u32::from(port))?;
        let key = SocketAddrV4::new(addr, port);

        let paired = lock(&self.registry)
            .paired
            .get(&key)
            .map(|entry| Arc::clone(&entry.device));

        let Some(shared) = paired else {
            let mut device =
                Device::new(addr, port, Arc::clone(&self.connector), self.settings.timeouts);
            return Ok(device.ping().await?);
        };

        let mut device = shared.lock().await;
        let result = device.ping().await;
        {
            let mut registry = lock(&self.registry);
            let current = registry
                .paired
                .get(&key)
                .is_some_and(|entry| Arc::ptr_eq(&entry.device, &shared));
            if current {
                if device.is_paired() {
                    if let Some(entry) = registry.paired.get_mut(&key) {
                        entry.info = device.info();
                    }
                } else {
                    registry.paired.remove(&key);
                    warn!(%key, "paired device stopped answering, removed");
                }
            }
        }
        Ok(result?)
    }

    /// Closes the paired connection to `addr:port`.
    ///
    /// Returns `false` if no such device was paired.
    pub async fn disconnect(&self, addr: Ipv4Addr, port: u16) -> bool {
        let key = SocketAddrV4::new(addr, port);
        let removed = lock(&self.registry).paired.remove(&key);
        match removed {
            Some(entry) => {
                entry.device.lock().await.close();
                info!(%key, "device disconnected");
                true
            }
            None => false,
        }
    }

    /// Closes every paired connection.  Used at shutdown.
    pub async fn close_all(&self) {
        let entries: Vec<_> = lock(&self.registry).paired.drain().collect();
        for (key, entry) in entries {
            entry.device.lock().await.close();
            debug!(%key, "closed");
        }
    }
}

/// Looks up the local IPv4 address.
///
/// A failure is logged and yields `None`, which leaves a client `Offline`.
/// May block on the system resolver.
pub fn resolve_local_addr(resolver: &dyn LocalAddressResolver) -> Option<Ipv4Addr> {
    match resolver.local_ipv4() {
        Ok(ip) => {
            debug!(%ip, "resolved local address");
            Some(ip)
        }
        Err(e) => {
            warn!("could not resolve local address, client is offline: {e}");
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
