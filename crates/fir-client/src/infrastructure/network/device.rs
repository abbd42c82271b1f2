//! A single remote Fir endpoint and its pairing state machine.
//!
//! ```text
//! Unconnected ──pair()──► Connecting ──► Paired
//!                              │
//!                              └──────► Failed
//! close() from any state ──► Unconnected
//! ```
//!
//! A [`Device`] exclusively owns its connection.  The connection lives inside
//! the `Paired` state, so a device that is not paired cannot hold a socket.
//!
//! `ping()` is allowed from `Unconnected` (a temporary connection is opened
//! and closed again) and from `Paired` (a liveness re-check over the paired
//! connection).  It is rejected while connecting and after a failure.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fir_core::protocol::constants::{HEADER_SIZE, UNRESOLVED_NAME};
use fir_core::{decode_header, PacketHeader, PacketKind, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::connector::Connector;

/// Default limit for the pairing connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit for each read or write of a framed exchange.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Externally visible pairing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unconnected,
    Connecting,
    Paired,
    Failed,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Unconnected => "unconnected",
            DeviceState::Connecting => "connecting",
            DeviceState::Paired => "paired",
            DeviceState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Error type for device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The connection could not be opened (refused, unreachable, timed out).
    #[error("no route to {addr}: {reason}")]
    NoRoute { addr: SocketAddrV4, reason: String },

    /// The operation is not allowed in the device's current state.
    #[error("cannot {operation} {addr} while it is {state}")]
    InvalidState {
        addr: SocketAddrV4,
        operation: &'static str,
        state: DeviceState,
    },

    /// The peer answered with a packet type other than the one expected.
    #[error("unexpected packet type {kind} from {addr}")]
    UnexpectedPacket { addr: SocketAddrV4, kind: u16 },

    /// The peer sent a malformed header.
    #[error("bad frame from {addr}: {source}")]
    Protocol {
        addr: SocketAddrV4,
        #[source]
        source: ProtocolError,
    },

    /// A read or write did not finish in time.
    #[error("timed out talking to {addr}")]
    Timeout { addr: SocketAddrV4 },

    /// The established connection failed.
    #[error("I/O error talking to {addr}: {source}")]
    Io {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },
}

/// Timeouts applied to device network operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTimeouts {
    pub connect: Duration,
    pub io: Duration,
}

impl Default for DeviceTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            io: DEFAULT_IO_TIMEOUT,
        }
    }
}

/// Answer to a PING.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReply {
    /// Name the device declared in the reply payload, if any.
    pub name: Option<String>,
    /// Truncated timestamp from the reply header.
    pub remote_time: u16,
    pub round_trip: Duration,
}

/// Point-in-time copy of a device's identity and state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub addr: SocketAddrV4,
    pub name: String,
    pub state: DeviceState,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.name, self.addr)
    }
}

/// Connection lifecycle.  The stream only exists while paired.
enum Link<S> {
    Unconnected,
    Connecting,
    Paired(S),
    Failed,
}

impl<S> Link<S> {
    fn state(&self) -> DeviceState {
        match self {
            Link::Unconnected => DeviceState::Unconnected,
            Link::Connecting => DeviceState::Connecting,
            Link::Paired(_) => DeviceState::Paired,
            Link::Failed => DeviceState::Failed,
        }
    }
}

/// Holds a device in `Connecting` for the duration of a pairing attempt.
///
/// Dropping it without [`Transition::settle`] (an error path, or the
/// `pair()` future being dropped mid-connect) leaves the device `Failed`.
struct Transition<'a, S> {
    link: &'a mut Link<S>,
    settled: bool,
}

impl<'a, S> Transition<'a, S> {
    fn begin(link: &'a mut Link<S>) -> Self {
        *link = Link::Connecting;
        Self {
            link,
            settled: false,
        }
    }

    fn settle(mut self, next: Link<S>) {
        *self.link = next;
        self.settled = true;
    }
}

impl<S> Drop for Transition<'_, S> {
    fn drop(&mut self) {
        if !self.settled {
            *self.link = Link::Failed;
        }
    }
}

/// One remote endpoint.
///
/// Callers must serialize access to a given device; the orchestrator wraps
/// each paired device in its own mutex.
pub struct Device<C: Connector> {
    addr: SocketAddrV4,
    name: Option<String>,
    link: Link<C::Stream>,
    connector: Arc<C>,
    timeouts: DeviceTimeouts,
}

impl<C: Connector> Device<C> {
    /// Creates an unconnected device.  No network activity happens here.
    pub fn new(addr: Ipv4Addr, port: u16, connector: Arc<C>, timeouts: DeviceTimeouts) -> Self {
        Self {
            addr: SocketAddrV4::new(addr, port),
            name: None,
            link: Link::Unconnected,
            connector,
            timeouts,
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        *self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        self.addr
    }

    /// Name declared by the device, once a ping has captured it.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Declared name or the unresolved placeholder.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNRESOLVED_NAME)
    }

    pub fn state(&self) -> DeviceState {
        self.link.state()
    }

    pub fn is_paired(&self) -> bool {
        matches!(self.link, Link::Paired(_))
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            addr: self.addr,
            name: self.display_name().to_string(),
            state: self.state(),
        }
    }

    /// Opens the exclusive connection to the device.
    ///
    /// A no-op on a device that is already paired.  Never retries.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::NoRoute`] if the connect fails or times out; the
    ///   device is left `Failed`.
    /// - [`DeviceError::InvalidState`] when called while connecting or after
    ///   a failure.  Call [`Device::close`] first to retry.
    pub async fn pair(&mut self) -> Result<(), DeviceError> {
        match self.link {
            Link::Paired(_) => {
                debug!(addr = %self.addr, "already paired");
                return Ok(());
            }
            Link::Unconnected => {}
            _ => return Err(self.invalid_state("pair")),
        }

        let addr = self.addr;
        let limit = self.timeouts.connect;
        let connector = Arc::clone(&self.connector);
        let transition = Transition::begin(&mut self.link);

        debug!(%addr, "pairing");
        match open(connector.as_ref(), addr, limit).await {
            Ok(stream) => {
                transition.settle(Link::Paired(stream));
                info!(%addr, "paired");
                Ok(())
            }
            Err(e) => {
                drop(transition);
                warn!("pairing with {addr} failed: {e}");
                Err(e)
            }
        }
    }

    /// Checks the device is alive and captures its declared name.
    ///
    /// # Errors
    ///
    /// - [`DeviceError::NoRoute`] if a temporary connection cannot be opened.
    /// - [`DeviceError::InvalidState`] while connecting or after a failure.
    /// - [`DeviceError::Timeout`], [`DeviceError::Io`],
    ///   [`DeviceError::Protocol`] or [`DeviceError::UnexpectedPacket`] when
    ///   the exchange fails.  A failed exchange on the paired connection
    ///   drops it and leaves the device `Failed`.
    pub async fn ping(&mut self) -> Result<PingReply, DeviceError> {
        let addr = self.addr;
        let io_limit = self.timeouts.io;

        let reply = match &mut self.link {
            Link::Unconnected => {
                let mut stream = open(self.connector.as_ref(), addr, self.timeouts.connect).await?;
                exchange_ping(&mut stream, addr, PacketHeader::ping(), io_limit).await?
            }
            Link::Paired(stream) => {
                match exchange_ping(stream, addr, PacketHeader::ping(), io_limit).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("lost paired device {addr}: {e}");
                        self.link = Link::Failed;
                        return Err(e);
                    }
                }
            }
            _ => return Err(self.invalid_state("ping")),
        };

        if let Some(name) = &reply.name {
            debug!(%addr, %name, "device declared name");
            self.name = Some(name.clone());
        }
        Ok(reply)
    }

    /// Releases the connection and returns the device to `Unconnected`.
    pub fn close(&mut self) {
        if self.is_paired() {
            debug!(addr = %self.addr, "closing paired connection");
        }
        self.link = Link::Unconnected;
    }

    fn invalid_state(&self, operation: &'static str) -> DeviceError {
        DeviceError::InvalidState {
            addr: self.addr,
            operation,
            state: self.state(),
        }
    }
}

impl<C: Connector> fmt::Debug for Device<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("addr", &self.addr)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Connector> fmt::Display for Device<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.display_name(), self.addr)
    }
}

/// Bounded connect; every failure becomes `NoRoute`.
async fn open<C: Connector>(
    connector: &C,
    addr: SocketAddrV4,
    limit: Duration,
) -> Result<C::Stream, DeviceError> {
    match tokio::time::timeout(limit, connector.connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(DeviceError::NoRoute {
            addr,
            reason: e.to_string(),
        }),
        Err(_) => Err(DeviceError::NoRoute {
            addr,
            reason: format!("connect timed out after {limit:?}"),
        }),
    }
}

/// Sends `request` and reads one PING reply header plus its payload.
async fn exchange_ping<S>(
    stream: &mut S,
    addr: SocketAddrV4,
    request: PacketHeader,
    limit: Duration,
) -> Result<PingReply, DeviceError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();

    bounded(addr, limit, stream.write_all(&request.encode())).await?;
    bounded(addr, limit, stream.flush()).await?;

    let mut head = [0u8; HEADER_SIZE];
    bounded(addr, limit, stream.read_exact(&mut head)).await?;
    let header = decode_header(&head).map_err(|source| DeviceError::Protocol { addr, source })?;

    if header.packet_kind() != Ok(PacketKind::Ping) {
        return Err(DeviceError::UnexpectedPacket {
            addr,
            kind: header.kind,
        });
    }

    let mut payload = vec![0u8; usize::from(header.size)];
    bounded(addr, limit, stream.read_exact(&mut payload)).await?;

    Ok(PingReply {
        name: declared_name(&payload),
        remote_time: header.time,
        round_trip: started.elapsed(),
    })
}

/// Interprets a PING reply payload as a device name.
fn declared_name(payload: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(payload);
    let name = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!name.is_empty()).then(|| name.to_string())
}

async fn bounded<T>(
    addr: SocketAddrV4,
    limit: Duration,
    step: impl Future<Output = io::Result<T>>,
) -> Result<T, DeviceError> {
    match tokio::time::timeout(limit, step).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(DeviceError::Io { addr, source }),
        Err(_) => Err(DeviceError::Timeout { addr }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
