//! Seams between the discovery/pairing logic and the operating system.
//!
//! - [`Connector`] opens a byte stream to a remote address.  Production code
//!   uses [`TcpConnector`]; tests substitute an in-memory subnet so scans
//!   over 253 addresses run without touching the network.
//! - [`LocalAddressResolver`] answers the one environment question the client
//!   has: "what is this host's IPv4 address?"

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddrV4, ToSocketAddrs};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Opens streams to remote Fir endpoints.
///
/// Implementations must not apply their own timeouts; callers bound every
/// connect with the limit appropriate to a scan probe or a pairing attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The stream type handed to a paired device.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Opens a connection to `addr`.
    async fn connect(&self, addr: SocketAddrV4) -> io::Result<Self::Stream>;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, addr: SocketAddrV4) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Error type for local address resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The system host name could not be read.
    #[error("failed to read host name: {0}")]
    Hostname(#[source] io::Error),

    /// The host name is not valid UTF-8.
    #[error("host name is not valid UTF-8")]
    HostnameEncoding,

    /// The resolver failed for the host name.
    #[error("failed to resolve host name `{host}`: {source}")]
    Lookup {
        host: String,
        #[source]
        source: io::Error,
    },

    /// The host name resolved, but to no usable IPv4 address.
    #[error("host name `{host}` has no IPv4 address")]
    NoIpv4 { host: String },
}

/// Looks up the local IPv4 address.  Called once per session.
#[cfg_attr(test, mockall::automock)]
pub trait LocalAddressResolver: Send + Sync {
    fn local_ipv4(&self) -> Result<Ipv4Addr, ResolveError>;
}

/// Resolves the system host name through the platform resolver, the way
/// `gethostbyname(gethostname())` does.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostnameResolver;

impl LocalAddressResolver for HostnameResolver {
    fn local_ipv4(&self) -> Result<Ipv4Addr, ResolveError> {
        let host = hostname::get()
            .map_err(ResolveError::Hostname)?
            .into_string()
            .map_err(|_| ResolveError::HostnameEncoding)?;

        let resolved: Vec<IpAddr> = (host.as_str(), 0)
            .to_socket_addrs()
            .map_err(|source| ResolveError::Lookup {
                host: host.clone(),
                source,
            })?
            .map(|sa| sa.ip())
            .collect();

        pick_ipv4(&resolved).ok_or(ResolveError::NoIpv4 { host })
    }
}

/// Picks the address to scan from: the first non-loopback IPv4, falling back
/// to a loopback one.  Unspecified addresses are never returned.
fn pick_ipv4(candidates: &[IpAddr]) -> Option<Ipv4Addr> {
    let v4: Vec<Ipv4Addr> = candidates
        .iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) if !v4.is_unspecified() => Some(*v4),
            _ => None,
        })
        .collect();

    v4.iter()
        .copied()
        .find(|ip| !ip.is_loopback())
        .or_else(|| v4.first().copied())
}
