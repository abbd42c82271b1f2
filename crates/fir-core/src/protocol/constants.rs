//! Fixed protocol constants shared by every Fir peer.

/// TCP port a Fir device listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 7708;

/// Total size of the packet header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Packet version written into every header.  Same as the protocol version;
/// there is no negotiation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Number of zero padding bytes at the end of the header.
pub const RESERVED_SIZE: usize = 7;

/// Name shown for a peer that has not yet declared one.
pub const UNRESOLVED_NAME: &str = "???";
