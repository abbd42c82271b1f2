//! # fir-core
//!
//! Shared library for the Fir local-network device protocol containing the
//! wire constants, the fixed-size packet header codec, and port validation.
//!
//! This crate has zero dependencies on network sockets or an async runtime,
//! so both the discovery client and any future device-side implementation
//! can share it.
//!
//! # Wire format overview
//!
//! Every Fir packet starts with a 16-byte header in network byte order:
//!
//! ```text
//! [version:2][type:2][time:2][size:2][ptype:1][reserved:7]
//! ```
//!
//! `size` bytes of payload follow the header.  The header never carries
//! variable-length data, so a reader can always pull exactly
//! [`HEADER_SIZE`] bytes off the stream before deciding what to do next.

pub mod port;
pub mod protocol;

pub use port::{parse_port, PortError};
pub use protocol::constants::{DEFAULT_PORT, HEADER_SIZE, PROTOCOL_VERSION};
pub use protocol::header::{decode_header, encode_header, PacketHeader, ProtocolError};
pub use protocol::kinds::{PacketKind, PayloadKind};
