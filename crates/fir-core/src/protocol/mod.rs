//! Protocol module containing wire constants, packet kinds, and the header codec.

pub mod constants;
pub mod header;
pub mod kinds;

pub use constants::*;
pub use header::{decode_header, encode_header, truncate_timestamp, PacketHeader, ProtocolError};
pub use kinds::{PacketKind, PayloadKind};
