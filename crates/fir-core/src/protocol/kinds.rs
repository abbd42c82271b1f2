//! Named values for the `type` and `ptype` header fields.
//!
//! The codec stores both fields as raw integers.  These enums exist for
//! callers that interpret a decoded header and need to reject values they do
//! not understand.

use std::fmt;

/// Packet type carried in the header `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketKind {
    /// Liveness check; the reply carries the device name as payload.
    Ping = 0,
    /// Payload is an error message.
    Err = 1,
    /// Payload is raw bytes.
    Raw = 2,
}

impl TryFrom<u16> for PacketKind {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketKind::Ping),
            1 => Ok(PacketKind::Err),
            2 => Ok(PacketKind::Raw),
            other => Err(other),
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketKind::Ping => "PING",
            PacketKind::Err => "ERR",
            PacketKind::Raw => "RAW",
        };
        f.write_str(name)
    }
}

/// Payload sub-type carried in the header `ptype` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadKind {
    /// `size` raw bytes follow the header.
    Raw = 0,
}

impl TryFrom<u8> for PayloadKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PayloadKind::Raw),
            other => Err(other),
        }
    }
}
