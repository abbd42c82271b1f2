//! Codec for the fixed 16-byte Fir packet header.
//!
//! Wire format:
//! ```text
//! [version:2][type:2][time:2][size:2][ptype:1][reserved:7]
//! ```
//! All multi-byte integers are big-endian.  The reserved bytes are always
//! written as zero and ignored on decode.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::protocol::constants::{HEADER_SIZE, PROTOCOL_VERSION};
use crate::protocol::kinds::{PacketKind, PayloadKind};

/// Errors that can occur while decoding a packet header.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than a full header.
    #[error("frame too short: need {needed} bytes, got {available}")]
    FrameTooShort { needed: usize, available: usize },

    /// The bytes could not be unpacked into the header fields.
    #[error("corrupt frame: {0}")]
    FrameCorrupt(String),
}

/// Decoded form of the packet header.
///
/// `kind` and `ptype` are kept as raw integers: this layer does not validate
/// them.  Use [`PacketHeader::packet_kind`] and [`PacketHeader::payload_kind`]
/// to interpret them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u16,
    pub kind: u16,
    pub time: u16,
    pub size: u16,
    pub ptype: u8,
}

impl PacketHeader {
    /// Builds a header for the current protocol version stamped with the
    /// current truncated Unix time.
    pub fn new(kind: PacketKind, size: u16, ptype: PayloadKind) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind: kind as u16,
            time: truncate_timestamp(unix_now_secs()),
            size,
            ptype: ptype as u8,
        }
    }

    /// Builds an empty-payload PING header.
    pub fn ping() -> Self {
        Self::new(PacketKind::Ping, 0, PayloadKind::Raw)
    }

    /// Packs the header into its 16-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        encode_header(self.version, self.kind, self.time, self.size, self.ptype)
    }

    /// Interprets the `type` field, returning the raw value if unknown.
    pub fn packet_kind(&self) -> Result<PacketKind, u16> {
        PacketKind::try_from(self.kind)
    }

    /// Interprets the `ptype` field, returning the raw value if unknown.
    pub fn payload_kind(&self) -> Result<PayloadKind, u8> {
        PayloadKind::try_from(self.ptype)
    }
}

/// Packs the five header fields big-endian into 16 bytes.  The 7 reserved
/// bytes are always zero.
///
/// # Examples
///
/// ```rust
/// use fir_core::{decode_header, encode_header};
///
/// let bytes = encode_header(1, 2, 0xBEEF, 64, 0);
/// let header = decode_header(&bytes).unwrap();
/// assert_eq!(header.kind, 2);
/// assert_eq!(header.size, 64);
/// ```
pub fn encode_header(
    version: u16,
    kind: u16,
    time: u16,
    size: u16,
    ptype: u8,
) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..2].copy_from_slice(&version.to_be_bytes());
    buf[2..4].copy_from_slice(&kind.to_be_bytes());
    buf[4..6].copy_from_slice(&time.to_be_bytes());
    buf[6..8].copy_from_slice(&size.to_be_bytes());
    buf[8] = ptype;
    // buf[9..16] stays zero (reserved)
    buf
}

/// Decodes a header from the start of `bytes`.
///
/// Bytes beyond the first [`HEADER_SIZE`] are ignored; the payload is read
/// separately by the caller using the `size` field.
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooShort`] when fewer than 16 bytes are
/// given, and [`ProtocolError::FrameCorrupt`] if a field cannot be unpacked.
pub fn decode_header(bytes: &[u8]) -> Result<PacketHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::FrameTooShort {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let frame = &bytes[..HEADER_SIZE];
    Ok(PacketHeader {
        version: read_u16(frame, 0, "version")?,
        kind: read_u16(frame, 2, "type")?,
        time: read_u16(frame, 4, "time")?,
        size: read_u16(frame, 6, "size")?,
        ptype: *frame
            .get(8)
            .ok_or_else(|| ProtocolError::FrameCorrupt("missing ptype byte".to_string()))?,
    })
}

/// Truncates Unix epoch seconds to the 16-bit header `time` field.
///
/// The seconds are laid out as a 4-byte big-endian quantity, the two
/// most-significant bytes are dropped, and the remaining two bytes are read
/// back as a big-endian `u16`.  Existing peers compute the field this way, so
/// the byte layout is followed literally rather than using a modulo.
pub fn truncate_timestamp(unix_secs: u64) -> u16 {
    let word = (unix_secs as u32).to_be_bytes();
    u16::from_be_bytes([word[2], word[3]])
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn read_u16(buf: &[u8], offset: usize, field: &str) -> Result<u16, ProtocolError> {
    buf.get(offset..offset + 2)
        .and_then(|s| <[u8; 2]>::try_from(s).ok())
        .map(u16::from_be_bytes)
        .ok_or_else(|| {
            ProtocolError::FrameCorrupt(format!("cannot unpack {field} at offset {offset}"))
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
