//! Validation of user-supplied port arguments.
//!
//! Ports reach the core as text from a command line or UI field.  They are
//! checked here, before any socket is opened, so a typo never turns into a
//! 253-address scan against the wrong port.

use thiserror::Error;

/// Lowest port accepted for a scan or pairing target.
pub const MIN_PORT: u16 = 1;

/// Highest port accepted for a scan or pairing target.
pub const MAX_PORT: u16 = 65534;

/// Error returned for a port argument that cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("invalid port `{0}`: ports are in the {MIN_PORT}..={MAX_PORT} range")]
    InvalidPort(String),
}

/// Parses a decimal port argument.
///
/// Surrounding whitespace is ignored.  Signs, hex, and anything outside
/// `1..=65534` are rejected.
///
/// # Errors
///
/// Returns [`PortError::InvalidPort`] carrying the original text.
///
/// # Examples
///
/// ```rust
/// use fir_core::parse_port;
///
/// assert_eq!(parse_port("7708"), Ok(7708));
/// assert!(parse_port("65535").is_err());
/// assert!(parse_port("http").is_err());
/// ```
pub fn parse_port(arg: &str) -> Result<u16, PortError> {
    let trimmed = arg.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PortError::InvalidPort(arg.to_string()));
    }
    let value: u32 = trimmed
        .parse()
        .map_err(|_| PortError::InvalidPort(arg.to_string()))?;
    validate_port(value).map_err(|_| PortError::InvalidPort(arg.to_string()))
}

/// Checks a numeric port against the accepted range.
///
/// # Errors
///
/// Returns [`PortError::InvalidPort`] for 0, 65535, or anything larger.
pub fn validate_port(value: u32) -> Result<u16, PortError> {
    match u16::try_from(value) {
        Ok(port) if (MIN_PORT..=MAX_PORT).contains(&port) => Ok(port),
        _ => Err(PortError::InvalidPort(value.to_string())),
    }
}
