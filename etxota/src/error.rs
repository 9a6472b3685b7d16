//! Error types for etxota.

use {
    crate::protocol::{packet::CommandKind, response::NackCode},
    std::{io, time::Duration},
    thiserror::Error,
};

/// Result type for etxota operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for etxota operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Firmware image cannot be used.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// Response bytes could not be decoded.
    #[error("Bad response: {0}")]
    Parse(#[from] ParseError),

    /// Device rejected a command.
    #[error("{command} rejected by device: {code}")]
    Nack {
        /// Rejected command.
        command: CommandKind,
        /// Error code reported by the device.
        code: NackCode,
    },

    /// No matching response arrived within the configured bound.
    #[error("Timeout: no {command} response within {after:?}")]
    Timeout {
        /// Command whose acknowledgement was awaited.
        command: CommandKind,
        /// Wait bound that expired.
        after: Duration,
    },

    /// Firmware image exceeds the configured limit.
    #[error("Firmware size is too big: {size} bytes (limit {max})")]
    FirmwareTooLarge {
        /// Image size in bytes.
        size: u32,
        /// Configured limit in bytes.
        max: u32,
    },

    /// Operation interrupted by the embedding application.
    #[error("Interrupted")]
    Interrupted,

    /// Serial port not found.
    #[error("Serial port not found")]
    DeviceNotFound,
}

/// Failure to decode a device response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Too short, or markers/length inconsistent.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Response checksum does not match its content.
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch {
        /// Checksum computed over the received frame.
        expected: u16,
        /// Checksum carried by the frame.
        actual: u16,
    },

    /// Command code outside the protocol.
    #[error("unknown command code 0x{0:02X}")]
    UnknownCommand(u8),
}
