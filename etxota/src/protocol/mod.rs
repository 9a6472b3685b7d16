//! Protocol implementations.

pub mod crc;
pub mod packet;
pub mod response;

// Re-export common types
pub use {
    crc::crc16_ccitt,
    packet::{CommandKind, DATA_MAX_SIZE, FirmwareMetadata, FirmwareType, Packet},
    response::{AckStatus, NackCode, Response, Validation, parse_response, parse_responses},
};
