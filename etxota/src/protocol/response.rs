//! Device acknowledgement parsing.
//!
//! The bootloader answers every command with a frame shaped like the host's,
//! carrying a single status byte:
//!
//! ```text
//! +------+-----+----------+--------+--------+------+
//! | SOF  | CMD | LEN (=1) | STATUS | CRC16  | EOF  |
//! +------+-----+----------+--------+--------+------+
//! |  1   |  1  |    2     |   1    |   2    |  1   |
//! +------+-----+----------+--------+--------+------+
//! ```
//!
//! `STATUS == 0` is an ACK; anything else is a NACK whose value indexes the
//! error table in [`NackCode::reason`].

use {
    crate::{
        error::ParseError,
        protocol::{
            crc::crc16_ccitt,
            packet::{CommandKind, MARK_END, MARK_START},
        },
    },
    log::trace,
    std::fmt,
};

/// Size of a response frame (1-byte payload).
pub const RESPONSE_FRAME_LEN: usize = 8;

/// Status byte for a positive acknowledgement.
pub const STATUS_ACK: u8 = 0x00;

/// How much of an incoming frame is verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validation {
    /// Only the command code and status byte are read; markers, length and
    /// checksum are ignored. Compatible with every bootloader build.
    #[default]
    Lenient,
    /// Markers, length field and checksum must all be consistent.
    Strict,
}

/// NACK error code reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NackCode(pub u8);

impl NackCode {
    /// Human-readable reason from the fixed error table.
    pub fn reason(self) -> String {
        match self.0 {
            1 => "packet not acknowledged".to_string(),
            2 => "packet response timeout".to_string(),
            3 => "firmware size is too big".to_string(),
            other => format!("unknown error code {other}"),
        }
    }
}

impl fmt::Display for NackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

/// Acknowledgement status of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// Command accepted.
    Ack,
    /// Command rejected.
    Nack(NackCode),
}

impl AckStatus {
    /// Decode a status byte.
    pub fn from_status(status: u8) -> Self {
        if status == STATUS_ACK {
            Self::Ack
        } else {
            Self::Nack(NackCode(status))
        }
    }

    /// Whether this is a positive acknowledgement.
    pub fn is_ack(self) -> bool {
        matches!(self, Self::Ack)
    }
}

/// A decoded device response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// Command being acknowledged.
    pub command: CommandKind,
    /// Acknowledgement status.
    pub status: AckStatus,
}

/// Parse raw bytes received from the device.
///
/// Only the first frame is returned; see [`parse_responses`] for bursts.
pub fn parse_response(raw: &[u8], validation: Validation) -> Result<Response, ParseError> {
    match validation {
        Validation::Lenient => parse_lenient(raw),
        Validation::Strict => strict_frames(raw).map(|frames| frames[0]),
    }
}

/// Parse every response in a burst, in arrival order.
///
/// Lenient mode decodes the first eight bytes only. Strict mode walks the
/// whole burst and returns each frame that passes validation; anything
/// between them is treated as line noise. Fails only when no frame is found.
pub fn parse_responses(raw: &[u8], validation: Validation) -> Result<Vec<Response>, ParseError> {
    match validation {
        Validation::Lenient => parse_lenient(raw).map(|response| vec![response]),
        Validation::Strict => strict_frames(raw),
    }
}

fn parse_lenient(raw: &[u8]) -> Result<Response, ParseError> {
    if raw.len() < RESPONSE_FRAME_LEN {
        return Err(ParseError::Malformed(format!(
            "expected at least {RESPONSE_FRAME_LEN} bytes, got {}",
            raw.len()
        )));
    }
    decode_fields(raw)
}

/// Never returns an empty vector.
fn strict_frames(raw: &[u8]) -> Result<Vec<Response>, ParseError> {
    let mut frames = Vec::new();
    let mut first_err = None;
    let mut unknown = None;
    let mut pos = 0;

    while let Some(offset) = raw[pos..]
        .iter()
        .position(|&b| b == MARK_START)
    {
        let start = pos + offset;
        match check_frame(&raw[start..]) {
            Ok(frame) => {
                if frames.is_empty() && start > 0 {
                    trace!("Skipping {start} bytes before start-of-frame");
                }
                match decode_fields(frame) {
                    Ok(response) => frames.push(response),
                    Err(ParseError::UnknownCommand(code)) => unknown = Some(code),
                    Err(e) => return Err(e),
                }
                pos = start + RESPONSE_FRAME_LEN;
            },
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
                pos = start + 1;
            },
        }
    }

    if !frames.is_empty() {
        return Ok(frames);
    }
    if let Some(code) = unknown {
        return Err(ParseError::UnknownCommand(code));
    }
    Err(first_err.unwrap_or_else(|| ParseError::Malformed("no start-of-frame marker".into())))
}

/// Validate markers, length and checksum of the frame at the head of `raw`.
fn check_frame(raw: &[u8]) -> Result<&[u8], ParseError> {
    if raw.len() < RESPONSE_FRAME_LEN {
        return Err(ParseError::Malformed(format!(
            "expected {RESPONSE_FRAME_LEN} bytes after start-of-frame, got {}",
            raw.len()
        )));
    }
    let frame = &raw[..RESPONSE_FRAME_LEN];

    let len = u16::from_le_bytes([frame[2], frame[3]]);
    if len != 1 {
        return Err(ParseError::Malformed(format!(
            "response length field is {len}, expected 1"
        )));
    }

    if frame[RESPONSE_FRAME_LEN - 1] != MARK_END {
        return Err(ParseError::Malformed(format!(
            "bad end-of-frame marker 0x{:02X}",
            frame[RESPONSE_FRAME_LEN - 1]
        )));
    }

    let received = u16::from_le_bytes([frame[5], frame[6]]);
    let framed = crc16_ccitt(&frame[1..5]);
    // Shipped bootloaders checksum only the status byte of their replies.
    let status_only = crc16_ccitt(&frame[4..5]);
    if received != framed && received != status_only {
        return Err(ParseError::ChecksumMismatch {
            expected: framed,
            actual: received,
        });
    }

    Ok(frame)
}

fn decode_fields(frame: &[u8]) -> Result<Response, ParseError> {
    let command = CommandKind::try_from(frame[1]).map_err(ParseError::UnknownCommand)?;
    Ok(Response {
        command,
        status: AckStatus::from_status(frame[4]),
    })
}
