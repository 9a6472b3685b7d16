//! ETX OTA packet framing.
//!
//! ## Frame Format
//!
//! ```text
//! +------+-----+--------+---------+-------------+--------+------+
//! | SOF  | CMD | LEN_LO | LEN_HI  |   PAYLOAD   | CRC16  | EOF  |
//! +------+-----+--------+---------+-------------+--------+------+
//! |  1   |  1  |   1    |    1    |  LEN bytes  | 2 (LE) |  1   |
//! +------+-----+--------+---------+-------------+--------+------+
//! | 0x2A | cmd |  payload length  |   payload   |  CRC   | 0x23 |
//! +------+-----+--------+---------+-------------+--------+------+
//! ```
//!
//! The CRC covers `CMD | LEN_LO | LEN_HI | PAYLOAD` only. The bootloader reads
//! it back as a native little-endian `u16`, so the low byte goes first.

use {
    crate::protocol::crc::crc16_ccitt,
    byteorder::{LittleEndian, WriteBytesExt},
    std::fmt,
};

/// Start-of-frame marker.
pub const MARK_START: u8 = 0x2A;

/// End-of-frame marker.
pub const MARK_END: u8 = 0x23;

/// Largest firmware chunk carried by one DATA packet.
pub const DATA_MAX_SIZE: usize = 128;

/// Bytes a frame adds around its payload: SOF, CMD, LEN(2), CRC(2), EOF.
pub const FRAME_OVERHEAD: usize = 7;

/// Payload length of the INFO packet.
pub const INFO_PAYLOAD_LEN: usize = 9;

/// Fixed payload byte of START and STOP.
const CONTROL_PAYLOAD: u8 = 0x01;

/// ETX OTA command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CommandKind {
    /// Open an update session.
    Start = 0x01,
    /// Firmware metadata (size, type, CRC, version).
    Info = 0x02,
    /// One chunk of the firmware image.
    FirmwareData = 0x03,
    /// Close the update session.
    Stop = 0x04,
}

impl CommandKind {
    /// Wire code of this command.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CommandKind {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(Self::Start),
            0x02 => Ok(Self::Info),
            0x03 => Ok(Self::FirmwareData),
            0x04 => Ok(Self::Stop),
            other => Err(other),
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "START"),
            Self::Info => write!(f, "INFO"),
            Self::FirmwareData => write!(f, "DATA"),
            Self::Stop => write!(f, "STOP"),
        }
    }
}

/// Kind of image being installed, as understood by the bootloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[repr(u8)]
pub enum FirmwareType {
    /// Application image.
    #[default]
    App = 0x01,
    /// Bootloader image.
    Bootloader = 0x02,
}

impl FirmwareType {
    /// Wire code of this firmware type.
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FirmwareType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x01 => Ok(Self::App),
            0x02 => Ok(Self::Bootloader),
            other => Err(other),
        }
    }
}

/// Firmware description sent in the INFO packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FirmwareMetadata {
    /// Image size in bytes.
    pub size: u32,
    /// Image type.
    pub fw_type: FirmwareType,
    /// CRC-16/CCITT over the whole image.
    pub crc: u16,
    /// Firmware version.
    pub version: u16,
}

impl FirmwareMetadata {
    /// Serialize into the 9-byte INFO payload.
    ///
    /// Layout: `size (u32 LE) | type (u8) | crc (u16 LE) | version (u16 LE)`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(INFO_PAYLOAD_LEN);
        payload
            .write_u32::<LittleEndian>(self.size)
            .unwrap();
        payload.push(
            self.fw_type
                .code(),
        );
        payload
            .write_u16::<LittleEndian>(self.crc)
            .unwrap();
        payload
            .write_u16::<LittleEndian>(self.version)
            .unwrap();
        payload
    }
}

/// An outgoing (or device-shaped) ETX OTA packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    command: CommandKind,
    payload: Vec<u8>,
}

impl Packet {
    /// Create a packet from a command and an arbitrary payload.
    ///
    /// # Panics
    ///
    /// Panics if the payload does not fit the 16-bit length field.
    pub fn new(command: CommandKind, payload: Vec<u8>) -> Self {
        assert!(
            u16::try_from(payload.len()).is_ok(),
            "payload of {} bytes does not fit the length field",
            payload.len()
        );
        Self { command, payload }
    }

    /// START packet (payload `0x01`).
    pub fn start() -> Self {
        Self::new(CommandKind::Start, vec![CONTROL_PAYLOAD])
    }

    /// INFO packet carrying the firmware metadata.
    pub fn info(meta: &FirmwareMetadata) -> Self {
        Self::new(CommandKind::Info, meta.to_payload())
    }

    /// DATA packet carrying one firmware chunk.
    ///
    /// # Panics
    ///
    /// Panics if `chunk` is longer than [`DATA_MAX_SIZE`].
    pub fn firmware_data(chunk: &[u8]) -> Self {
        assert!(
            chunk.len() <= DATA_MAX_SIZE,
            "chunk of {} bytes exceeds the {DATA_MAX_SIZE}-byte limit",
            chunk.len()
        );
        Self::new(CommandKind::FirmwareData, chunk.to_vec())
    }

    /// STOP packet (payload `0x01`).
    pub fn stop() -> Self {
        Self::new(CommandKind::Stop, vec![CONTROL_PAYLOAD])
    }

    /// Device acknowledgement frame: a single status byte.
    ///
    /// The host never sends these; they are what the bootloader replies with.
    pub fn response(command: CommandKind, status: u8) -> Self {
        Self::new(command, vec![status])
    }

    /// Command carried by this packet.
    pub fn command(&self) -> CommandKind {
        self.command
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes covered by the checksum: `CMD | LEN_LO | LEN_HI | PAYLOAD`.
    #[allow(clippy::cast_possible_truncation)]
    fn checked_region(&self) -> Vec<u8> {
        // Length fits u16, checked in `new`.
        let len = self
            .payload
            .len() as u16;
        let mut region = Vec::with_capacity(3 + self.payload.len());
        region.push(self.command.code());
        region.extend_from_slice(&len.to_le_bytes());
        region.extend_from_slice(&self.payload);
        region
    }

    /// Checksum written into the frame.
    pub fn checksum(&self) -> u16 {
        crc16_ccitt(&self.checked_region())
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Build the complete frame bytes.
    pub fn build(&self) -> Vec<u8> {
        let region = self.checked_region();
        let crc = crc16_ccitt(&region);

        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(MARK_START);
        buf.extend_from_slice(&region);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.push(MARK_END);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trailer_crc(frame: &[u8]) -> u16 {
        let n = frame.len();
        u16::from_le_bytes([frame[n - 3], frame[n - 2]])
    }

    fn length_field(frame: &[u8]) -> usize {
        usize::from(u16::from_le_bytes([frame[2], frame[3]]))
    }

    #[test]
    fn test_start_frame_bytes() {
        let frame = Packet::start().build();
        assert_eq!(frame, [0x2A, 0x01, 0x01, 0x00, 0x01, 0x65, 0xD5, 0x23]);
    }

    #[test]
    fn test_stop_frame_bytes() {
        let frame = Packet::stop().build();
        assert_eq!(frame, [0x2A, 0x04, 0x01, 0x00, 0x01, 0x20, 0x69, 0x23]);
    }

    #[test]
    fn test_info_payload_layout() {
        let meta = FirmwareMetadata {
            size: 0x0001_2345,
            fw_type: FirmwareType::App,
            crc: 0xBEEF,
            version: 0x3A67,
        };
        assert_eq!(
            meta.to_payload(),
            [0x45, 0x23, 0x01, 0x00, 0x01, 0xEF, 0xBE, 0x67, 0x3A]
        );

        let frame = Packet::info(&meta).build();
        assert_eq!(frame.len(), FRAME_OVERHEAD + INFO_PAYLOAD_LEN);
        assert_eq!(frame[1], CommandKind::Info.code());
        assert_eq!(length_field(&frame), INFO_PAYLOAD_LEN);
        assert_eq!(&frame[4..13], meta.to_payload().as_slice());
    }

    #[test]
    fn test_bootloader_type_code() {
        let meta = FirmwareMetadata {
            size: 1,
            fw_type: FirmwareType::Bootloader,
            crc: 0,
            version: 0,
        };
        assert_eq!(meta.to_payload()[4], 0x02);
    }

    #[test]
    fn test_data_frame_full_chunk() {
        let chunk: Vec<u8> = (0..DATA_MAX_SIZE as u8).collect();
        let frame = Packet::firmware_data(&chunk).build();

        assert_eq!(frame[0], MARK_START);
        assert_eq!(frame[1], 0x03);
        assert_eq!(frame[2], 0x80);
        assert_eq!(frame[3], 0x00);
        assert_eq!(&frame[4..4 + DATA_MAX_SIZE], chunk.as_slice());
        assert_eq!(*frame.last().unwrap(), MARK_END);
        assert_eq!(frame.len(), FRAME_OVERHEAD + DATA_MAX_SIZE);
    }

    #[test]
    fn test_data_frame_empty_chunk() {
        let frame = Packet::firmware_data(&[]).build();
        assert_eq!(frame.len(), FRAME_OVERHEAD);
        assert_eq!(length_field(&frame), 0);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_data_frame_oversized_chunk_panics() {
        let _ = Packet::firmware_data(&[0u8; DATA_MAX_SIZE + 1]);
    }

    #[test]
    fn test_length_and_checksum_fields_match_content() {
        let meta = FirmwareMetadata {
            size: 300,
            fw_type: FirmwareType::App,
            crc: 0x1234,
            version: 7,
        };
        let packets = [
            Packet::start(),
            Packet::info(&meta),
            Packet::firmware_data(&[0xAA; 44]),
            Packet::firmware_data(&[0x55; DATA_MAX_SIZE]),
            Packet::stop(),
        ];

        for packet in &packets {
            let frame = packet.build();
            let len = length_field(&frame);
            assert_eq!(len, packet.payload().len());
            assert_eq!(frame.len(), FRAME_OVERHEAD + len);
            assert_eq!(trailer_crc(&frame), crc16_ccitt(&frame[1..4 + len]));
            assert_eq!(trailer_crc(&frame), packet.checksum());
        }
    }

    #[test]
    fn test_response_frame_shape() {
        let frame = Packet::response(CommandKind::FirmwareData, 0x00).build();
        assert_eq!(frame.len(), 8);
        assert_eq!(frame[1], 0x03);
        assert_eq!(frame[4], 0x00);
    }

    #[test]
    fn test_command_code_roundtrip() {
        for cmd in [
            CommandKind::Start,
            CommandKind::Info,
            CommandKind::FirmwareData,
            CommandKind::Stop,
        ] {
            assert_eq!(CommandKind::try_from(cmd.code()), Ok(cmd));
        }
        assert_eq!(CommandKind::try_from(0x05), Err(0x05));
        assert_eq!(CommandKind::try_from(0x00), Err(0x00));
    }

    #[test]
    fn test_firmware_type_codes() {
        assert_eq!(FirmwareType::App.code(), 0x01);
        assert_eq!(FirmwareType::Bootloader.code(), 0x02);
        assert_eq!(FirmwareType::try_from(0x02), Ok(FirmwareType::Bootloader));
        assert_eq!(FirmwareType::try_from(0x09), Err(0x09));
        assert_eq!(FirmwareType::default(), FirmwareType::App);
    }

    #[test]
    fn test_command_display() {
        assert_eq!(CommandKind::Start.to_string(), "START");
        assert_eq!(CommandKind::FirmwareData.to_string(), "DATA");
    }
}
