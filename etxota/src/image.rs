//! Firmware image loading.
//!
//! A [`FirmwareImage`] is a raw binary as produced by the target's build, held
//! in memory for the duration of an update. The session borrows its bytes
//! read-only and slices them into chunks of at most
//! [`DATA_MAX_SIZE`](crate::protocol::packet::DATA_MAX_SIZE) bytes.

use {
    crate::{
        error::{Error, Result},
        protocol::{
            crc::crc16_ccitt,
            packet::{DATA_MAX_SIZE, FirmwareMetadata, FirmwareType},
        },
    },
    log::debug,
    std::{fs, path::Path},
};

/// Default firmware version written into the INFO packet.
pub const DEFAULT_FW_VERSION: u16 = 0x3A67;

/// Up to `len` bytes of `data` starting at `offset`, clamped to its end.
pub(crate) fn bytes_at(data: &[u8], offset: usize, len: usize) -> &[u8] {
    let start = offset.min(data.len());
    let end = start
        .saturating_add(len)
        .min(data.len());
    &data[start..end]
}

/// A firmware image ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    size: u32,
}

impl FirmwareImage {
    /// Load an image from a binary file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        debug!("Loaded {} ({} bytes)", path.display(), data.len());
        Self::from_bytes(data)
    }

    /// Wrap an in-memory image.
    ///
    /// The size field of the INFO packet is 32 bits wide, so larger images are
    /// rejected.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let size = u32::try_from(data.len()).map_err(|_| {
            Error::InvalidImage(format!(
                "{} bytes does not fit the 32-bit size field",
                data.len()
            ))
        })?;
        Ok(Self { data, size })
    }

    /// Image size in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Whether the image has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }

    /// Whole image.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Up to `len` bytes starting at `offset`, clamped to the end of the image.
    pub fn bytes_at(&self, offset: usize, len: usize) -> &[u8] {
        bytes_at(&self.data, offset, len)
    }

    /// CRC-16/CCITT over the whole image.
    pub fn crc(&self) -> u16 {
        crc16_ccitt(&self.data)
    }

    /// Number of DATA packets needed to send the image.
    pub fn chunk_count(&self) -> usize {
        self.data
            .len()
            .div_ceil(DATA_MAX_SIZE)
    }

    /// Metadata for the INFO packet.
    pub fn metadata(&self, fw_type: FirmwareType, version: u16) -> FirmwareMetadata {
        FirmwareMetadata {
            size: self.size,
            fw_type,
            crc: self.crc(),
            version,
        }
    }
}
