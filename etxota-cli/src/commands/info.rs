//! Firmware info and port listing command implementations.

use anyhow::{Context, Result};
use console::style;
use etxota::{FirmwareImage, FirmwareType, NativePortEnumerator, Packet, PortEnumerator};
use log::warn;
use std::path::Path;

use crate::serial::port_label;

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports().unwrap_or_else(|e| {
        warn!("Could not enumerate serial ports: {e}");
        Vec::new()
    });

    if json {
        println!("{}", serde_json::to_string_pretty(&ports)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports:")
            .bold()
            .underlined()
    );

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
    } else {
        for port in &ports {
            eprintln!("  {} {}", style("•").green(), port_label(port));
        }
    }

    Ok(())
}

/// Frame bytes as space-separated uppercase hex.
pub(crate) fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn fw_type_str(fw_type: FirmwareType) -> &'static str {
    match fw_type {
        FirmwareType::App => "app",
        FirmwareType::Bootloader => "bootloader",
    }
}

/// Info command implementation.
pub(crate) fn cmd_info(
    firmware: &Path,
    fw_type: FirmwareType,
    version: u16,
    json: bool,
) -> Result<()> {
    let image = FirmwareImage::from_file(firmware)
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;
    let metadata = image.metadata(fw_type, version);
    let info_packet = Packet::info(&metadata).build();

    if json {
        let info = serde_json::json!({
            "path": firmware.display().to_string(),
            "size": image.size(),
            "crc": format!("0x{:04X}", metadata.crc),
            "chunks": image.chunk_count(),
            "fw_type": fw_type_str(fw_type),
            "version": format!("0x{version:04X}"),
            "info_packet": hex_bytes(&info_packet),
        });
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Firmware Information")
            .bold()
            .underlined()
    );
    eprintln!("  File:        {}", firmware.display());
    eprintln!("  Size:        {} bytes", image.size());
    eprintln!("  CRC16:       0x{:04X}", metadata.crc);
    eprintln!("  Packets:     {}", image.chunk_count());
    eprintln!(
        "  Type:        {} (0x{:02X})",
        fw_type_str(fw_type),
        fw_type.code()
    );
    eprintln!("  Version:     0x{version:04X}");
    eprintln!(
        "  INFO frame:  {}",
        style(hex_bytes(&info_packet)).cyan()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_bytes() {
        assert_eq!(hex_bytes(&[]), "");
        assert_eq!(hex_bytes(&[0x2A, 0x01, 0x0F]), "2A 01 0F");
    }

    #[test]
    fn test_fw_type_str() {
        assert_eq!(fw_type_str(FirmwareType::App), "app");
        assert_eq!(fw_type_str(FirmwareType::Bootloader), "bootloader");
    }

    #[test]
    fn test_info_packet_for_known_image() {
        let image = FirmwareImage::from_bytes(b"123456789".to_vec()).unwrap();
        let frame = Packet::info(&image.metadata(FirmwareType::App, 0x3A67)).build();
        assert_eq!(
            hex_bytes(&frame),
            "2A 02 09 00 09 00 00 00 01 B1 29 67 3A CF 0A 23"
        );
    }

    #[test]
    fn test_cmd_info_missing_file() {
        let err = cmd_info(
            Path::new("/nonexistent/app.bin"),
            FirmwareType::App,
            0x3A67,
            true,
        )
        .unwrap_err();
        assert!(
            err.to_string()
                .contains("Failed to load firmware")
        );
    }
}
