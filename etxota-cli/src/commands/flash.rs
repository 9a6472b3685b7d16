//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use etxota::session::DEFAULT_RETRY_BACKOFF;
use etxota::{
    AbortReason, DEFAULT_BAUD, DEFAULT_FW_VERSION, FirmwareImage, FirmwareType, NativePort, Port,
    SerialConfig, SessionConfig, SessionResult, UpdateSession, Validation,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use std::fs::File;
use std::io::BufWriter;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, FlashArgs, get_port, use_fancy_output, was_interrupted};

fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("Interrupted".to_string()).into())
    } else {
        Ok(())
    }
}

/// Session tuning from flags, falling back to the configuration file.
pub(crate) fn session_config(args: &FlashArgs, config: &Config) -> SessionConfig {
    let settings = &config.session;

    let response_timeout = match args
        .timeout_ms
        .or(settings.timeout_ms)
    {
        Some(0) => None,
        Some(ms) => Some(Duration::from_millis(ms)),
        None => SessionConfig::default().response_timeout,
    };
    let retries = args
        .retries
        .or(settings.retries)
        .unwrap_or(0);
    let backoff = settings
        .retry_backoff_ms
        .map_or(DEFAULT_RETRY_BACKOFF, Duration::from_millis);
    let validation = if args.strict || settings.strict {
        Validation::Strict
    } else {
        Validation::Lenient
    };

    SessionConfig::default()
        .with_response_timeout(response_timeout)
        .with_retries(retries, backoff)
        .with_validation(validation)
        .with_await_stop_ack(args.await_stop_ack || settings.await_stop_ack)
        .with_max_image_size(settings.max_image_size)
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, config: &Config, args: &FlashArgs) -> Result<()> {
    if !cli.quiet {
        eprintln!(
            "{} Loading firmware: {}",
            style("📦").cyan(),
            args.firmware
                .display()
        );
    }

    let image = FirmwareImage::from_file(&args.firmware).with_context(|| {
        format!(
            "Failed to load firmware {}",
            args.firmware
                .display()
        )
    })?;

    let fw_type = args
        .fw_type
        .or(config.firmware.fw_type)
        .map_or(FirmwareType::App, FirmwareType::from);
    let version = args
        .fw_version
        .or(config.firmware.version)
        .unwrap_or(DEFAULT_FW_VERSION);
    let metadata = image.metadata(fw_type, version);

    if !cli.quiet {
        eprintln!(
            "{} {} bytes in {} packets, CRC 0x{:04X}, type {fw_type:?}, version 0x{version:04X}",
            style("ℹ").blue(),
            image.size(),
            image.chunk_count(),
            metadata.crc
        );
    }

    let session_config = session_config(args, config);

    let payload_log = match args.payload_log {
        Some(ref path) => Some(BufWriter::new(File::create(path).with_context(|| {
            format!("Failed to create payload log {}", path.display())
        })?)),
        None => None,
    };

    // Get port
    let port_name = get_port(cli, config)?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    if !cli.quiet {
        eprintln!(
            "{} Using port {port_name} at {baud} baud",
            style("🔌").cyan()
        );
    }

    let mut port = match NativePort::open(&SerialConfig::new(&port_name, baud)) {
        Ok(port) => port,
        Err(etxota::Error::DeviceNotFound) => {
            return Err(CliError::DeviceNotFound(format!("Serial port not found: {port_name}")).into());
        },
        Err(e) => return Err(e).with_context(|| format!("Failed to open {port_name}")),
    };
    if let Err(err) = ensure_not_interrupted() {
        let _ = port.close();
        return Err(err);
    }

    // Create progress bar
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };
    pb.set_message("Flashing");

    let mut session = UpdateSession::new(&mut port, image.data(), metadata).with_config(session_config);
    if let Some(log) = payload_log {
        session = session.with_payload_log(log);
    }
    let result = session.run(|done, total| {
        if total > 0 {
            pb.set_position((done * 100 / total) as u64);
        }
    });
    drop(session);

    // Release the serial port on every path
    if let Err(e) = port.close() {
        warn!("Failed to close {port_name}: {e}");
    }

    match result {
        SessionResult::Completed => {
            pb.finish_with_message("Complete");
            if !cli.quiet {
                eprintln!(
                    "\n{} Firmware update successful",
                    style("🎉").green().bold()
                );
            }
            Ok(())
        },
        SessionResult::Aborted(AbortReason::Interrupted) => {
            pb.abandon_with_message("Interrupted");
            Err(CliError::Cancelled("Firmware update interrupted".to_string()).into())
        },
        SessionResult::Aborted(reason) => {
            pb.abandon_with_message("Aborted");
            Err(CliError::Aborted(reason).into())
        },
    }
}
