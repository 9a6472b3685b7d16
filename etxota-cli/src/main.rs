//! etxota CLI - Command-line tool for ETX OTA firmware updates.
//!
//! ## Features
//!
//! - Push a raw firmware image to an ETX OTA bootloader over a serial line
//! - Inspect an image (size, CRC, chunk count, INFO packet) without a device
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use etxota::{AbortReason, FirmwareType};
use log::debug;
use serde::{Deserialize, Serialize};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, select_serial_port};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if progress bars and symbols should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// etxota - Firmware updates over the ETX OTA serial bootloader protocol.
///
/// Environment variables:
///   ETXOTA_PORT              - Default serial port
///   ETXOTA_BAUD              - Default baud rate (default: 115200)
///   ETXOTA_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "etxota")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "ETXOTA_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "ETXOTA_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ETXOTA_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Firmware image type announced in the INFO packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum FwTypeArg {
    /// Application image (0x01).
    App,
    /// Bootloader image (0x02).
    Bootloader,
}

impl From<FwTypeArg> for FirmwareType {
    fn from(arg: FwTypeArg) -> Self {
        match arg {
            FwTypeArg::App => FirmwareType::App,
            FwTypeArg::Bootloader => FirmwareType::Bootloader,
        }
    }
}

/// Options of the `flash` command.
#[derive(Args, Debug)]
pub(crate) struct FlashArgs {
    /// Path to the raw firmware binary.
    firmware: PathBuf,

    /// Firmware type [default: app].
    #[arg(long, value_enum)]
    fw_type: Option<FwTypeArg>,

    /// Firmware version, hexadecimal [default: 0x3A67].
    #[arg(long, value_parser = parse_hex_u16)]
    fw_version: Option<u16>,

    /// Wait bound per acknowledgement in milliseconds (0 waits forever) [default: 5000].
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Retransmissions per packet after a NACK or timeout [default: 0].
    #[arg(long)]
    retries: Option<u32>,

    /// Verify markers, length and CRC of every response.
    #[arg(long)]
    strict: bool,

    /// Wait for the device to acknowledge STOP.
    #[arg(long)]
    await_stop_ack: bool,

    /// Record every DATA payload to this file.
    #[arg(long, value_name = "PATH")]
    payload_log: Option<PathBuf>,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Flash a raw firmware image.
    Flash(FlashArgs),

    /// Show information about a firmware file.
    Info {
        /// Path to the raw firmware binary.
        firmware: PathBuf,

        /// Firmware type used for the INFO packet [default: app].
        #[arg(long, value_enum)]
        fw_type: Option<FwTypeArg>,

        /// Firmware version used for the INFO packet, hexadecimal [default: 0x3A67].
        #[arg(long, value_parser = parse_hex_u16)]
        fw_version: Option<u16>,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a hexadecimal u16 (supports 0x prefix and underscores).
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let s = s
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let s: String = s
        .chars()
        .filter(|c| *c != '_')
        .collect();
    u16::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex version: {e}"))
}

/// Failure classes of the exit-code contract.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or unusable interactive setup (exit 2).
    #[error("{0}")]
    Usage(String),
    /// Configuration file could not be loaded (exit 3).
    #[error("{0}")]
    Config(String),
    /// Serial port missing (exit 4).
    #[error("{0}")]
    DeviceNotFound(String),
    /// Cancelled by the user (exit 130).
    #[error("{0}")]
    Cancelled(String),
    /// Update session ended early (exit 1).
    #[error("Firmware update aborted: {0}")]
    Aborted(AbortReason),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::DeviceNotFound(_) => 4,
            Self::Cancelled(_) | Self::Aborted(AbortReason::Interrupted) => 130,
            Self::Aborted(_) => 1,
        }
    }
}

/// Map an error chain onto the exit-code contract.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return cli_err.exit_code();
        }
        if let Some(lib_err) = cause.downcast_ref::<etxota::Error>() {
            return match lib_err {
                etxota::Error::DeviceNotFound => 4,
                etxota::Error::Interrupted => 130,
                _ => 1,
            };
        }
    }
    1
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "etxota v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    etxota::set_interrupt_checker(was_interrupted);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Flash(args) => {
            let config = load_config(cli)?;
            commands::flash::cmd_flash(cli, &config, args)
        },
        Commands::Info {
            firmware,
            fw_type,
            fw_version,
            json,
        } => {
            let config = load_config(cli)?;
            let fw_type = fw_type
                .or(config.firmware.fw_type)
                .map_or(FirmwareType::App, FirmwareType::from);
            let version = fw_version
                .or(config.firmware.version)
                .unwrap_or(etxota::DEFAULT_FW_VERSION);
            commands::info::cmd_info(firmware, fw_type, version, *json)
        },
        Commands::ListPorts { json } => {
            // Loaded for its diagnostics only.
            let _ = load_config(cli)?;
            commands::info::cmd_list_ports(*json)
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

/// Load configuration from `--config` or the default locations.
fn load_config(cli: &Cli) -> Result<Config> {
    match cli.config_path {
        Some(ref path) => Config::load_from_path(path),
        None => Ok(Config::load()),
    }
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli
            .port
            .clone(),
        non_interactive: cli.non_interactive,
    };
    select_serial_port(&options, config)
}
