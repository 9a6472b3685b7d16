//! Interactive serial port selection.
//!
//! Resolution order:
//! - `--port` / `ETXOTA_PORT`
//! - `connection.port` from the configuration file
//! - the only detected port
//! - an interactive prompt (refused in non-interactive mode)

use anyhow::Result;
use dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme};
use etxota::{NativePortEnumerator, PortEnumerator, PortInfo};
use log::{debug, info};
use std::io::IsTerminal;

use crate::{CliError, config::Config};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<String> {
    // If port explicitly specified, use it
    if let Some(port_name) = &options.port {
        return Ok(port_name.clone());
    }

    // If port in config, use it
    if let Some(port_name) = &config
        .connection
        .port
    {
        debug!("Using port from config: {port_name}");
        return Ok(port_name.clone());
    }

    let ports = NativePortEnumerator::list_ports()?;
    choose_port(ports, options.non_interactive)
}

/// Pick one of the detected ports.
fn choose_port(mut ports: Vec<PortInfo>, non_interactive: bool) -> Result<String> {
    match ports.len() {
        0 => Err(CliError::DeviceNotFound(
            "No serial ports found. Connect the device or pass --port".to_string(),
        )
        .into()),
        1 => {
            let name = ports
                .swap_remove(0)
                .name;
            info!("Auto-selected port: {name}");
            Ok(name)
        },
        _ if non_interactive => Err(CliError::Usage(format!(
            "Found multiple serial ports ({}); specify one with --port",
            ports
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
        .into()),
        _ => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "Multiple serial ports found and no terminal to prompt on; specify one with --port"
                .to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("Port selection prompt failed: {io_err}")).into()
            }
        },
    }
}

fn select_port_interactive(ports: Vec<PortInfo>) -> Result<String> {
    let items: Vec<String> = ports
        .iter()
        .map(port_label)
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .map(|p| p.name)
            .ok_or_else(|| CliError::Usage("Invalid port selection".to_string()).into()),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// One-line description of a port for prompts and listings.
pub(crate) fn port_label(port: &PortInfo) -> String {
    let mut label = port
        .name
        .clone();
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        label.push_str(&format!(" ({vid:04X}:{pid:04X})"));
    }
    if let Some(product) = port
        .product
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        label.push_str(&format!(" - {product}"));
    }
    label
}
