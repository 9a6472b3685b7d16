//! Configuration file support for etxota.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ETXOTA_*)
//! 3. Local config file (./etxota.toml)
//! 4. Global config file (~/.config/etxota/config.toml)
//!
//! `--config <PATH>` replaces 3 and 4 with a single file.

use anyhow::Result;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{CliError, FwTypeArg};

/// Local configuration file name.
const LOCAL_CONFIG: &str = "etxota.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Update session tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Acknowledgement wait bound in milliseconds; 0 waits forever.
    pub timeout_ms: Option<u64>,
    /// Retransmissions per packet.
    pub retries: Option<u32>,
    /// Pause before each retransmission in milliseconds.
    pub retry_backoff_ms: Option<u64>,
    /// Verify every response frame.
    #[serde(default)]
    pub strict: bool,
    /// Wait for the STOP acknowledgement.
    #[serde(default)]
    pub await_stop_ack: bool,
    /// Refuse images larger than this many bytes.
    pub max_image_size: Option<u32>,
}

/// Firmware defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmwareSettings {
    /// Firmware type announced in INFO.
    pub fw_type: Option<FwTypeArg>,
    /// Firmware version announced in INFO.
    pub version: Option<u16>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Session configuration.
    #[serde(default)]
    pub session: SessionSettings,
    /// Firmware configuration.
    #[serde(default)]
    pub firmware: FirmwareSettings,
}

impl Config {
    /// Load configuration from all available sources.
    ///
    /// Unreadable files are reported and skipped.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike [`Config::load`], a missing or invalid file is an error.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "etxota").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Connection
        if other
            .connection
            .port
            .is_some()
        {
            self.connection.port = other.connection.port;
        }
        if other
            .connection
            .baud
            .is_some()
        {
            self.connection.baud = other.connection.baud;
        }

        // Session
        let session = other.session;
        if session.timeout_ms.is_some() {
            self.session.timeout_ms = session.timeout_ms;
        }
        if session.retries.is_some() {
            self.session.retries = session.retries;
        }
        if session.retry_backoff_ms.is_some() {
            self.session.retry_backoff_ms = session.retry_backoff_ms;
        }
        if session.strict {
            self.session.strict = true;
        }
        if session.await_stop_ack {
            self.session.await_stop_ack = true;
        }
        if session.max_image_size.is_some() {
            self.session.max_image_size = session.max_image_size;
        }

        // Firmware
        if other
            .firmware
            .fw_type
            .is_some()
        {
            self.firmware.fw_type = other.firmware.fw_type;
        }
        if other
            .firmware
            .version
            .is_some()
        {
            self.firmware.version = other.firmware.version;
        }
    }
}
