//! # etxota
//!
//! Host side of the ETX OTA serial bootloader protocol.
//!
//! This crate pushes a raw firmware image to a microcontroller bootloader over
//! a serial line, including:
//!
//! - Frame encoding for the START / INFO / DATA / STOP commands
//! - CRC-16/CCITT checksums
//! - Response decoding with lenient or strict validation
//! - A stepwise update session with timeouts, retries and progress reporting
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux, macOS, Windows via the `serialport` crate
//!
//! Any other transport can be plugged in by implementing [`Port`].
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use etxota::{FirmwareImage, FirmwareType, SessionConfig, UpdateSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("app.bin")?;
//!     let metadata = image.metadata(FirmwareType::App, etxota::DEFAULT_FW_VERSION);
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut port = etxota::NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!         let result = UpdateSession::new(&mut port, image.data(), metadata)
//!             .with_config(SessionConfig::default())
//!             .run(|done, total| println!("{done}/{total} bytes"));
//!         println!("{result}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled while waiting for responses.
///
/// The checker should return `true` when the current update should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    error::{Error, ParseError, Result},
    image::{DEFAULT_FW_VERSION, FirmwareImage},
    port::{DEFAULT_BAUD, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{
        AckStatus, CommandKind, DATA_MAX_SIZE, FirmwareMetadata, FirmwareType, NackCode, Packet,
        Response, Validation, crc16_ccitt, parse_response, parse_responses,
    },
    session::{
        AbortReason, SessionConfig, SessionResult, SessionState, UpdateSession,
        run_update_session,
    },
};
