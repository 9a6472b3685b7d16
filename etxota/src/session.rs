//! Firmware update session.
//!
//! Drives one update attempt through the bootloader's command sequence:
//!
//! ```text
//! Idle ─START─> AwaitingStartAck ─INFO─> AwaitingInfoAck
//!                                              │
//!        ┌─────────────────────────────────────┘
//!        v
//! SendingData(off) ─DATA─> AwaitingDataAck(off, n) ─ACK─> SendingData(off + n)
//!        │                         │
//!        │ off == size             │ ACK and off + n == size
//!        v                         v
//!  AwaitingStopAck <──────────STOP─┘ ──> Completed
//! ```
//!
//! Exactly one packet is in flight at a time. Any NACK, timeout, malformed
//! response or transport failure ends the session in `Aborted`, after the
//! configured number of retransmissions has been spent.
//!
//! ## Example
//!
//! ```rust,no_run
//! use etxota::{FirmwareImage, FirmwareType, NativePort, SessionConfig, run_update_session};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("app.bin")?;
//!     let metadata = image.metadata(FirmwareType::App, 0x3A67);
//!
//!     let mut port = NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!     let result = run_update_session(
//!         &mut port,
//!         image.data(),
//!         metadata,
//!         SessionConfig::default(),
//!         |done, total| println!("{done}/{total}"),
//!     );
//!     println!("{result}");
//!     Ok(())
//! }
//! ```

use {
    crate::{
        error::{Error, ParseError, Result},
        image,
        port::Port,
        protocol::{
            packet::{CommandKind, DATA_MAX_SIZE, FirmwareMetadata, Packet},
            response::{AckStatus, NackCode, Validation, parse_responses},
        },
    },
    log::{debug, info, trace, warn},
    std::{
        fmt,
        io::Write,
        thread,
        time::{Duration, Instant},
    },
    thiserror::Error,
};

/// Default bound on the wait for a single acknowledgement.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between reads while the line is quiet.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause before retransmitting a rejected or unanswered packet.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bound on each acknowledgement wait; `None` waits forever.
    pub response_timeout: Option<Duration>,
    /// Pause between reads while waiting.
    pub poll_interval: Duration,
    /// Retransmissions allowed per packet after a NACK or timeout.
    pub max_retries: u32,
    /// Pause before each retransmission.
    pub retry_backoff: Duration,
    /// Response frame validation.
    pub validation: Validation,
    /// Consume the device's STOP acknowledgement before completing.
    pub await_stop_ack: bool,
    /// Refuse images larger than this many bytes.
    pub max_image_size: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            validation: Validation::Lenient,
            await_stop_ack: false,
            max_image_size: None,
        }
    }
}

impl SessionConfig {
    /// Set the acknowledgement wait bound (`None` = unbounded).
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the quiet-line poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Set the response validation mode.
    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }

    /// Wait for the STOP acknowledgement.
    #[must_use]
    pub fn with_await_stop_ack(mut self, await_stop_ack: bool) -> Self {
        self.await_stop_ack = await_stop_ack;
        self
    }

    /// Set the host-side image size limit.
    #[must_use]
    pub fn with_max_image_size(mut self, max: Option<u32>) -> Self {
        self.max_image_size = max;
        self
    }
}

/// Why a session ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    /// The device rejected a command.
    #[error("device rejected {command}: {code}")]
    Nack {
        /// Rejected command.
        command: CommandKind,
        /// Reported error code.
        code: NackCode,
    },

    /// No acknowledgement within the wait bound.
    #[error("no response to {command} within {after:?}")]
    Timeout {
        /// Command left unanswered.
        command: CommandKind,
        /// Wait bound that expired.
        after: Duration,
    },

    /// The device's reply could not be decoded.
    #[error("bad response: {0}")]
    Parse(ParseError),

    /// Reading from or writing to the port failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The image exceeds the configured limit.
    #[error("firmware size is too big: {size} bytes (limit {max})")]
    FirmwareTooLarge {
        /// Image size in bytes.
        size: u32,
        /// Configured limit in bytes.
        max: u32,
    },

    /// Image bytes and metadata disagree.
    #[error("invalid firmware image: {0}")]
    InvalidImage(String),

    /// Interrupted by the embedding application.
    #[error("interrupted")]
    Interrupted,
}

impl From<Error> for AbortReason {
    fn from(err: Error) -> Self {
        match err {
            Error::Nack { command, code } => Self::Nack { command, code },
            Error::Timeout { command, after } => Self::Timeout { command, after },
            Error::Parse(e) => Self::Parse(e),
            Error::FirmwareTooLarge { size, max } => Self::FirmwareTooLarge { size, max },
            Error::InvalidImage(msg) => Self::InvalidImage(msg),
            Error::Interrupted => Self::Interrupted,
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Position of a session in the update sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet.
    Idle,
    /// START sent.
    AwaitingStartAck,
    /// INFO sent.
    AwaitingInfoAck,
    /// Ready to send the chunk at `offset`.
    SendingData {
        /// Bytes acknowledged so far.
        offset: usize,
    },
    /// Chunk `[offset, offset + len)` sent.
    AwaitingDataAck {
        /// Start of the chunk in flight.
        offset: usize,
        /// Length of the chunk in flight.
        len: usize,
    },
    /// STOP sent.
    AwaitingStopAck,
    /// Every byte acknowledged and STOP sent.
    Completed,
    /// Session ended early.
    Aborted(AbortReason),
}

impl SessionState {
    /// Whether no further packets will be sent.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingStartAck => write!(f, "awaiting START ack"),
            Self::AwaitingInfoAck => write!(f, "awaiting INFO ack"),
            Self::SendingData { offset } => write!(f, "sending data at {offset}"),
            Self::AwaitingDataAck { offset, len } => {
                write!(f, "awaiting DATA ack for {len} bytes at {offset}")
            },
            Self::AwaitingStopAck => write!(f, "awaiting STOP ack"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

/// Outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionResult {
    /// Every byte acknowledged by the device.
    Completed,
    /// Session ended early.
    Aborted(AbortReason),
}

impl SessionResult {
    /// Whether the update completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for SessionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "firmware update successful"),
            Self::Aborted(reason) => write!(f, "firmware update aborted: {reason}"),
        }
    }
}

/// One firmware update attempt over a borrowed port.
pub struct UpdateSession<'a, P: Port> {
    port: &'a mut P,
    firmware: &'a [u8],
    metadata: FirmwareMetadata,
    config: SessionConfig,
    state: SessionState,
    acknowledged: usize,
    last_packet: Option<Packet>,
    payload_log: Option<Box<dyn Write + 'a>>,
}

impl<'a, P: Port> UpdateSession<'a, P> {
    /// Create a session for `firmware` described by `metadata`.
    pub fn new(port: &'a mut P, firmware: &'a [u8], metadata: FirmwareMetadata) -> Self {
        Self {
            port,
            firmware,
            metadata,
            config: SessionConfig::default(),
            state: SessionState::Idle,
            acknowledged: 0,
            last_packet: None,
            payload_log: None,
        }
    }

    /// Use a custom configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Record every transmitted DATA payload to `sink`.
    ///
    /// Each byte is written as decimal followed by `,`; each packet ends
    /// with a newline.
    #[must_use]
    pub fn with_payload_log<W: Write + 'a>(mut self, sink: W) -> Self {
        self.payload_log = Some(Box::new(sink));
        self
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Bytes of the image acknowledged by the device.
    pub fn acknowledged(&self) -> usize {
        self.acknowledged
    }

    /// Image size in bytes.
    pub fn total(&self) -> usize {
        self.firmware
            .len()
    }

    /// Run until `Completed` or `Aborted`.
    ///
    /// `progress` receives `(acknowledged, total)` after every acknowledged
    /// DATA packet.
    pub fn run<F>(&mut self, mut progress: F) -> SessionResult
    where
        F: FnMut(usize, usize),
    {
        info!(
            "Starting update on {}: {} bytes in {} chunks, CRC 0x{:04X}",
            self.port.name(),
            self.firmware.len(),
            self.firmware.len().div_ceil(DATA_MAX_SIZE),
            self.metadata.crc
        );

        loop {
            match &self.state {
                SessionState::Completed => {
                    info!("Firmware update successful");
                    return SessionResult::Completed;
                },
                SessionState::Aborted(reason) => return SessionResult::Aborted(reason.clone()),
                _ => {
                    self.step(&mut progress);
                },
            }
        }
    }

    /// Perform one transition and return the new state.
    ///
    /// Terminal states are left unchanged.
    pub fn step<F>(&mut self, progress: &mut F) -> &SessionState
    where
        F: FnMut(usize, usize),
    {
        if !self.state.is_terminal() {
            let next = match self.advance(progress) {
                Ok(next) => next,
                Err(e) => SessionState::Aborted(AbortReason::from(e)),
            };
            debug!("{} -> {}", self.state, next);
            if let SessionState::Aborted(reason) = &next {
                warn!("Update aborted after {} bytes: {reason}", self.acknowledged);
            }
            self.state = next;
        }
        &self.state
    }

    fn advance<F>(&mut self, progress: &mut F) -> Result<SessionState>
    where
        F: FnMut(usize, usize),
    {
        match self.state.clone() {
            SessionState::Idle => {
                self.preflight()?;
                self.transmit(Packet::start())?;
                Ok(SessionState::AwaitingStartAck)
            },
            SessionState::AwaitingStartAck => {
                self.await_ack(CommandKind::Start)?;
                self.transmit(Packet::info(&self.metadata))?;
                Ok(SessionState::AwaitingInfoAck)
            },
            SessionState::AwaitingInfoAck => {
                self.await_ack(CommandKind::Info)?;
                Ok(SessionState::SendingData { offset: 0 })
            },
            SessionState::SendingData { offset } => {
                let total = self.total();
                if offset >= total {
                    return self.send_stop();
                }
                let chunk = image::bytes_at(self.firmware, offset, DATA_MAX_SIZE);
                let len = chunk.len();
                self.transmit(Packet::firmware_data(chunk))?;
                Ok(SessionState::AwaitingDataAck { offset, len })
            },
            SessionState::AwaitingDataAck { offset, len } => {
                self.await_ack(CommandKind::FirmwareData)?;
                let total = self.total();
                self.acknowledged = offset + len;
                progress(self.acknowledged, total);
                if self.acknowledged == total {
                    self.send_stop()
                } else {
                    Ok(SessionState::SendingData {
                        offset: self.acknowledged,
                    })
                }
            },
            SessionState::AwaitingStopAck => {
                if self.config.await_stop_ack {
                    self.await_ack(CommandKind::Stop)?;
                }
                Ok(SessionState::Completed)
            },
            terminal @ (SessionState::Completed | SessionState::Aborted(_)) => Ok(terminal),
        }
    }

    /// Checks done before anything goes on the wire.
    fn preflight(&mut self) -> Result<()> {
        let size = u32::try_from(self.firmware.len()).map_err(|_| {
            Error::InvalidImage(format!(
                "{} bytes does not fit the 32-bit size field",
                self.firmware.len()
            ))
        })?;

        if size != self.metadata.size {
            return Err(Error::InvalidImage(format!(
                "metadata announces {} bytes but the image has {size}",
                self.metadata.size
            )));
        }

        if let Some(max) = self.config.max_image_size {
            if size > max {
                return Err(Error::FirmwareTooLarge { size, max });
            }
        }

        Ok(())
    }

    fn send_stop(&mut self) -> Result<SessionState> {
        info!("All {} bytes acknowledged, sending STOP", self.total());
        self.transmit(Packet::stop())?;
        Ok(SessionState::AwaitingStopAck)
    }

    fn transmit(&mut self, packet: Packet) -> Result<()> {
        // Late replies to an earlier send must not answer this packet.
        self.port.clear_buffers()?;

        let frame = packet.build();
        trace!("TX {} ({} bytes): {frame:02X?}", packet.command(), frame.len());

        if packet.command() == CommandKind::FirmwareData {
            self.log_payload(packet.payload());
        }

        self.last_packet = Some(packet);
        self.port.write_all_bytes(&frame)
    }

    fn log_payload(&mut self, payload: &[u8]) {
        let Some(sink) = self.payload_log.as_mut() else {
            return;
        };

        let mut line: String = payload
            .iter()
            .map(|b| format!("{b},"))
            .collect();
        line.push('\n');

        if let Err(e) = sink.write_all(line.as_bytes()) {
            warn!("Payload log write failed, disabling it: {e}");
            self.payload_log = None;
        }
    }

    /// Wait for `command`'s acknowledgement, retransmitting per the retry policy.
    fn await_ack(&mut self, command: CommandKind) -> Result<()> {
        let mut attempt = 0;
        loop {
            let failure = match self.wait_response(command) {
                Ok(AckStatus::Ack) => return Ok(()),
                Ok(AckStatus::Nack(code)) => Error::Nack { command, code },
                Err(e @ Error::Timeout { .. }) => e,
                Err(e) => return Err(e),
            };

            if attempt >= self.config.max_retries {
                return Err(failure);
            }
            attempt += 1;
            warn!(
                "{failure}; retransmitting {command} (attempt {attempt}/{})",
                self.config.max_retries
            );
            thread::sleep(self.config.retry_backoff);

            if let Some(packet) = self
                .last_packet
                .clone()
            {
                self.transmit(packet)?;
            }
        }
    }

    /// Block until a response to `command` is decoded or the wait bound expires.
    ///
    /// Responses to other commands are ignored.
    fn wait_response(&mut self, command: CommandKind) -> Result<AckStatus> {
        let start = Instant::now();

        loop {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            let raw = self.port.read_available()?;
            if !raw.is_empty() {
                trace!("RX ({} bytes): {raw:02X?}", raw.len());
                match parse_responses(&raw, self.config.validation) {
                    Ok(responses) => {
                        for response in responses {
                            if response.command == command {
                                debug!("{command} -> {:?}", response.status);
                                return Ok(response.status);
                            }
                            debug!(
                                "Ignoring {} response while awaiting {command}",
                                response.command
                            );
                        }
                    },
                    Err(ParseError::UnknownCommand(code)) => {
                        debug!("Ignoring response with unknown command 0x{code:02X}");
                    },
                    Err(e) => return Err(e.into()),
                }
            }

            if let Some(after) = self.config.response_timeout {
                if start.elapsed() >= after {
                    return Err(Error::Timeout { command, after });
                }
            }

            if raw.is_empty() {
                thread::sleep(self.config.poll_interval);
            }
        }
    }
}

/// Run a complete update session over `port`.
///
/// The port stays owned by the caller, who opens it before and closes it
/// after, whatever the outcome.
pub fn run_update_session<P, F>(
    port: &mut P,
    firmware: &[u8],
    metadata: FirmwareMetadata,
    config: SessionConfig,
    progress: F,
) -> SessionResult
where
    P: Port,
    F: FnMut(usize, usize),
{
    UpdateSession::new(port, firmware, metadata)
        .with_config(config)
        .run(progress)
}
