//! Scripted in-memory port for session tests.
//!
//! Every frame written to the port consumes one scripted [`Reply`]; once the
//! script runs dry the port either acknowledges everything or stays silent.

use {
    crate::{
        error::Result,
        port::Port,
        protocol::packet::{CommandKind, Packet},
    },
    std::{
        collections::VecDeque,
        io::{self, Read, Write},
    },
};

/// What the simulated bootloader does after a frame is written.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Acknowledge the command just received.
    Ack,
    /// Reject the command just received with the given code.
    Nack(u8),
    /// Acknowledge a different command than the one received.
    AckFor(CommandKind),
    /// Send these bytes verbatim.
    Raw(Vec<u8>),
    /// Send several bursts separated by quiet gaps.
    Bursts(Vec<Vec<u8>>),
    /// Send nothing.
    Silence,
}

pub(crate) struct MockPort {
    incoming: VecDeque<Vec<u8>>,
    gap: bool,
    script: VecDeque<Reply>,
    auto_ack: bool,
    writes: Vec<Vec<u8>>,
    fail_write_at: Option<usize>,
    closed: bool,
}

impl MockPort {
    /// A device that acknowledges every frame.
    pub(crate) fn acking() -> Self {
        Self {
            incoming: VecDeque::new(),
            gap: false,
            script: VecDeque::new(),
            auto_ack: true,
            writes: Vec::new(),
            fail_write_at: None,
            closed: false,
        }
    }

    /// A device that never answers.
    pub(crate) fn silent() -> Self {
        Self {
            auto_ack: false,
            ..Self::acking()
        }
    }

    /// Replies consumed one per written frame before falling back to auto-ack.
    pub(crate) fn with_script(script: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            script: script
                .into_iter()
                .collect(),
            ..Self::acking()
        }
    }

    /// Make the `index`-th write (0-based) fail with a broken pipe.
    pub(crate) fn fail_write_at(mut self, index: usize) -> Self {
        self.fail_write_at = Some(index);
        self
    }

    /// Queue one burst as if the device had sent it unprompted.
    pub(crate) fn push_incoming(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.incoming
                .push_back(bytes.to_vec());
        }
    }

    /// Every frame written so far.
    pub(crate) fn writes(&self) -> &[Vec<u8>] {
        &self.writes
    }

    /// Command codes of every frame written so far.
    pub(crate) fn written_commands(&self) -> Vec<u8> {
        self.writes
            .iter()
            .map(|w| w[1])
            .collect()
    }

    /// Payload lengths of the DATA frames written so far.
    pub(crate) fn data_lengths(&self) -> Vec<usize> {
        self.writes
            .iter()
            .filter(|w| w[1] == CommandKind::FirmwareData.code())
            .map(|w| usize::from(u16::from_le_bytes([w[2], w[3]])))
            .collect()
    }

    fn respond(&mut self, frame: &[u8]) {
        let reply = self
            .script
            .pop_front()
            .unwrap_or(if self.auto_ack {
                Reply::Ack
            } else {
                Reply::Silence
            });

        let received = CommandKind::try_from(frame[1]).unwrap_or(CommandKind::Start);
        match reply {
            Reply::Ack => self.push_incoming(&Packet::response(received, 0x00).build()),
            Reply::Nack(code) => self.push_incoming(&Packet::response(received, code).build()),
            Reply::AckFor(other) => self.push_incoming(&Packet::response(other, 0x00).build()),
            Reply::Raw(bytes) => self.push_incoming(&bytes),
            Reply::Bursts(bursts) => {
                for burst in bursts {
                    self.push_incoming(&burst);
                }
            },
            Reply::Silence => {},
        }
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.gap {
            self.gap = false;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let Some(front) = self
            .incoming
            .front_mut()
        else {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        };
        let n = buf
            .len()
            .min(front.len());
        buf[..n].copy_from_slice(&front[..n]);
        front.drain(..n);
        if front.is_empty() {
            self.incoming
                .pop_front();
            // A drained burst is followed by one quiet read.
            self.gap = true;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.fail_write_at == Some(self.writes.len()) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "line dropped"));
        }
        self.writes
            .push(buf.to_vec());
        self.respond(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn clear_buffers(&mut self) -> Result<()> {
        self.incoming
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
