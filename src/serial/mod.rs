//! # Serial Gateway Link
//!
//! Reads the newline framed text stream printed by the radio gateway.
//!
//! [`LineAssembler`] turns arbitrary byte chunks into complete lines and is
//! independent of any hardware. [`SerialLineSource`] wraps a `serialport`
//! handle behind the [`LineSource`] trait so the bridge loop can be driven
//! by a mock in tests.
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! ```

use crate::logutil::hex_snippet;
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use thiserror::Error;

/// Lines longer than this without a newline are treated as line noise and dropped.
pub const MAX_LINE_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("Failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Serial read error: {0}")]
    Read(#[from] std::io::Error),

    #[error("Cannot decode data: non-ASCII input ({preview})")]
    NotAscii { preview: String },

    #[error("Serial support not compiled in (enable the 'serial' feature)")]
    Unsupported,
}

/// Source of raw gateway lines.
pub trait LineSource {
    /// Next complete line (without the terminator), or `None` when nothing is waiting.
    /// Must not block for longer than the port read timeout.
    fn poll_line(&mut self) -> Result<Option<Vec<u8>>, SerialError>;
}

/// Incremental newline splitter.
#[derive(Debug)]
pub struct LineAssembler {
    buf: BytesMut,
    /// Set after an over-long line was dropped; bytes are skipped up to the next newline.
    discarding: bool,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAssembler {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            discarding: false,
        }
    }

    /// Push bytes, returning any completed lines with `\r\n` / `\n` removed.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            lines.push(line.to_vec());
        }
        if self.buf.len() > MAX_LINE_LEN {
            log::warn!(
                "Dropping {} bytes of unterminated serial input: {}",
                self.buf.len(),
                hex_snippet(&self.buf, 32)
            );
            self.buf.advance(self.buf.len());
            self.discarding = true;
        }
        lines
    }

    /// Bytes held while waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Decode a gateway line. The gateway only prints ASCII; anything else is line noise.
pub fn decode_line(raw: &[u8]) -> Result<String, SerialError> {
    if !raw.is_ascii() {
        return Err(SerialError::NotAscii {
            preview: hex_snippet(raw, 32),
        });
    }
    // ASCII is always valid UTF-8.
    Ok(String::from_utf8_lossy(raw).into_owned())
}

/// [`LineSource`] backed by a real serial port.
pub struct SerialLineSource {
    port_name: String,
    #[cfg(feature = "serial")]
    port: Box<dyn serialport::SerialPort>,
    assembler: LineAssembler,
    ready: VecDeque<Vec<u8>>,
}

impl SerialLineSource {
    /// Open the port with the gateway's settings: 8 data bits, no parity, 1 stop bit.
    #[cfg(feature = "serial")]
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, SerialError> {
        use std::time::Duration;

        log::info!(
            "Opening serial port {} at {} baud",
            port_name,
            baud_rate
        );
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_secs(2))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|e| SerialError::Open {
                port: port_name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            port_name: port_name.to_string(),
            port,
            assembler: LineAssembler::new(),
            ready: VecDeque::new(),
        })
    }

    #[cfg(not(feature = "serial"))]
    pub fn open(_port_name: &str, _baud_rate: u32) -> Result<Self, SerialError> {
        Err(SerialError::Unsupported)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl LineSource for SerialLineSource {
    fn poll_line(&mut self) -> Result<Option<Vec<u8>>, SerialError> {
        if let Some(line) = self.ready.pop_front() {
            return Ok(Some(line));
        }
        #[cfg(feature = "serial")]
        {
            use std::io::Read;

            let waiting = self
                .port
                .bytes_to_read()
                .map_err(|e| SerialError::Read(e.into()))? as usize;
            if waiting == 0 {
                return Ok(None);
            }
            let mut buffer = vec![0u8; waiting.min(4096)];
            match self.port.read(&mut buffer) {
                Ok(n) => {
                    log::trace!("RAW {} bytes: {}", n, hex_snippet(&buffer[..n], 64));
                    self.ready.extend(self.assembler.push(&buffer[..n]));
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => return Err(SerialError::Read(e)),
            }
        }
        Ok(self.ready.pop_front())
    }
}
