//! Modem request/response client
//!
//! Writes an AT command and collects the reply. The first byte must arrive
//! within the response timeout (2 s by default); after that the client keeps
//! reading until it sees `OK\r\n` or the `> ` prompt, fills its buffer, or
//! the line goes quiet. A timed-out poll is reported, never retried inline.

use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Join};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

/// Reply terminators emitted by the modem.
const RESPONSE_TERMINATORS: [&[u8]; 2] = [b"OK\r\n", b"> "];

/// Default wait for the first byte of a reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Silence after which a partial reply is considered complete.
const DEFAULT_IDLE_GAP: Duration = Duration::from_millis(200);

/// Default reply buffer size.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 2048;

/// Modem I/O errors
#[derive(Debug, Error)]
pub enum ModemError {
    #[error("Timeout waiting for modem response")]
    Timeout,

    #[error("Empty response from modem")]
    EmptyResponse,

    #[error("Modem stream closed")]
    Closed,

    #[error("Modem I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Anything the modem client can talk through.
pub trait ModemIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ModemIo for T {}

/// Boxed transport, chosen at runtime (serial device or simulator socket).
pub type BoxedModemIo = Box<dyn ModemIo>;

/// Request/response client over a modem byte stream.
pub struct ModemClient<S> {
    io: S,
    response_timeout: Duration,
    idle_gap: Duration,
    max_response_bytes: usize,
    /// Completed polls
    responses: u64,
    /// Polls that produced nothing within the timeout
    timeouts: u64,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> ModemClient<S> {
    pub fn new(io: S) -> Self {
        Self {
            io,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            idle_gap: DEFAULT_IDLE_GAP,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            responses: 0,
            timeouts: 0,
        }
    }

    /// Set the first-byte timeout. Default is 2 s.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the silence that ends a reply lacking a terminator.
    pub fn with_idle_gap(mut self, gap: Duration) -> Self {
        self.idle_gap = gap;
        self
    }

    pub fn with_max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes.max(1);
        self
    }

    /// Write a raw command (caller supplies the trailing `\r`).
    pub async fn send_command(&mut self, command: &str) -> Result<(), ModemError> {
        debug!(command = %command.trim_end(), "Sending modem command");
        self.io.write_all(command.as_bytes()).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Collect one reply.
    pub async fn read_response(&mut self) -> Result<Vec<u8>, ModemError> {
        let mut response = Vec::with_capacity(self.max_response_bytes);
        let mut chunk = vec![0u8; self.max_response_bytes];

        let first = match tokio::time::timeout(self.response_timeout, self.io.read(&mut chunk)).await {
            Ok(Ok(0)) => return Err(ModemError::Closed),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ModemError::Io(e)),
            Err(_) => {
                self.timeouts += 1;
                warn!(
                    timeout_ms = self.response_timeout.as_millis() as u64,
                    total_timeouts = self.timeouts,
                    "Timeout waiting for modem response"
                );
                return Err(ModemError::Timeout);
            }
        };
        response.extend_from_slice(&chunk[..first]);

        while !is_complete(&response) && response.len() < self.max_response_bytes {
            let room = self.max_response_bytes - response.len();
            match tokio::time::timeout(self.idle_gap, self.io.read(&mut chunk[..room])).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => response.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(ModemError::Io(e)),
            }
        }

        if response.iter().all(u8::is_ascii_whitespace) {
            return Err(ModemError::EmptyResponse);
        }

        self.responses += 1;
        debug!(
            bytes = response.len(),
            response = %String::from_utf8_lossy(&response),
            "Received modem response"
        );
        Ok(response)
    }

    /// Send a command and wait for its reply.
    pub async fn query(&mut self, command: &str) -> Result<Vec<u8>, ModemError> {
        self.send_command(command).await?;
        self.read_response().await
    }

    pub fn stats(&self) -> ModemStats {
        ModemStats {
            responses: self.responses,
            timeouts: self.timeouts,
        }
    }
}

impl ModemClient<BoxedModemIo> {
    /// Open a serial device node (tty or pty). Line settings are left as
    /// configured by the system.
    pub async fn open_device(path: &Path) -> Result<Self, ModemError> {
        let port = open_serial_device(path).await?;
        info!(device = %path.display(), "Opened modem device");
        Ok(Self::new(Box::new(port)))
    }

    /// Connect to a modem simulator listening on a Unix socket.
    pub async fn connect_socket(path: &Path) -> Result<Self, ModemError> {
        let stream = UnixStream::connect(path).await?;
        info!(socket = %path.display(), "Connected to modem socket");
        Ok(Self::new(Box::new(stream)))
    }
}

fn is_complete(response: &[u8]) -> bool {
    RESPONSE_TERMINATORS
        .iter()
        .any(|marker| response.windows(marker.len()).any(|w| w == *marker))
}

/// Modem client counters
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ModemStats {
    pub responses: u64,
    pub timeouts: u64,
}

// ============================================================================
// Serial device
// ============================================================================

/// Character device opened as two handles: one for reads, one for writes.
/// A read left pending by a timed-out poll never holds up the next command.
pub type SerialDevice = Join<File, File>;

/// Open a tty or pty without making it the controlling terminal.
pub async fn open_serial_device(path: &Path) -> io::Result<SerialDevice> {
    let reader = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .await?;
    let writer = reader.try_clone().await?;
    Ok(tokio::io::join(reader, writer))
}
