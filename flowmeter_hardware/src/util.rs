use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use flowmeter_traits::CloseHandle;

use crate::error::{ChannelError, Result};

/// Sleep between empty reads so a reader that returns `Ok(0)` does not spin.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Pending bytes without a `\n` beyond this are noise and get dropped.
pub const MAX_LINE_LEN: usize = 4096;

/// Accumulates raw bytes and yields complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the oldest complete line with its `\n` (and a trailing `\r`) removed.
    /// Invalid UTF-8 is replaced lossily.
    pub fn pop_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    pub fn has_line(&self) -> bool {
        self.buf.contains(&b'\n')
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Read from `reader` until `buf` holds a complete line, the close handle is
/// triggered, or `timeout` expires.
///
/// The reader is expected to return after a short slice (serial ports are
/// opened with a slice-sized timeout) so the close handle and the deadline are
/// observed promptly. Unterminated input longer than [`MAX_LINE_LEN`] is
/// discarded, so a device on the wrong baud rate cannot grow the buffer.
pub fn read_line_with_timeout<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut LineBuffer,
    timeout: Duration,
    closed: &CloseHandle,
) -> Result<String> {
    let deadline = Instant::now() + timeout;
    let mut chunk = [0u8; 256];
    loop {
        if let Some(line) = buf.pop_line() {
            return Ok(line);
        }
        if closed.is_closed() {
            return Err(ChannelError::Closed);
        }
        if Instant::now() >= deadline {
            return Err(ChannelError::Timeout);
        }
        match reader.read(&mut chunk) {
            Ok(0) => std::thread::sleep(POLL_INTERVAL),
            Ok(n) => {
                buf.extend(&chunk[..n]);
                if buf.len() > MAX_LINE_LEN && !buf.has_line() {
                    tracing::warn!(
                        method = "read_line",
                        dropped = buf.len(),
                        "no line terminator, discarding pending bytes"
                    );
                    buf.clear();
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof
                ) =>
            {
                return Err(ChannelError::Closed);
            }
            Err(e) => return Err(ChannelError::Io(e)),
        }
    }
}

/// Write all of `bytes`, retrying slice timeouts until `timeout` expires.
pub fn write_with_timeout<W: Write + ?Sized>(
    writer: &mut W,
    bytes: &[u8],
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    let mut rest = bytes;
    while !rest.is_empty() {
        if Instant::now() >= deadline {
            return Err(ChannelError::WriteFailed(format!(
                "timed out after {} ms with {} bytes pending",
                timeout.as_millis(),
                rest.len()
            )));
        }
        match writer.write(rest) {
            Ok(0) => return Err(ChannelError::WriteFailed("writer accepted 0 bytes".into())),
            Ok(n) => rest = &rest[n..],
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) => return Err(ChannelError::WriteFailed(e.to_string())),
        }
    }
    writer
        .flush()
        .map_err(|e| ChannelError::WriteFailed(e.to_string()))
}
