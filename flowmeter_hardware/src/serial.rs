use std::time::Duration;

use flowmeter_traits::{BoxError, CloseHandle, LineChannel};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, trace};

use crate::error::{ChannelError, Result};
use crate::util::{LineBuffer, read_line_with_timeout, write_with_timeout};

/// Per-call port timeout. Reads are assembled from slices of this length so a
/// close request or the caller's deadline is noticed quickly.
pub const READ_SLICE: Duration = Duration::from_millis(20);

/// Line channel over a serial port: 8N1, no flow control, DTR/RTS asserted.
///
/// The OS handle is released on `close()` or drop, whichever comes first.
pub struct SerialLineChannel {
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
    baud_rate: u32,
    write_timeout: Duration,
    buf: LineBuffer,
    closed: CloseHandle,
}

impl SerialLineChannel {
    pub fn open(port_name: &str, baud_rate: u32, write_timeout: Duration) -> Result<Self> {
        let open_failed = |reason: String| ChannelError::OpenFailed {
            port: port_name.to_string(),
            reason,
        };
        let mut port = serialport::new(port_name, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_SLICE)
            .open()
            .map_err(|e| open_failed(e.to_string()))?;
        port.write_data_terminal_ready(true)
            .map_err(|e| open_failed(format!("assert DTR: {e}")))?;
        port.write_request_to_send(true)
            .map_err(|e| open_failed(format!("assert RTS: {e}")))?;
        info!(port = port_name, baud = baud_rate, "serial channel open");
        Ok(Self {
            port: Some(port),
            port_name: port_name.to_string(),
            baud_rate,
            write_timeout,
            buf: LineBuffer::new(),
            closed: CloseHandle::new(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl LineChannel for SerialLineChannel {
    fn read_line(&mut self, timeout: Duration) -> std::result::Result<String, BoxError> {
        let port = self.port.as_mut().ok_or(ChannelError::Closed)?;
        let line = read_line_with_timeout(port.as_mut(), &mut self.buf, timeout, &self.closed)?;
        trace!(port = %self.port_name, line = %line, "serial line");
        Ok(line)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> std::result::Result<(), BoxError> {
        let port = self.port.as_mut().ok_or(ChannelError::Closed)?;
        write_with_timeout(port.as_mut(), bytes, self.write_timeout)?;
        Ok(())
    }

    fn close(&mut self) {
        self.closed.close();
        if self.port.take().is_some() {
            self.buf.clear();
            debug!(port = %self.port_name, "serial channel closed");
        }
    }

    fn close_handle(&self) -> Option<CloseHandle> {
        Some(self.closed.clone())
    }
}

impl Drop for SerialLineChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Names of the serial ports the OS currently reports.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()
        .map_err(|e| ChannelError::Io(std::io::Error::other(e.to_string())))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
