//! Maps `Box<dyn Error>` from the `LineChannel` boundary to typed `FlowError`.
//!
//! The traits in `flowmeter_traits` use `Box<dyn Error + Send + Sync>` so any
//! transport can plug in; this module converts those to our typed error enum,
//! with an optional feature-gated path for `flowmeter_hardware::ChannelError`.

use std::io::ErrorKind as IoKind;

use crate::error::FlowError;

/// Map a channel-boundary error to a typed `FlowError`.
///
/// Attempts to downcast known channel error types first, then `std::io::Error`
/// kinds, then falls back to string-based heuristics.
pub fn map_channel_error(e: &(dyn std::error::Error + 'static)) -> FlowError {
    #[cfg(feature = "hardware-errors")]
    {
        use flowmeter_hardware::error::ChannelError;
        if let Some(ce) = e.downcast_ref::<ChannelError>() {
            return match ce {
                ChannelError::Timeout => FlowError::Timeout,
                ChannelError::Closed => FlowError::Closed,
                ChannelError::OpenFailed { .. } => FlowError::OpenFailed(ce.to_string()),
                ChannelError::WriteFailed(msg) => FlowError::WriteFailed(msg.clone()),
                ChannelError::Io(io) => map_io_error(io),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return map_io_error(io);
    }

    // Fallback: string-based detection
    let s = e.to_string();
    let lower = s.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        FlowError::Timeout
    } else if lower.contains("closed") {
        FlowError::Closed
    } else {
        FlowError::Channel(s)
    }
}

fn map_io_error(io: &std::io::Error) -> FlowError {
    match io.kind() {
        IoKind::TimedOut | IoKind::WouldBlock => FlowError::Timeout,
        IoKind::BrokenPipe
        | IoKind::NotConnected
        | IoKind::UnexpectedEof
        | IoKind::ConnectionAborted
        | IoKind::ConnectionReset => FlowError::Closed,
        _ => FlowError::Channel(io.to_string()),
    }
}

/// Map a failed probe write. Anything but a closed channel is a write failure.
pub fn map_write_error(e: &(dyn std::error::Error + 'static)) -> FlowError {
    match map_channel_error(e) {
        FlowError::Closed => FlowError::Closed,
        FlowError::WriteFailed(msg) => FlowError::WriteFailed(msg),
        other => FlowError::WriteFailed(other.to_string()),
    }
}
