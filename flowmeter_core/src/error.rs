use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("channel read timed out")]
    Timeout,
    #[error("channel closed")]
    Closed,
    #[error("open failed: {0}")]
    OpenFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("channel error: {0}")]
    Channel(String),
    #[error("no handshake reply after {probes} probes")]
    HandshakeTimeout { probes: u32 },
    #[error("invalid transition: cannot {op} while {state}")]
    InvalidTransition {
        op: &'static str,
        state: SessionState,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse error category carried by session error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Closed,
    OpenFailed,
    WriteFailed,
    Channel,
    HandshakeTimeout,
    InvalidTransition,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "Timeout",
            Self::Closed => "Closed",
            Self::OpenFailed => "OpenFailed",
            Self::WriteFailed => "WriteFailed",
            Self::Channel => "Channel",
            Self::HandshakeTimeout => "HandshakeTimeout",
            Self::InvalidTransition => "InvalidTransition",
            Self::Config => "Config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::Closed => ErrorKind::Closed,
            Self::OpenFailed(_) => ErrorKind::OpenFailed,
            Self::WriteFailed(_) => ErrorKind::WriteFailed,
            Self::Channel(_) => ErrorKind::Channel,
            Self::HandshakeTimeout { .. } => ErrorKind::HandshakeTimeout,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
