use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel read timeout")]
    Timeout,
    #[error("channel closed")]
    Closed,
    #[error("open {port} failed: {reason}")]
    OpenFailed { port: String, reason: String },
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
