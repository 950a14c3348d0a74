pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A byte transport that delivers data framed by newline terminators.
pub trait LineChannel {
    /// Block up to `timeout` for the next complete line, terminator stripped.
    fn read_line(&mut self, timeout: std::time::Duration) -> Result<String, BoxError>;
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BoxError>;
    fn close(&mut self);

    /// Handle that lets another thread unblock a pending `read_line`.
    fn close_handle(&self) -> Option<CloseHandle> {
        None
    }
}

impl<T: LineChannel + ?Sized> LineChannel for Box<T> {
    fn read_line(&mut self, timeout: std::time::Duration) -> Result<String, BoxError> {
        (**self).read_line(timeout)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        (**self).write_bytes(bytes)
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn close_handle(&self) -> Option<CloseHandle> {
        (**self).close_handle()
    }
}

/// Shared close flag. Channels poll it while waiting for data and report
/// `Closed` once it is set.
#[derive(Debug, Clone, Default)]
pub struct CloseHandle(Arc<AtomicBool>);

impl CloseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
