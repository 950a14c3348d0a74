//! Test doubles for driving a session without a device.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use flowmeter_traits::{BoxError, CloseHandle, LineChannel, ManualClock};

use crate::config::SessionConfig;
use crate::error::FlowError;
use crate::reader::ChannelBox;
use crate::session::Connector;

/// Real time spent per empty read, so an idle reader does not spin.
const IDLE_NAP: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct Script {
    lines: VecDeque<String>,
    written: Vec<Vec<u8>>,
}

/// Line channel replaying queued lines on a `ManualClock` timeline.
///
/// Each delivered line advances the clock by `step`. When the queue is empty a
/// read advances the clock by its whole timeout and fails with `TimedOut`.
#[derive(Debug)]
pub struct ScriptedChannel {
    clock: ManualClock,
    step: Duration,
    script: Arc<Mutex<Script>>,
    closed: CloseHandle,
    fail_writes: bool,
}

/// Cloneable view on a `ScriptedChannel` that outlives handing it to a session.
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
    closed: CloseHandle,
}

impl ScriptedChannel {
    pub fn new<I, S>(clock: ManualClock, step: Duration, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            clock,
            step,
            script: Arc::new(Mutex::new(Script {
                lines: lines.into_iter().map(Into::into).collect(),
                written: Vec::new(),
            })),
            closed: CloseHandle::new(),
            fail_writes: false,
        }
    }

    /// Every write fails, as with a stalled port.
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            script: self.script.clone(),
            closed: self.closed.clone(),
        }
    }

    pub fn boxed(self) -> ChannelBox {
        Box::new(self)
    }
}

impl ScriptHandle {
    pub fn push_line(&self, line: impl Into<String>) {
        self.lock().lines.push_back(line.into());
    }

    pub fn pending(&self) -> usize {
        self.lock().lines.len()
    }

    /// Every successful write, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    pub fn writes_of(&self, frame: &[u8]) -> usize {
        self.lock().written.iter().filter(|w| w.as_slice() == frame).count()
    }

    /// Simulate the device going away.
    pub fn close(&self) {
        self.closed.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LineChannel for ScriptedChannel {
    fn read_line(&mut self, timeout: Duration) -> Result<String, BoxError> {
        if self.closed.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "script closed").into());
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lines
            .pop_front();
        match next {
            Some(line) => {
                self.clock.advance(self.step);
                Ok(line)
            }
            None => {
                std::thread::sleep(timeout.min(IDLE_NAP));
                self.clock.advance(timeout);
                Err(io::Error::new(io::ErrorKind::TimedOut, "script exhausted").into())
            }
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        if self.closed.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "script closed").into());
        }
        if self.fail_writes {
            return Err(io::Error::other("write stalled").into());
        }
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .written
            .push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {
        self.closed.close();
    }

    fn close_handle(&self) -> Option<CloseHandle> {
        Some(self.closed.clone())
    }
}

/// Connector that hands out `channel` on the first `connect()` and fails after.
pub fn once_connector(channel: impl LineChannel + Send + 'static) -> impl Connector {
    let mut slot: Option<ChannelBox> = Some(Box::new(channel));
    move |_: &SessionConfig| {
        slot.take()
            .ok_or_else(|| FlowError::OpenFailed("scripted channel already used".into()))
    }
}

/// Connector whose open always fails.
pub fn failing_connector(reason: &'static str) -> impl Connector {
    move |_: &SessionConfig| -> Result<ChannelBox, FlowError> {
        Err(FlowError::OpenFailed(reason.into()))
    }
}
