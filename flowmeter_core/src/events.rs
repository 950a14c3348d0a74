//! Fan-out of session events to any number of subscribers.

use std::sync::{Arc, Mutex};

use crossbeam_channel as xch;

use crate::error::{ErrorKind, FlowError};
use crate::sample::Sample;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Sample(Sample),
    /// The device answered the probe.
    Connected { port_name: String, baud_rate: u32 },
    Error { kind: ErrorKind, message: String },
}

impl SessionEvent {
    pub fn error(e: &FlowError) -> Self {
        Self::Error {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Cloneable sender side; disconnected subscribers are dropped on the next emit.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<xch::Sender<SessionEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> xch::Receiver<SessionEvent> {
        let (tx, rx) = xch::unbounded();
        self.add(tx);
        rx
    }

    pub fn add(&self, tx: xch::Sender<SessionEvent>) {
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
    }

    pub fn emit(&self, event: &SessionEvent) {
        let mut subs = match self.subscribers.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map_or(0, |s| s.len())
    }
}
