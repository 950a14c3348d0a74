//! Background acquisition thread.
//!
//! The reader owns the channel and the processing pipeline while a session is
//! acquiring. It probes until the device answers, reads and classifies lines,
//! appends samples to the shared history and fans events out to subscribers.
//! It is the only writer of the history while running.
//!
//! Safety: each `Reader` spawns exactly one thread, joined on `stop()` or when
//! the `Reader` is dropped.
use crossbeam_channel as xch;
use flowmeter_traits::clock::Clock;
use flowmeter_traits::{CloseHandle, LineChannel};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel_error::map_channel_error;
use crate::config::SessionConfig;
use crate::error::FlowError;
use crate::events::{EventBus, SessionEvent};
use crate::handshake::{ConnectionState, HandshakeProtocol, LineKind, ProbeDecision, ProbeSchedule};
use crate::history::SharedHistory;
use crate::processor::SampleProcessor;

/// Pause after a channel error that is neither a timeout nor a close.
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Boxed channel handed between the controller and the reader thread.
pub type ChannelBox = Box<dyn LineChannel + Send>;

/// Per-session processing state, moved into the reader while it runs.
#[derive(Debug)]
pub struct Pipeline {
    pub handshake: HandshakeProtocol,
    pub schedule: ProbeSchedule,
    pub processor: SampleProcessor,
    history: SharedHistory,
    conn_state: Arc<Mutex<ConnectionState>>,
}

impl Pipeline {
    pub fn new(
        cfg: &SessionConfig,
        clock: Arc<dyn Clock + Send + Sync>,
        history: SharedHistory,
        conn_state: Arc<Mutex<ConnectionState>>,
    ) -> Self {
        Self {
            handshake: HandshakeProtocol::new(),
            schedule: ProbeSchedule::new(cfg.handshake),
            processor: SampleProcessor::new(clock),
            history,
            conn_state,
        }
    }

    /// Drop all samples, the time origin and the handshake.
    pub fn clear(&mut self) {
        self.processor.reset();
        self.reset_handshake();
        match self.history.write() {
            Ok(mut h) => h.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Back to `Disconnected` with a fresh probe budget.
    pub fn reset_handshake(&mut self) {
        self.handshake.reset();
        self.schedule.reset();
        self.publish_state();
    }

    /// Mirror the handshake state for observers outside the reader.
    fn publish_state(&self) {
        let state = self.handshake.state();
        match self.conn_state.lock() {
            Ok(mut s) => *s = state,
            Err(poisoned) => *poisoned.into_inner() = state,
        }
    }

    fn append(&self, sample: crate::sample::Sample) {
        match self.history.write() {
            Ok(mut h) => h.append(sample),
            Err(poisoned) => poisoned.into_inner().append(sample),
        }
    }
}

/// Requests the controller posts while the reader owns the pipeline.
#[derive(Debug)]
pub enum ReaderCommand {
    /// Clear, then acknowledge on the sender.
    Clear(xch::Sender<()>),
}

/// What the thread hands back when it exits.
pub struct ReaderParts {
    pub channel: ChannelBox,
    pub pipeline: Pipeline,
}

pub struct Reader {
    commands: xch::Sender<ReaderCommand>,
    shutdown: Arc<AtomicBool>,
    close: Option<CloseHandle>,
    join_handle: Option<JoinHandle<ReaderParts>>,
}

impl Reader {
    pub fn spawn<C: Clock + Send + Sync + 'static>(
        mut channel: ChannelBox,
        mut pipeline: Pipeline,
        cfg: SessionConfig,
        bus: EventBus,
        clock: C,
    ) -> Self {
        let (cmd_tx, cmd_rx) = xch::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let close = channel.close_handle();

        let join_handle = std::thread::spawn(move || {
            let epoch = clock.now();
            let mut lp = Loop {
                cfg: &cfg,
                bus: &bus,
                clock: &clock,
                epoch,
            };
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("reader thread received shutdown signal");
                    break;
                }
                for cmd in cmd_rx.try_iter() {
                    match cmd {
                        ReaderCommand::Clear(done) => {
                            pipeline.clear();
                            tracing::info!(method = "clear", "history cleared");
                            let _ = done.send(());
                        }
                    }
                }
                if lp
                    .iteration(&mut *channel, &mut pipeline, &shutdown_clone)
                    .is_break()
                {
                    break;
                }
            }
            tracing::trace!("reader thread exiting cleanly");
            ReaderParts { channel, pipeline }
        });

        Self {
            commands: cmd_tx,
            shutdown,
            close,
            join_handle: Some(join_handle),
        }
    }

    /// Queue a command; fails once the thread has exited.
    pub fn post(&self, cmd: ReaderCommand) -> Result<(), FlowError> {
        if self.is_finished() {
            return Err(FlowError::Closed);
        }
        self.commands.send(cmd).map_err(|_| FlowError::Closed)
    }

    pub fn is_finished(&self) -> bool {
        self.join_handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Signal shutdown, unblock the pending read and join.
    ///
    /// `None` when the thread panicked; the channel and pipeline are lost then.
    pub fn stop(mut self) -> Option<ReaderParts> {
        self.signal();
        let handle = self.join_handle.take()?;
        match handle.join() {
            Ok(parts) => {
                tracing::trace!("reader thread joined successfully");
                Some(parts)
            }
            Err(e) => {
                tracing::warn!(?e, "reader thread panicked during shutdown");
                None
            }
        }
    }

    fn signal(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(close) = &self.close {
            close.close();
        }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            self.signal();
            if let Err(e) = handle.join() {
                tracing::warn!(?e, "reader thread panicked during shutdown");
            }
        }
    }
}

struct Loop<'a, C> {
    cfg: &'a SessionConfig,
    bus: &'a EventBus,
    clock: &'a C,
    epoch: Instant,
}

impl<C: Clock> Loop<'_, C> {
    fn iteration(
        &mut self,
        channel: &mut (dyn LineChannel + Send),
        p: &mut Pipeline,
        shutdown: &AtomicBool,
    ) -> std::ops::ControlFlow<()> {
        use std::ops::ControlFlow::Continue;

        if let Err(e) = self.maybe_probe(channel, p) {
            if e == FlowError::Closed {
                return self.closed(p, shutdown);
            }
            tracing::warn!(method = "probe", error = %e, "probe write failed");
            self.bus.emit(&SessionEvent::error(&e));
        }

        // Wake up for the next probe while still waiting for the reply
        let timeout = if p.handshake.is_confirmed() || p.schedule.gave_up() {
            self.cfg.timeouts.read()
        } else {
            self.cfg
                .timeouts
                .read()
                .min(Duration::from_millis(self.cfg.handshake.probe_interval_ms))
        };

        match channel.read_line(timeout) {
            Ok(line) => {
                self.handle_line(&line, p);
                Continue(())
            }
            Err(e) => match map_channel_error(&*e) {
                FlowError::Timeout => {
                    tracing::trace!(method = "read_line", "no line within timeout");
                    Continue(())
                }
                FlowError::Closed => self.closed(p, shutdown),
                err => {
                    tracing::warn!(method = "read_line", error = %err, "channel read failed");
                    self.bus.emit(&SessionEvent::error(&err));
                    self.clock.sleep(ERROR_BACKOFF);
                    Continue(())
                }
            },
        }
    }

    fn maybe_probe(
        &mut self,
        channel: &mut (dyn LineChannel + Send),
        p: &mut Pipeline,
    ) -> Result<(), FlowError> {
        let now = self.clock.ms_since(self.epoch);
        match p.schedule.poll(p.handshake.is_confirmed(), now) {
            ProbeDecision::Wait => Ok(()),
            ProbeDecision::Probe => {
                let res = p.handshake.probe(channel);
                p.publish_state();
                res
            }
            ProbeDecision::GiveUp { attempts } => {
                let e = FlowError::HandshakeTimeout { probes: attempts };
                tracing::warn!(method = "probe", probes = attempts, "device never answered the probe");
                self.bus.emit(&SessionEvent::error(&e));
                Ok(())
            }
        }
    }

    fn handle_line(&mut self, line: &str, p: &mut Pipeline) {
        let was_confirmed = p.handshake.is_confirmed();
        match p.handshake.classify(line) {
            LineKind::Numeric(value) => {
                let sample = p.processor.push(value);
                p.append(sample);
                tracing::trace!(time = sample.time, mass = sample.mass, "sample");
                self.bus.emit(&SessionEvent::Sample(sample));
            }
            LineKind::ControlReply if !was_confirmed => {
                p.publish_state();
                tracing::info!(
                    port = %self.cfg.port_name,
                    baud = self.cfg.baud_rate,
                    "device connected"
                );
                self.bus.emit(&SessionEvent::Connected {
                    port_name: self.cfg.port_name.clone(),
                    baud_rate: self.cfg.baud_rate,
                });
            }
            LineKind::ControlReply | LineKind::Malformed => {}
        }
    }

    /// The device is gone: publish `Disconnected` before the thread exits.
    fn closed(&self, p: &mut Pipeline, shutdown: &AtomicBool) -> std::ops::ControlFlow<()> {
        p.reset_handshake();
        if !shutdown.load(Ordering::Relaxed) {
            tracing::warn!(method = "read_line", "channel closed, not connected");
            self.bus.emit(&SessionEvent::error(&FlowError::Closed));
        }
        std::ops::ControlFlow::Break(())
    }
}
