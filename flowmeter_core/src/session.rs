//! Session lifecycle: connect, start, stop, clear.
//!
//! `SessionController` owns the channel and the processing pipeline for one
//! acquisition session. While acquiring, both live on the reader thread and
//! come back on `stop()`.

use std::sync::{Arc, Mutex, PoisonError, RwLockReadGuard};
use std::time::Duration;

use crossbeam_channel as xch;
use flowmeter_traits::clock::Clock;

use crate::builder::{Missing, SessionBuilder};
use crate::config::SessionConfig;
use crate::error::FlowError;
use crate::events::{EventBus, SessionEvent};
use crate::handshake::ConnectionState;
use crate::history::{SampleHistory, SharedHistory, Summary};
use crate::reader::{ChannelBox, Pipeline, Reader, ReaderCommand};

/// Extra wait on top of the read timeout for the reader to acknowledge a clear.
const CLEAR_ACK_MARGIN: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Acquiring,
    Stopped,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Acquiring => "acquiring",
            Self::Stopped => "stopped",
        })
    }
}

/// Opens a fresh channel for each `connect()`.
pub trait Connector: Send {
    fn open(&mut self, cfg: &SessionConfig) -> Result<ChannelBox, FlowError>;
}

impl<F> Connector for F
where
    F: FnMut(&SessionConfig) -> Result<ChannelBox, FlowError> + Send,
{
    fn open(&mut self, cfg: &SessionConfig) -> Result<ChannelBox, FlowError> {
        self(cfg)
    }
}

pub struct SessionController {
    cfg: SessionConfig,
    connector: Box<dyn Connector>,
    clock: Arc<dyn Clock + Send + Sync>,
    state: SessionState,
    channel: Option<ChannelBox>,
    // None while the reader thread owns it
    pipeline: Option<Pipeline>,
    reader: Option<Reader>,
    history: SharedHistory,
    conn_state: Arc<Mutex<ConnectionState>>,
    bus: EventBus,
    summary: Option<Summary>,
    // A clear the reader could not acknowledge; applied when the pipeline returns
    pending_clear: bool,
}

impl core::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionController")
            .field("port", &self.cfg.port_name)
            .field("baud", &self.cfg.baud_rate)
            .field("state", &self.state())
            .field("connection", &self.connection_state())
            .field("samples", &self.read_history().len())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Start building a controller for `cfg`.
    pub fn builder(cfg: SessionConfig) -> SessionBuilder<Missing> {
        SessionBuilder::new(cfg)
    }

    pub(crate) fn from_parts(
        cfg: SessionConfig,
        connector: Box<dyn Connector>,
        clock: Arc<dyn Clock + Send + Sync>,
        bus: EventBus,
    ) -> Self {
        let history = SampleHistory::shared();
        let conn_state = Arc::new(Mutex::new(ConnectionState::Disconnected));
        let pipeline = Pipeline::new(&cfg, clock.clone(), history.clone(), conn_state.clone());
        Self {
            cfg,
            connector,
            clock,
            state: SessionState::Idle,
            channel: None,
            pipeline: Some(pipeline),
            reader: None,
            history,
            conn_state,
            bus,
            summary: None,
            pending_clear: false,
        }
    }

    /// Open a fresh channel. Allowed from Idle, Connected and Stopped.
    ///
    /// A session whose device vanished counts as Stopped; the dead reader is
    /// reaped first.
    pub fn connect(&mut self) -> Result<(), FlowError> {
        if self.state == SessionState::Acquiring && self.reader_finished() {
            self.stop()?;
        }
        match self.state {
            SessionState::Idle | SessionState::Connected | SessionState::Stopped => {}
            state => {
                return Err(FlowError::InvalidTransition {
                    op: "connect",
                    state,
                });
            }
        }
        self.state = SessionState::Connecting;
        if let Some(mut old) = self.channel.take() {
            old.close();
        }
        self.pipeline_mut().reset_handshake();

        match self.connector.open(&self.cfg) {
            Ok(channel) => {
                tracing::info!(
                    method = "connect",
                    port = %self.cfg.port_name,
                    baud = self.cfg.baud_rate,
                    "port opened"
                );
                self.channel = Some(channel);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(method = "connect", port = %self.cfg.port_name, error = %e, "open failed");
                self.state = SessionState::Idle;
                self.bus.emit(&SessionEvent::error(&e));
                Err(e)
            }
        }
    }

    /// Hand the channel to a new reader thread. Requires Connected.
    pub fn start(&mut self) -> Result<(), FlowError> {
        if self.state != SessionState::Connected {
            return Err(FlowError::InvalidTransition {
                op: "start",
                state: self.state(),
            });
        }
        let channel = self.channel.take().ok_or(FlowError::Closed)?;
        let mut pipeline = self.take_pipeline();
        if std::mem::take(&mut self.pending_clear) {
            pipeline.clear();
        }
        self.reader = Some(Reader::spawn(
            channel,
            pipeline,
            self.cfg.clone(),
            self.bus.clone(),
            self.clock.clone(),
        ));
        self.state = SessionState::Acquiring;
        tracing::info!(method = "start", port = %self.cfg.port_name, "acquisition started");
        Ok(())
    }

    /// Join the reader, close the channel and report the summary.
    ///
    /// Also reaps a reader that ended on its own after the device vanished.
    pub fn stop(&mut self) -> Result<Summary, FlowError> {
        match self.state {
            SessionState::Acquiring => {
                if let Some(reader) = self.reader.take()
                    && let Some(mut parts) = reader.stop()
                {
                    parts.channel.close();
                    self.pipeline = Some(parts.pipeline);
                }
            }
            SessionState::Connected => {
                if let Some(mut channel) = self.channel.take() {
                    channel.close();
                }
            }
            state => return Err(FlowError::InvalidTransition { op: "stop", state }),
        }

        self.pipeline_mut().reset_handshake();
        if std::mem::take(&mut self.pending_clear) {
            self.pipeline_mut().clear();
        }
        self.state = SessionState::Stopped;

        let summary = self.read_history().summary();
        tracing::info!(
            method = "stop",
            samples = summary.samples,
            max_flow = summary.max_flow_average,
            volume = summary.last_mass,
            "acquisition stopped"
        );
        self.summary = Some(summary);
        Ok(summary)
    }

    /// Empty the history and restart the time origin. The channel stays open.
    pub fn clear(&mut self) {
        if let Some(reader) = &self.reader {
            let (done_tx, done_rx) = xch::bounded(1);
            let acked = reader.post(ReaderCommand::Clear(done_tx)).is_ok()
                && done_rx
                    .recv_timeout(self.cfg.timeouts.read() + CLEAR_ACK_MARGIN)
                    .is_ok();
            if !acked {
                tracing::warn!(method = "clear", "reader did not acknowledge, clearing history directly");
                self.pending_clear = true;
                self.history
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
                *self.conn_state.lock().unwrap_or_else(PoisonError::into_inner) =
                    ConnectionState::Disconnected;
            }
            return;
        }
        self.pipeline_mut().clear();
        tracing::info!(method = "clear", "history cleared");
    }

    /// Chart start time in ms, `None` until some sample shows positive flow.
    pub fn offset(&self) -> Option<u64> {
        self.read_history().offset(self.cfg.offset_lookback_ms)
    }

    pub fn subscribe(&self) -> xch::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Reports Stopped once the reader has ended on its own.
    pub fn state(&self) -> SessionState {
        if self.state == SessionState::Acquiring && self.reader_finished() {
            SessionState::Stopped
        } else {
            self.state
        }
    }

    pub fn is_acquiring(&self) -> bool {
        self.state() == SessionState::Acquiring
    }

    /// Shared handle; stays valid across `clear()`.
    pub fn history(&self) -> SharedHistory {
        self.history.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.conn_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Summary of the last `stop()`.
    pub fn summary(&self) -> Option<Summary> {
        self.summary
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    /// True when the reader exited on its own (channel closed under it).
    pub fn reader_finished(&self) -> bool {
        self.reader.as_ref().is_some_and(Reader::is_finished)
    }

    fn read_history(&self) -> RwLockReadGuard<'_, SampleHistory> {
        self.history.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pipeline(&mut self) -> Pipeline {
        self.pipeline.take().unwrap_or_else(|| self.fresh_pipeline())
    }

    fn pipeline_mut(&mut self) -> &mut Pipeline {
        let Self {
            pipeline,
            cfg,
            clock,
            history,
            conn_state,
            ..
        } = self;
        // Rebuilt when a panicked reader took it down
        pipeline.get_or_insert_with(|| {
            Pipeline::new(cfg, clock.clone(), history.clone(), conn_state.clone())
        })
    }

    fn fresh_pipeline(&self) -> Pipeline {
        Pipeline::new(
            &self.cfg,
            self.clock.clone(),
            self.history.clone(),
            self.conn_state.clone(),
        )
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take()
            && let Some(mut parts) = reader.stop()
        {
            parts.channel.close();
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
    }
}
