//! Type-state builder for `SessionController`.
//!
//! `build()` only exists once a connector has been supplied; `try_build()` is
//! available in any state and reports what is missing at runtime.

use std::marker::PhantomData;
use std::sync::Arc;

use crossbeam_channel as xch;
use flowmeter_traits::clock::{Clock, MonotonicClock};

use crate::config::SessionConfig;
use crate::error::FlowError;
use crate::events::{EventBus, SessionEvent};
use crate::session::{Connector, SessionController};

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

pub struct SessionBuilder<C> {
    cfg: SessionConfig,
    connector: Option<Box<dyn Connector>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    bus: EventBus,
    _c: PhantomData<C>,
}

impl SessionBuilder<Missing> {
    pub fn new(cfg: SessionConfig) -> Self {
        Self {
            cfg,
            connector: None,
            clock: None,
            bus: EventBus::new(),
            _c: PhantomData,
        }
    }

    /// Supply the factory that opens a fresh channel on every `connect()`.
    pub fn with_connector(self, connector: impl Connector + 'static) -> SessionBuilder<Set> {
        SessionBuilder {
            cfg: self.cfg,
            connector: Some(Box::new(connector)),
            clock: self.clock,
            bus: self.bus,
            _c: PhantomData,
        }
    }
}

/// Chainable setters that do not affect type-state.
impl<C> SessionBuilder<C> {
    /// Provide a custom clock; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Register a subscriber before the session exists.
    pub fn with_subscriber(self, tx: xch::Sender<SessionEvent>) -> Self {
        self.bus.add(tx);
        self
    }

    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<SessionController, FlowError> {
        let connector = self
            .connector
            .ok_or_else(|| FlowError::Config("no connector supplied".into()))?;
        self.cfg.validate()?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        Ok(SessionController::from_parts(
            self.cfg, connector, clock, self.bus,
        ))
    }
}

impl SessionBuilder<Set> {
    /// Validate the config and build. Only available once a connector is set.
    pub fn build(self) -> Result<SessionController, FlowError> {
        self.try_build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ChannelBox;

    fn never(_: &SessionConfig) -> Result<ChannelBox, FlowError> {
        Err(FlowError::OpenFailed("no device".into()))
    }

    #[test]
    fn try_build_without_connector_fails() {
        let err = SessionBuilder::new(SessionConfig::new("COM3", 9600))
            .try_build()
            .unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn build_validates_config() {
        let err = SessionController::builder(SessionConfig::new("", 9600))
            .with_connector(never)
            .build()
            .unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }
}
