//! Runtime configuration for an acquisition session.
//!
//! These are separate from the TOML-deserialized config in `flowmeter_config`;
//! see `conversions` for the mapping.

use std::time::Duration;

use crate::error::FlowError;

/// Default line speed of the scale.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Per-call channel timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimeouts {
    /// Max wait for one line (ms)
    pub read_ms: u64,
    /// Max wait for one write to drain (ms)
    pub write_ms: u64,
}

impl Default for ChannelTimeouts {
    fn default() -> Self {
        Self {
            read_ms: 2000,
            write_ms: 500,
        }
    }
}

impl ChannelTimeouts {
    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

/// Probe retry budget while waiting for the device's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeCfg {
    pub max_probes: u32,
    pub probe_interval_ms: u64,
}

impl Default for HandshakeCfg {
    fn default() -> Self {
        Self {
            max_probes: 10,
            probe_interval_ms: 500,
        }
    }
}

/// Everything a session needs to know about its channel and presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub timeouts: ChannelTimeouts,
    pub handshake: HandshakeCfg,
    /// Margin subtracted from the first flowing sample by `offset()`
    pub offset_lookback_ms: u64,
}

impl SessionConfig {
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeouts: ChannelTimeouts::default(),
            handshake: HandshakeCfg::default(),
            offset_lookback_ms: 5000,
        }
    }

    pub fn with_timeouts(mut self, timeouts: ChannelTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_handshake(mut self, handshake: HandshakeCfg) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_offset_lookback_ms(mut self, ms: u64) -> Self {
        self.offset_lookback_ms = ms;
        self
    }

    pub fn validate(&self) -> Result<(), FlowError> {
        if self.port_name.trim().is_empty() {
            return Err(FlowError::Config("port name must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(FlowError::Config("baud rate must be > 0".into()));
        }
        if self.timeouts.read_ms == 0 || self.timeouts.read_ms > 60_000 {
            return Err(FlowError::Config("read timeout must be in 1..=60000 ms".into()));
        }
        if self.timeouts.write_ms == 0 {
            return Err(FlowError::Config("write timeout must be >= 1 ms".into()));
        }
        if self.handshake.max_probes == 0 {
            return Err(FlowError::Config("max probes must be >= 1".into()));
        }
        if self.handshake.probe_interval_ms == 0 {
            return Err(FlowError::Config("probe interval must be >= 1 ms".into()));
        }
        Ok(())
    }
}
