//! `From` implementations bridging `flowmeter_config` types to `flowmeter_core` types.

use crate::config::{ChannelTimeouts, HandshakeCfg, SessionConfig};

// ── ChannelTimeouts ──────────────────────────────────────────────────────────

impl From<&flowmeter_config::Serial> for ChannelTimeouts {
    fn from(c: &flowmeter_config::Serial) -> Self {
        Self {
            read_ms: c.read_timeout_ms,
            write_ms: c.write_timeout_ms,
        }
    }
}

// ── HandshakeCfg ─────────────────────────────────────────────────────────────

impl From<&flowmeter_config::Handshake> for HandshakeCfg {
    fn from(c: &flowmeter_config::Handshake) -> Self {
        Self {
            max_probes: c.max_probes,
            probe_interval_ms: c.probe_interval_ms,
        }
    }
}

// ── SessionConfig ────────────────────────────────────────────────────────────

impl SessionConfig {
    /// Build from the file config; `port_name` and `baud_rate` override the
    /// `[serial]` section when given.
    pub fn from_config(
        cfg: &flowmeter_config::Config,
        port_name: Option<&str>,
        baud_rate: Option<u32>,
    ) -> Self {
        let port = port_name
            .map(str::to_string)
            .or_else(|| cfg.serial.port.clone())
            .unwrap_or_default();
        Self::new(port, baud_rate.unwrap_or(cfg.serial.baud_rate))
            .with_timeouts((&cfg.serial).into())
            .with_handshake((&cfg.handshake).into())
            .with_offset_lookback_ms(cfg.chart.offset_lookback_ms)
    }
}
