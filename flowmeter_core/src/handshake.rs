//! Probe/reply handshake and line classification.
//!
//! The device is asked for presence with `SJ\r\n` and answers `MJ`. Every other
//! line on the wire is either a numeric mass reading or noise.

use flowmeter_traits::LineChannel;
use tracing::{debug, info};

use crate::channel_error::map_write_error;
use crate::config::HandshakeCfg;
use crate::error::FlowError;

/// Probe frame written to the device.
pub const PROBE_FRAME: [u8; 4] = *b"SJ\r\n";
/// Reply prefix that confirms the device.
pub const REPLY_TOKEN: &str = "MJ";
/// Readings are truncated to this many characters before parsing.
pub const MAX_NUMERIC_CHARS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    ProbeSent,
    Confirmed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::ProbeSent => "probe sent",
            Self::Confirmed => "confirmed",
        })
    }
}

/// What a received line turned out to be.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineKind {
    Numeric(f64),
    ControlReply,
    Malformed,
}

/// Classify a line without touching any state.
///
/// Numeric when the trimmed line, cut to its first five characters and with a
/// decimal comma read as a point, parses as a finite float. Otherwise a
/// control reply when the trimmed line starts with `MJ`.
pub fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim();
    let candidate: String = trimmed
        .chars()
        .take(MAX_NUMERIC_CHARS)
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if let Ok(value) = candidate.parse::<f64>()
        && value.is_finite()
    {
        return LineKind::Numeric(value);
    }
    if trimmed.starts_with(REPLY_TOKEN) {
        LineKind::ControlReply
    } else {
        LineKind::Malformed
    }
}

/// `Disconnected → ProbeSent → Confirmed`; back to `Disconnected` on reset.
#[derive(Debug, Default)]
pub struct HandshakeProtocol {
    state: ConnectionState,
    probes_sent: u32,
}

impl HandshakeProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == ConnectionState::Confirmed
    }

    pub fn probes_sent(&self) -> u32 {
        self.probes_sent
    }

    /// Write the probe frame. Only `Disconnected` moves (to `ProbeSent`); a
    /// failed write leaves the state as it was.
    pub fn probe<C: LineChannel + ?Sized>(&mut self, channel: &mut C) -> Result<(), FlowError> {
        channel
            .write_bytes(&PROBE_FRAME)
            .map_err(|e| map_write_error(&*e))?;
        self.probes_sent = self.probes_sent.saturating_add(1);
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::ProbeSent;
        }
        debug!(method = "probe", probes = self.probes_sent, state = %self.state, "probe sent");
        Ok(())
    }

    /// Classify a line; a control reply confirms the connection.
    pub fn classify(&mut self, line: &str) -> LineKind {
        let kind = classify_line(line);
        match kind {
            LineKind::ControlReply => {
                if self.state != ConnectionState::Confirmed {
                    info!(method = "classify", from = %self.state, "handshake confirmed");
                    self.state = ConnectionState::Confirmed;
                }
            }
            LineKind::Malformed => {
                debug!(method = "classify", line = %line, "discarding malformed line");
            }
            LineKind::Numeric(_) => {}
        }
        kind
    }

    pub fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.probes_sent = 0;
    }
}

/// What the reader should do about probing on this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDecision {
    Wait,
    Probe,
    /// Budget spent without a reply; reported once.
    GiveUp { attempts: u32 },
}

/// Bounded probe cadence: at most `max_probes` attempts, spaced by
/// `probe_interval_ms`, then a single give-up.
#[derive(Debug, Clone)]
pub struct ProbeSchedule {
    cfg: HandshakeCfg,
    attempts: u32,
    last_ms: Option<u64>,
    gave_up: bool,
}

impl ProbeSchedule {
    pub fn new(cfg: HandshakeCfg) -> Self {
        Self {
            cfg,
            attempts: 0,
            last_ms: None,
            gave_up: false,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    pub fn poll(&mut self, confirmed: bool, now_ms: u64) -> ProbeDecision {
        if confirmed || self.gave_up {
            return ProbeDecision::Wait;
        }
        let interval_elapsed = self
            .last_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.cfg.probe_interval_ms);
        if !interval_elapsed {
            return ProbeDecision::Wait;
        }
        if self.attempts >= self.cfg.max_probes {
            self.gave_up = true;
            return ProbeDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        self.last_ms = Some(now_ms);
        ProbeDecision::Probe
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.last_ms = None;
        self.gave_up = false;
    }
}
