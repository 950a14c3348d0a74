pub mod error;
#[cfg(feature = "hardware")]
pub mod serial;
pub mod util;

#[cfg(feature = "hardware")]
pub use serial::SerialLineChannel;

use std::time::Duration;

use flowmeter_traits::{BoxError, Clock, CloseHandle, LineChannel, MonotonicClock};

use crate::error::ChannelError;

/// Port name reported for the simulated scale.
pub const SIM_PORT_NAME: &str = "sim";

/// Simulated scale speaking the line protocol.
///
/// Answers a probe frame (`SJ...`) with a single `MJ` line and otherwise emits
/// a rising mass reading every `period`, formatted with two decimals.
pub struct SimulatedScale<C: Clock = MonotonicClock> {
    clock: C,
    period: Duration,
    mass: f64,
    increment: f64,
    answer_probe: bool,
    reply_pending: bool,
    closed: CloseHandle,
}

impl SimulatedScale<MonotonicClock> {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for SimulatedScale<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> SimulatedScale<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            period: Duration::from_millis(100),
            mass: 0.0,
            increment: 0.5,
            answer_probe: true,
            reply_pending: false,
            closed: CloseHandle::new(),
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Mass added per reading.
    pub fn with_increment(mut self, increment: f64) -> Self {
        self.increment = increment;
        self
    }

    /// Never answer the probe (device present but silent on the control line).
    pub fn silent(mut self) -> Self {
        self.answer_probe = false;
        self
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }
}

impl<C: Clock> LineChannel for SimulatedScale<C> {
    fn read_line(&mut self, timeout: Duration) -> Result<String, BoxError> {
        if self.closed.is_closed() {
            return Err(ChannelError::Closed.into());
        }
        if self.reply_pending {
            self.reply_pending = false;
            return Ok("MJ".to_string());
        }
        if self.period > timeout {
            self.clock.sleep(timeout);
            return Err(ChannelError::Timeout.into());
        }
        self.clock.sleep(self.period);
        if self.closed.is_closed() {
            return Err(ChannelError::Closed.into());
        }
        self.mass += self.increment;
        let line = format!("{:.2}", self.mass);
        tracing::trace!(line = %line, "simulated reading");
        Ok(line)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), BoxError> {
        if self.closed.is_closed() {
            return Err(ChannelError::Closed.into());
        }
        if self.answer_probe && bytes.starts_with(b"SJ") {
            self.reply_pending = true;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed.close();
    }

    fn close_handle(&self) -> Option<CloseHandle> {
        Some(self.closed.clone())
    }
}

/// Enumerate serial ports; empty without the `hardware` feature.
pub fn available_ports() -> error::Result<Vec<String>> {
    #[cfg(feature = "hardware")]
    {
        serial::available_ports()
    }
    #[cfg(not(feature = "hardware"))]
    {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmeter_traits::ManualClock;

    #[test]
    fn simulated_scale_rises_each_period() {
        let clock = ManualClock::new();
        let mut scale = SimulatedScale::with_clock(clock.clone()).with_increment(0.25);
        let a = scale.read_line(Duration::from_secs(2)).unwrap();
        let b = scale.read_line(Duration::from_secs(2)).unwrap();
        assert_eq!(a, "0.25");
        assert_eq!(b, "0.50");
        assert_eq!(clock.offset(), Duration::from_millis(200));
    }

    #[test]
    fn simulated_scale_answers_probe_once() {
        let mut scale = SimulatedScale::with_clock(ManualClock::new());
        scale.write_bytes(b"SJ\r\n").unwrap();
        assert_eq!(scale.read_line(Duration::from_secs(2)).unwrap(), "MJ");
        assert_ne!(scale.read_line(Duration::from_secs(2)).unwrap(), "MJ");
    }

    #[test]
    fn silent_scale_ignores_probe() {
        let mut scale = SimulatedScale::with_clock(ManualClock::new()).silent();
        scale.write_bytes(b"SJ\r\n").unwrap();
        assert_eq!(scale.read_line(Duration::from_secs(2)).unwrap(), "0.50");
    }

    #[test]
    fn closed_scale_reports_closed() {
        let mut scale = SimulatedScale::with_clock(ManualClock::new());
        let handle = scale.close_handle().unwrap();
        handle.close();
        let err = scale.read_line(Duration::from_secs(2)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChannelError>(),
            Some(ChannelError::Closed)
        ));
    }

    #[test]
    fn short_timeout_yields_timeout() {
        let clock = ManualClock::new();
        let mut scale = SimulatedScale::with_clock(clock.clone());
        let err = scale.read_line(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ChannelError>(),
            Some(ChannelError::Timeout)
        ));
        assert_eq!(clock.offset(), Duration::from_millis(10));
    }
}
