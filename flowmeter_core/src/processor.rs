//! Streaming flow derivation: time bookkeeping, instantaneous flow, a fixed
//! five-wide median filter and a trailing ten-sample average.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use flowmeter_traits::clock::Clock;

use crate::sample::Sample;
use crate::util::MILLIS_PER_SEC;

/// Median window, current sample included.
pub const MEDIAN_WINDOW: usize = 5;
/// Trailing average window, current sample included.
pub const AVERAGE_WINDOW: usize = 10;

/// Instantaneous flow in units per second; 0 when no time has passed.
#[inline]
pub fn flow_per_second(delta: f64, time_delta_ms: u64) -> f64 {
    if time_delta_ms == 0 {
        return 0.0;
    }
    delta * MILLIS_PER_SEC as f64 / time_delta_ms as f64
}

/// Median of `current` and up to four `prior` flows.
///
/// The window is always five wide: missing slots are filled with `current`,
/// so during warm-up the result leans toward the newest reading.
pub fn median_of_window<'a>(prior: impl IntoIterator<Item = &'a f64>, current: f64) -> f64 {
    let mut window = [current; MEDIAN_WINDOW];
    for (slot, v) in window
        .iter_mut()
        .skip(1)
        .zip(prior.into_iter().take(MEDIAN_WINDOW - 1))
    {
        *slot = *v;
    }
    window.sort_unstable_by(f64::total_cmp);
    window[MEDIAN_WINDOW / 2]
}

/// Turns numeric readings into fully derived `Sample`s.
pub struct SampleProcessor {
    clock: Arc<dyn Clock + Send + Sync>,
    // Wall-clock instant of the first accepted reading; None until then
    origin: Option<Instant>,
    last: Option<Sample>,
    // Up to MEDIAN_WINDOW - 1 most recent instantaneous flows, oldest first
    flow_buf: VecDeque<f64>,
    // Up to AVERAGE_WINDOW most recent median-filtered flows, oldest first
    median_buf: VecDeque<f64>,
}

impl core::fmt::Debug for SampleProcessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SampleProcessor")
            .field("origin", &self.origin)
            .field("last", &self.last)
            .field("flow_buf", &self.flow_buf)
            .field("median_buf", &self.median_buf)
            .finish_non_exhaustive()
    }
}

impl SampleProcessor {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            clock,
            origin: None,
            last: None,
            flow_buf: VecDeque::with_capacity(MEDIAN_WINDOW),
            median_buf: VecDeque::with_capacity(AVERAGE_WINDOW + 1),
        }
    }

    /// Last sample produced since the previous reset.
    pub fn last(&self) -> Option<&Sample> {
        self.last.as_ref()
    }

    /// Derive the next sample from a reading taken now.
    pub fn push(&mut self, mass: f64) -> Sample {
        let time = match self.origin {
            Some(origin) => self.clock.ms_since(origin),
            None => {
                self.origin = Some(self.clock.now());
                0
            }
        };
        let (time_delta, delta) = match &self.last {
            Some(prev) => (time.saturating_sub(prev.time), mass - prev.mass),
            None => (0, mass),
        };

        let flow = flow_per_second(delta, time_delta);
        let median = median_of_window(self.flow_buf.iter().rev(), flow);

        self.median_buf.push_back(median);
        if self.median_buf.len() > AVERAGE_WINDOW {
            self.median_buf.pop_front();
        }
        let average = self.median_buf.iter().sum::<f64>() / self.median_buf.len() as f64;

        self.flow_buf.push_back(flow);
        if self.flow_buf.len() > MEDIAN_WINDOW - 1 {
            self.flow_buf.pop_front();
        }

        let sample = Sample {
            time,
            time_delta,
            mass,
            delta,
            flow_per_second: flow,
            flow_median_filtered: median,
            flow_average: average,
        };
        self.last = Some(sample);
        sample
    }

    /// Forget the time origin and both filter windows.
    pub fn reset(&mut self) {
        self.origin = None;
        self.last = None;
        self.flow_buf.clear();
        self.median_buf.clear();
    }
}
