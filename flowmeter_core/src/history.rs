//! Append-only sample log for one session.

use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::sample::Sample;

/// History shared between the reader thread (sole writer) and observers.
pub type SharedHistory = Arc<RwLock<SampleHistory>>;

/// Figures reported when a session stops.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Summary {
    pub samples: usize,
    /// Highest `flow_average` seen, never below 0
    pub max_flow_average: f64,
    /// Mass of the last sample, which is the dispensed volume
    pub last_mass: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SampleHistory {
    samples: Vec<Sample>,
    max_flow_average: f64,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty history behind a fresh shared handle.
    pub fn shared() -> SharedHistory {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn append(&mut self, sample: Sample) {
        if sample.flow_average > self.max_flow_average {
            self.max_flow_average = sample.flow_average;
        }
        self.samples.push(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.max_flow_average = 0.0;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[Sample] {
        &self.samples
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// The `k` most recent samples in insertion order (all of them if fewer).
    pub fn last_n(&self, k: usize) -> &[Sample] {
        &self.samples[self.samples.len().saturating_sub(k)..]
    }

    /// 0 when empty or when no sample had positive average flow.
    pub fn max_flow_average(&self) -> f64 {
        self.max_flow_average
    }

    /// 0 when empty.
    pub fn last_mass(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.mass)
    }

    /// Earliest `time` whose `flow_average` is positive.
    pub fn first_flowing_time(&self) -> Option<u64> {
        self.samples
            .iter()
            .find(|s| s.flow_average > 0.0)
            .map(|s| s.time)
    }

    /// Chart start: first flowing time minus `lookback_ms`, clamped at 0.
    pub fn offset(&self, lookback_ms: u64) -> Option<u64> {
        self.first_flowing_time()
            .map(|t| t.saturating_sub(lookback_ms))
    }

    pub fn summary(&self) -> Summary {
        Summary {
            samples: self.samples.len(),
            max_flow_average: self.max_flow_average,
            last_mass: self.last_mass(),
        }
    }
}

impl<'a> IntoIterator for &'a SampleHistory {
    type Item = &'a Sample;
    type IntoIter = std::slice::Iter<'a, Sample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}
