use serde::{Deserialize, Serialize};

/// One fully processed measurement.
///
/// Times are milliseconds; mass is in the device's unit (nominally ml or g),
/// flows are that unit per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Elapsed ms since the first accepted reading of the session
    pub time: u64,
    /// ms since the previous sample (0 for the first)
    pub time_delta: u64,
    /// Raw reading as reported by the device
    pub mass: f64,
    /// `mass - previous.mass` (`mass` for the first)
    pub delta: f64,
    pub flow_per_second: f64,
    pub flow_median_filtered: f64,
    pub flow_average: f64,
}
