//! Common time and rounding helpers for flowmeter_core.

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Milliseconds to fractional seconds.
#[inline]
pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / MILLIS_PER_SEC as f64
}

/// Round half away from zero to `decimals` places.
#[inline]
pub fn round_to(x: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX));
    (x * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_from_ms() {
        assert_eq!(ms_to_secs(1500), 1.5);
        assert_eq!(ms_to_secs(0), 0.0);
    }

    #[test]
    fn rounds_to_one_decimal() {
        assert_eq!(round_to(2.25, 1), 2.3);
        assert_eq!(round_to(-1.04, 1), -1.0);
        assert_eq!(round_to(7.0, 0), 7.0);
    }
}
