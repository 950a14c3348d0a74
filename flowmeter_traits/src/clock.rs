use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock abstraction for sample timestamps and pacing.
///
/// - now(): returns a monotonic Instant
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - ms_since(): helper to compute elapsed milliseconds from an origin Instant
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `origin`, saturating at 0 on underflow.
    fn ms_since(&self, origin: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(origin);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, d: Duration) {
        (**self).sleep(d);
    }
}

/// Default, real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// now() = origin + offset
/// sleep(d) advances internal time by d without actually sleeping.
///
/// Clones share the same offset, so a simulated channel and the sample
/// processor can observe one timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    /// Set the absolute offset relative to origin.
    pub fn set_offset(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = d;
        }
    }

    /// Current offset relative to origin.
    pub fn offset(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        let origin = clock.now();
        clock.sleep(Duration::from_millis(100));
        assert_eq!(clock.ms_since(origin), 100);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.ms_since(origin), 350);
    }

    #[test]
    fn clones_share_timeline() {
        let a = ManualClock::new();
        let b = a.clone();
        let origin = a.now();
        b.advance(Duration::from_millis(42));
        assert_eq!(a.ms_since(origin), 42);
    }

    #[test]
    fn ms_since_saturates_for_future_origin() {
        let clock = ManualClock::new();
        clock.set_offset(Duration::from_millis(500));
        let later = clock.now();
        clock.set_offset(Duration::from_millis(100));
        assert_eq!(clock.ms_since(later), 0);
    }

    #[test]
    fn monotonic_zero_sleep_returns_immediately() {
        let clock = MonotonicClock::new();
        let start = Instant::now();
        clock.sleep(Duration::ZERO);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
