use std::sync::Arc;
use std::time::Duration;

use flowmeter_core::processor::{AVERAGE_WINDOW, MEDIAN_WINDOW, SampleProcessor};
use flowmeter_traits::ManualClock;
use proptest::prelude::*;

fn readings() -> impl Strategy<Value = Vec<(f64, u64)>> {
    prop::collection::vec((-1000.0f64..1000.0, 0u64..500), 1..60)
}

proptest! {
    #[test]
    fn time_bookkeeping_is_consistent(input in readings()) {
        let clock = ManualClock::new();
        let mut p = SampleProcessor::new(Arc::new(clock.clone()));
        let mut prev: Option<flowmeter_core::Sample> = None;
        for (i, (mass, gap)) in input.iter().enumerate() {
            if i > 0 {
                clock.advance(Duration::from_millis(*gap));
            }
            let s = p.push(*mass);
            match prev {
                None => {
                    prop_assert_eq!(s.time, 0);
                    prop_assert_eq!(s.time_delta, 0);
                    prop_assert_eq!(s.delta, *mass);
                }
                Some(p0) => {
                    prop_assert!(s.time >= p0.time);
                    prop_assert_eq!(s.time_delta, s.time - p0.time);
                }
            }
            if s.time_delta == 0 {
                prop_assert_eq!(s.flow_per_second, 0.0);
            }
            prev = Some(s);
        }
    }

    #[test]
    fn filters_stay_within_window_bounds(input in readings()) {
        let clock = ManualClock::new();
        let mut p = SampleProcessor::new(Arc::new(clock.clone()));
        let mut flows = Vec::new();
        let mut medians = Vec::new();
        for (i, (mass, gap)) in input.iter().enumerate() {
            if i > 0 {
                clock.advance(Duration::from_millis(*gap));
            }
            let s = p.push(*mass);
            flows.push(s.flow_per_second);
            medians.push(s.flow_median_filtered);

            let fw = &flows[flows.len().saturating_sub(MEDIAN_WINDOW)..];
            let lo = fw.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = fw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(s.flow_median_filtered >= lo && s.flow_median_filtered <= hi);

            let mw = &medians[medians.len().saturating_sub(AVERAGE_WINDOW)..];
            let lo = mw.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = mw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let tol = 1e-9 * (1.0 + lo.abs().max(hi.abs()));
            prop_assert!(s.flow_average >= lo - tol && s.flow_average <= hi + tol);
        }
    }
}
