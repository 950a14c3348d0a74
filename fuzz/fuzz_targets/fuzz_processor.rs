#![no_main]
use std::sync::Arc;
use std::time::Duration;

use flowmeter_core::{SampleHistory, SampleProcessor};
use flowmeter_traits::ManualClock;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: Vec<(u16, i32)>| {
    let clock = ManualClock::new();
    let mut processor = SampleProcessor::new(Arc::new(clock.clone()));
    let mut history = SampleHistory::new();
    for (step_ms, centi) in input {
        clock.advance(Duration::from_millis(u64::from(step_ms)));
        let sample = processor.push(f64::from(centi) / 100.0);
        assert!(sample.flow_median_filtered.is_finite());
        assert!(sample.flow_average.is_finite());
        history.append(sample);
    }
    assert!(history.max_flow_average() >= 0.0);
});
