use std::sync::Arc;
use std::time::Duration;

use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use flowmeter_core::SampleProcessor;
use flowmeter_core::handshake::classify_line;
use flowmeter_traits::ManualClock;

// Synthetic fill curve: steady rise with xorshift jitter
fn synth_masses(n: usize, noise_amp: f64, seed: u32) -> Vec<f64> {
    let mut state = seed.max(1);
    let mut next = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        f64::from(x) / (f64::from(u32::MAX) + 1.0)
    };
    (0..n)
        .map(|i| i as f64 * 0.05 + (next() * 2.0 - 1.0) * noise_amp)
        .collect()
}

fn configure(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    // BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p flowmeter_core --bench processor
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(Duration::from_millis(ms_u64));
    }
}

pub fn bench_push(c: &mut Criterion) {
    let mut g = c.benchmark_group("processor");
    configure(&mut g);

    let masses = synth_masses(10_000, 0.02, 0xC0FFEE);
    g.bench_function("push_10k", |b| {
        b.iter_batched(
            || {
                let clock = ManualClock::new();
                (SampleProcessor::new(Arc::new(clock.clone())), clock)
            },
            |(mut p, clock)| {
                for m in &masses {
                    clock.advance(Duration::from_millis(100));
                    black_box(p.push(black_box(*m)));
                }
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

pub fn bench_classify(c: &mut Criterion) {
    let mut g = c.benchmark_group("classify");
    configure(&mut g);

    let lines: Vec<String> = synth_masses(1_000, 0.5, 7)
        .iter()
        .map(|m| format!("{m:.3}\r"))
        .chain(["MJ".to_string(), "garbage!".to_string()])
        .collect();
    g.bench_function("classify_1k", |b| {
        b.iter(|| {
            for l in &lines {
                black_box(classify_line(black_box(l)));
            }
        })
    });
    g.finish();
}

criterion_group!(benches, bench_push, bench_classify);
criterion_main!(benches);
