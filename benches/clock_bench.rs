// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Benchmark to assess the cost of the relative clock core. The scenario:
//! * Register 5 timers, spread across 5 seconds of local time
//! * Advance the reference 2 times to make all timers fire
//! * Drain every channel

use criterion::{Criterion, criterion_group, criterion_main};
use skew::{Delta, RelativeClock, SteppedClock, Tick};

fn criterion_benchmark(c: &mut Criterion) {
    clock(c);
}

fn clock(c: &mut Criterion) {
    let mut group = c.benchmark_group("clock_operations");

    group.bench_function("clock_operations", |b| {
        b.iter(clock_operations);
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = criterion_benchmark
}

criterion_main!(benches);

fn clock_operations() {
    let reference = SteppedClock::new();
    let clock = RelativeClock::new(reference.clone(), Tick::ZERO, 1.0);
    clock.start();

    let timers: Vec<_> = (1..=5)
        .map(|secs| clock.new_timer(Delta::from_secs(secs)))
        .collect();

    reference.step(Delta::from_secs(2));
    reference.step(Delta::from_secs(3));

    for timer in &timers {
        let _ = timer
            .channel()
            .expect("channel-backed timer")
            .try_recv();
    }
}
