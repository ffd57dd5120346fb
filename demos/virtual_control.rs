// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// This example demonstrates how to use `VirtualClock` to control the flow of
// time in tests.

use std::error::Error;

use jiff::SignedDuration;
use skew::{Stopwatch, VirtualClock};

fn main() -> Result<(), Box<dyn Error>> {
    let clock = VirtualClock::new();

    // Retrieve the current time.
    let now = clock.now();

    // Retrieve the time later.
    let later = clock.now();

    // Notice the time is the same: the clock is paused until started.
    assert_eq!(now, later);

    // Advance the clock by 1 second.
    clock.step(SignedDuration::from_secs(1));

    // Time advanced by 1 second.
    assert_eq!(clock.now().duration_since(later), SignedDuration::from_secs(1));

    // Create a stopwatch.
    let stopwatch = Stopwatch::with_clock(&clock);

    // Notice that time does not move on its own.
    assert_eq!(stopwatch.elapsed(), SignedDuration::ZERO);

    // Advance the clock by 2 seconds.
    clock.step(SignedDuration::from_secs(2));
    assert_eq!(stopwatch.elapsed(), SignedDuration::from_secs(2));

    // Schedule a timer 1000 seconds out, then burn through the queue.
    let rx = clock.after(SignedDuration::from_secs(1000));
    clock.fastforward();

    // The timer fired without waiting for real time to pass.
    let fired_at = rx.try_recv()?;
    println!("timer fired at {fired_at}");

    // The clock can be re-anchored to any wall-clock instant.
    clock.set_rfc3339("2024-08-06T21:30:00Z")?;
    println!("the clock now reads {}", clock.now_rfc3339());

    Ok(())
}
