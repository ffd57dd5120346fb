// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// This example runs a small heartbeat simulation at 60x real speed: one
// simulated minute of heartbeats arrives in about one real second.

use std::error::Error;
use std::time::Duration;

use jiff::SignedDuration;
use skew::VirtualClock;

fn main() -> Result<(), Box<dyn Error>> {
    let clock = VirtualClock::new();
    clock.set_scale(60.0);
    clock.start();

    let heartbeats = clock.tick(SignedDuration::from_secs(10)).expect("positive period");

    // Six simulated heartbeats, ten simulated seconds apart.
    for _ in 0..6 {
        let beat = heartbeats.recv_timeout(Duration::from_secs(5))?;
        println!("heartbeat at simulated {beat}");
    }

    println!("one simulated minute took about a real second");
    Ok(())
}
