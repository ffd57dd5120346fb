// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(
    test,
    allow(
        clippy::float_cmp,
        clippy::arithmetic_side_effects,
        reason = "Allow these lints in tests to improve the readability of the tests"
    )
)]

//! Virtual clocks: scheduler objects with the familiar timer/ticker API
//! whose flow of time can be detached from wall-clock time.
//!
//! Code that talks to the system clock directly is notoriously difficult to
//! test — sleeps slow the suite down and timer-driven logic turns flaky.
//! This crate turns the flow of time into a value you control:
//!
//! - [`RelativeClock`]. The core: a clock that tracks any reference clock
//!     with a configurable offset and scale. It can run faster or slower
//!     than its reference, pause, re-anchor, step, and drive timers and
//!     tickers on its own local timeline.
//! - [`SteppedClock`]. A simulation clock over bare nanosecond ticks
//!     ([`Tick`] / [`Delta`]) that advances only when explicitly stepped.
//!     Ideal as the reference of a [`RelativeClock`] in deterministic tests.
//! - [`VirtualClock`]. A drop-in wall-clock replacement: a relative clock
//!     anchored to the host's real clock ([`SystemClock`]), reporting
//!     [`jiff::Timestamp`] values, with [`VirtualClock::fastforward`] to
//!     burn through pending timers.
//! - [`Clock`]. The trait unifying the user-facing surface, so code can be
//!     written against "some clock" and tested against a controlled one.
//! - [`Stopwatch`]. Elapsed-time measurement over any [`Clock`].
//!
//! # Scale
//!
//! The scale is the rate of local time per unit of reference time: `1.0` is
//! realtime, `2.0` runs twice as fast, `0.0` pauses the clock even while it
//! is started, and a negative scale runs local time backwards. Scaled
//! intervals round-trip through floating-point seconds, so very large
//! intervals may lose sub-second precision.
//!
//! # Delivery semantics
//!
//! Timers and tickers deliver the local fire time on capacity-1 channels
//! with non-blocking sends: a slow consumer sees dropped ticks, never a
//! stall, and no fire ever happens before its scheduled time. `after_func`
//! callbacks run on their own thread.
//!
//! # Examples
//!
//! ### Deterministic timers over a stepped reference
//!
//! ```
//! use skew::{Delta, RelativeClock, SteppedClock, Tick};
//!
//! let reference = SteppedClock::new();
//! let clock = RelativeClock::new(reference.clone(), Tick::ZERO, 1.0);
//! clock.start();
//!
//! let rx = clock.after(Delta::from_nanos(100));
//!
//! reference.step(Delta::from_nanos(99));
//! assert!(rx.try_recv().is_err());
//!
//! reference.step(Delta::from_nanos(1));
//! assert_eq!(rx.try_recv(), Ok(Tick::from_nanos(100)));
//! ```
//!
//! ### A controllable wall clock
//!
//! ```
//! use jiff::SignedDuration;
//! use skew::VirtualClock;
//!
//! let clock = VirtualClock::new();
//! let rx = clock.after(SignedDuration::from_secs(3600));
//!
//! // An hour passes in no time at all.
//! clock.step(SignedDuration::from_secs(3600));
//! assert!(rx.try_recv().is_ok());
//! ```

mod error;
mod relative;
mod schedule;
mod stepped;
mod stopwatch;
mod system;
mod ticker;
mod timer;
mod traits;
mod virtual_clock;

pub use error::*;
pub use relative::*;
pub use stepped::*;
pub use stopwatch::*;
pub use system::*;
pub use ticker::*;
pub use timer::*;
pub use traits::*;
pub use virtual_clock::*;
