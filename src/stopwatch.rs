// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::traits::Clock;

/// A stopwatch that facilitates the measurement of elapsed time on any
/// [`Clock`].
///
/// The stopwatch captures the clock's current time at construction; the
/// measurement follows the clock it was created on, so on a paused
/// [`VirtualClock`][crate::VirtualClock] it reads zero until someone moves
/// time forward.
///
/// # Examples
///
/// ```
/// use skew::{Delta, SteppedClock, Stopwatch};
///
/// let clock = SteppedClock::new();
/// let watch = Stopwatch::with_clock(&clock);
///
/// clock.step(Delta::from_millis(250));
/// assert_eq!(watch.elapsed(), Delta::from_millis(250));
/// ```
#[derive(Debug)]
pub struct Stopwatch<C: Clock + Clone> {
    clock: C,
    start: C::Time,
}

impl<C: Clock + Clone> Stopwatch<C> {
    /// Creates a stopwatch measuring from the clock's current time.
    #[must_use]
    pub fn with_clock(clock: &C) -> Self {
        Self {
            clock: clock.clone(),
            start: clock.now(),
        }
    }

    /// Returns the elapsed time since the stopwatch was created.
    #[must_use]
    pub fn elapsed(&self) -> C::Span {
        self.clock.since(self.start)
    }
}

#[cfg(test)]
mod tests {
    use jiff::SignedDuration;

    use super::*;
    use crate::stepped::{Delta, SteppedClock};
    use crate::virtual_clock::VirtualClock;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Stopwatch<SteppedClock>: Send, Sync);
    }

    #[test]
    fn measures_stepped_time() {
        let clock = SteppedClock::new();
        let watch = Stopwatch::with_clock(&clock);

        assert_eq!(watch.elapsed(), Delta::ZERO);

        clock.step(Delta::from_secs(3));
        assert_eq!(watch.elapsed(), Delta::from_secs(3));
    }

    #[test]
    fn follows_a_paused_virtual_clock() {
        let clock = VirtualClock::new();
        let watch = Stopwatch::with_clock(&clock);

        std::thread::sleep(std::time::Duration::from_millis(2));
        assert_eq!(watch.elapsed(), SignedDuration::ZERO);

        clock.step(SignedDuration::from_secs(1));
        assert_eq!(watch.elapsed(), SignedDuration::from_secs(1));
    }
}
