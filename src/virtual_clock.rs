// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::thread;

use crossbeam_channel::Receiver;
use jiff::{SignedDuration, Timestamp};

use crate::traits::Clock;
use crate::{Error, RelativeClock, Result, SystemClock, Ticker, Timer};

/// A drop-in wall-clock replacement whose flow of time is controllable.
///
/// A `VirtualClock` is a [`RelativeClock`] anchored to the host's real clock
/// ([`SystemClock`]), reporting [`jiff::Timestamp`] values. While started it
/// tracks real time at the configured scale; it can be paused, stepped,
/// re-anchored and rescaled at any point, and its timers and tickers fire on
/// the virtual timeline.
///
/// A newly created clock is stopped at [`Timestamp::UNIX_EPOCH`] with scale
/// `1.0`; call [`VirtualClock::start`] to let time flow.
///
/// # Examples
///
/// ### Deterministic time in tests
///
/// ```
/// use jiff::SignedDuration;
/// use skew::VirtualClock;
///
/// let clock = VirtualClock::new();
///
/// let before = clock.now();
/// clock.step(SignedDuration::from_secs(90));
///
/// assert_eq!(clock.now().duration_since(before), SignedDuration::from_secs(90));
/// ```
///
/// ### Running faster than reality
///
/// ```no_run
/// use jiff::SignedDuration;
/// use skew::VirtualClock;
///
/// let clock = VirtualClock::new();
/// clock.set_scale(60.0);
/// clock.start();
///
/// // One real second from now, this fires claiming a minute has passed.
/// let rx = clock.after(SignedDuration::from_secs(60));
/// # drop(rx);
/// ```
#[derive(Debug, Clone)]
pub struct VirtualClock {
    inner: RelativeClock<Timestamp, SignedDuration, SystemClock>,
}

impl Default for VirtualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualClock {
    /// Creates a stopped clock anchored at [`Timestamp::UNIX_EPOCH`] with
    /// scale `1.0`.
    #[must_use]
    pub fn new() -> Self {
        Self::new_at(Timestamp::UNIX_EPOCH)
    }

    /// Creates a stopped clock anchored at `at` with scale `1.0`.
    #[must_use]
    pub fn new_at(at: Timestamp) -> Self {
        Self {
            inner: RelativeClock::new(SystemClock::new(), at, 1.0),
        }
    }

    /// The current virtual time.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.inner.now()
    }

    /// The virtual time elapsed since `t`.
    #[must_use]
    pub fn since(&self, t: Timestamp) -> SignedDuration {
        self.inner.since(t)
    }

    /// The virtual span until `t`.
    #[must_use]
    pub fn until(&self, t: Timestamp) -> SignedDuration {
        self.inner.until(t)
    }

    /// Begins tracking real time.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Pauses the clock; virtual time holds still.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Whether the clock is currently tracking real time.
    #[must_use]
    pub fn active(&self) -> bool {
        self.inner.active()
    }

    /// The current scale.
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.inner.scale()
    }

    /// Changes the rate of virtual time per unit of real time.
    pub fn set_scale(&self, scale: f64) {
        self.inner.set_scale(scale);
    }

    /// Re-anchors virtual time to `now`.
    pub fn set(&self, now: Timestamp) {
        self.inner.set(now);
    }

    /// Advances virtual time by `d`, firing everything that became due.
    pub fn step(&self, d: SignedDuration) {
        self.inner.step(d);
    }

    /// Firing time of the earliest pending event, if any.
    #[must_use]
    pub fn next_at(&self) -> Option<Timestamp> {
        self.inner.next_at()
    }

    /// Steps virtual time from event to event until none remain, yielding
    /// between steps so fired callbacks get a chance to run, then restores
    /// the previous started/stopped state.
    ///
    /// A live [`Ticker`] keeps the queue permanently non-empty, so
    /// fastforwarding a clock with a running ticker never returns.
    pub fn fastforward(&self) {
        let was_active = self.inner.active();
        self.inner.stop();

        while let Some(next) = self.inner.next_at() {
            let mut dt = next.duration_since(self.inner.now());
            if dt.is_negative() {
                dt = SignedDuration::ZERO;
            }
            tracing::trace!("fastforwarding to the next pending event");
            self.inner.step(dt);
            thread::yield_now();
        }

        if was_active {
            self.inner.start();
        }
    }

    /// The current virtual time rendered as an RFC 3339 timestamp in UTC.
    #[must_use]
    pub fn now_rfc3339(&self) -> String {
        self.now().to_string()
    }

    /// Re-anchors virtual time to an RFC 3339 timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error when `timestamp` cannot be parsed.
    pub fn set_rfc3339(&self, timestamp: &str) -> Result<()> {
        let parsed: Timestamp = timestamp.parse().map_err(Error::from_jiff)?;
        self.set(parsed);
        Ok(())
    }

    /// Blocks the calling thread for at least `d` of virtual time.
    pub fn sleep(&self, d: SignedDuration) {
        self.inner.sleep(d);
    }

    /// Creates a [`Timer`] on the virtual timeline.
    pub fn new_timer(&self, d: SignedDuration) -> Timer<Timestamp, SignedDuration> {
        self.inner.new_timer(d)
    }

    /// Convenience for [`VirtualClock::new_timer`] when only the channel is
    /// needed.
    pub fn after(&self, d: SignedDuration) -> Receiver<Timestamp> {
        self.inner.after(d)
    }

    /// Runs `f` on its own thread once `d` of virtual time has elapsed.
    pub fn after_func<F>(&self, d: SignedDuration, f: F) -> Timer<Timestamp, SignedDuration>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.after_func(d, f)
    }

    /// Creates a [`Ticker`] on the virtual timeline.
    ///
    /// # Panics
    ///
    /// Panics when `d` is zero or negative.
    pub fn new_ticker(&self, d: SignedDuration) -> Ticker<Timestamp, SignedDuration> {
        self.inner.new_ticker(d)
    }

    /// Convenience for [`VirtualClock::new_ticker`] when only the channel is
    /// needed. Returns `None` when `d` is zero or negative.
    pub fn tick(&self, d: SignedDuration) -> Option<Receiver<Timestamp>> {
        self.inner.tick(d)
    }
}

impl Clock for VirtualClock {
    type Time = Timestamp;
    type Span = SignedDuration;

    fn now(&self) -> Timestamp {
        VirtualClock::now(self)
    }

    fn sleep(&self, d: SignedDuration) {
        VirtualClock::sleep(self, d);
    }

    fn new_timer(&self, d: SignedDuration) -> Timer<Timestamp, SignedDuration> {
        VirtualClock::new_timer(self, d)
    }

    fn after(&self, d: SignedDuration) -> Receiver<Timestamp> {
        VirtualClock::after(self, d)
    }

    fn after_func<F>(&self, d: SignedDuration, f: F) -> Timer<Timestamp, SignedDuration>
    where
        F: Fn() + Send + Sync + 'static,
    {
        VirtualClock::after_func(self, d, f)
    }

    fn new_ticker(&self, d: SignedDuration) -> Ticker<Timestamp, SignedDuration> {
        VirtualClock::new_ticker(self, d)
    }

    fn tick(&self, d: SignedDuration) -> Option<Receiver<Timestamp>> {
        VirtualClock::tick(self, d)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(VirtualClock: Send, Sync, Clone);
    }

    #[test]
    fn stopped_clock_reads_a_constant_time() {
        let clock = VirtualClock::new();

        let first = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(clock.now(), first);
        assert_eq!(first, Timestamp::UNIX_EPOCH);
    }

    #[test]
    fn started_clock_tracks_real_time() {
        let clock = VirtualClock::new();
        clock.start();

        let first = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now() > first);
    }

    #[test]
    fn step_fires_due_timers() {
        let clock = VirtualClock::new();
        let rx = clock.after(SignedDuration::from_secs(5));

        clock.step(SignedDuration::from_secs(5));

        let fired_at = rx.try_recv().expect("timer must fire");
        assert_eq!(fired_at, Timestamp::UNIX_EPOCH.checked_add(SignedDuration::from_secs(5)).unwrap());
    }

    #[test]
    fn fastforward_drains_every_pending_timer() {
        let clock = VirtualClock::new();
        let near = clock.after(SignedDuration::from_secs(10));
        let far = clock.after(SignedDuration::from_secs(20));

        clock.fastforward();

        assert!(near.try_recv().is_ok());
        assert!(far.try_recv().is_ok());
        assert_eq!(
            clock.now(),
            Timestamp::UNIX_EPOCH.checked_add(SignedDuration::from_secs(20)).unwrap()
        );
        assert_eq!(clock.next_at(), None);
    }

    #[test]
    fn fastforward_restores_the_running_state() {
        let clock = VirtualClock::new();
        let _rx = clock.after(SignedDuration::from_secs(1));
        clock.start();

        clock.fastforward();
        assert!(clock.active());

        clock.stop();
        clock.fastforward();
        assert!(!clock.active());
    }

    #[test]
    fn rfc3339_round_trip() {
        let clock = VirtualClock::new();
        clock
            .set_rfc3339("2024-08-06T21:30:00Z")
            .expect("valid timestamp must parse");

        assert_eq!(clock.now_rfc3339(), "2024-08-06T21:30:00Z");
        assert!(clock.set_rfc3339("not a timestamp").is_err());
    }

    #[test]
    fn scale_delegation_round_trip() {
        let clock = VirtualClock::new();
        assert_eq!(clock.scale(), 1.0);

        clock.set_scale(0.0);
        assert_eq!(clock.scale(), 0.0);
        assert!(!clock.active());
    }

    #[test]
    fn since_and_until_measure_virtual_spans() {
        let clock = VirtualClock::new();
        let anchor = clock.now();

        clock.step(SignedDuration::from_secs(30));

        assert_eq!(clock.since(anchor), SignedDuration::from_secs(30));
        assert_eq!(
            clock.until(anchor.checked_add(SignedDuration::from_secs(45)).unwrap()),
            SignedDuration::from_secs(15)
        );
    }
}
