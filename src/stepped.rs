// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, Mutex};

use crossbeam_channel::Receiver;

use crate::schedule::{EventId, FireAction, Schedule, Timekeeper, sleep_via};
use crate::traits::{Clock, ReferenceClock, TimePoint, TimeSpan};
use crate::{Ticker, Timer};

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// An instant of simulation time: nanoseconds since the start of the clock.
///
/// A `Tick` has no calendar structure; it exists to make time-dependent
/// logic deterministic. Arithmetic saturates at the ends of the `i64` range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(i64);

impl Tick {
    /// The start of the clock.
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl TimePoint<Delta> for Tick {
    fn add(self, d: Delta) -> Self {
        Self(self.0.saturating_add(d.as_nanos()))
    }

    fn sub(self, earlier: Self) -> Delta {
        Delta::from_nanos(self.0.saturating_sub(earlier.0))
    }

    fn after(self, other: Self) -> bool {
        self > other
    }

    fn before(self, other: Self) -> bool {
        self < other
    }

    fn is_zero(self) -> bool {
        self.0 == 0
    }
}

/// A signed span of simulation time, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Delta(i64);

impl Delta {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros.saturating_mul(1_000))
    }

    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    /// Converts floating-point seconds, saturating at the `i64` nanosecond
    /// range. A NaN input maps to zero.
    #[must_use]
    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * NANOS_PER_SEC) as i64)
    }

    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }
}

impl TimeSpan for Delta {
    fn seconds(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC
    }
}

/// A simulation clock that only advances when explicitly stepped.
///
/// The clock is thread-safe, and clones share the same timeline. Besides the
/// ordinary timer surface it implements [`ReferenceClock`], so it can drive
/// a [`RelativeClock`][crate::RelativeClock]: stepping this clock fires the
/// relative clock's pending events deterministically on the stepping thread.
///
/// # Examples
///
/// ```
/// use skew::{Delta, SteppedClock, Tick};
///
/// let clock = SteppedClock::new();
/// let rx = clock.after(Delta::from_millis(3));
///
/// clock.step(Delta::from_millis(3));
/// assert_eq!(rx.try_recv(), Ok(Tick::from_nanos(3_000_000)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct SteppedClock(Arc<SteppedInner>);

#[derive(Debug, Default)]
struct SteppedInner {
    state: Mutex<SteppedState>,
}

#[derive(Debug, Default)]
struct SteppedState {
    now: Tick,
    schedule: Schedule<Tick, Delta>,
}

impl SteppedClock {
    /// Creates a clock whose time starts at [`Tick::ZERO`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock whose time starts at `at`.
    #[must_use]
    pub fn new_at(at: Tick) -> Self {
        let clock = Self::default();
        clock
            .0
            .lock()
            .now = at;
        clock
    }

    /// The current time.
    #[must_use]
    pub fn now(&self) -> Tick {
        self.0.lock().now
    }

    /// The time elapsed since `t`.
    #[must_use]
    pub fn since(&self, t: Tick) -> Delta {
        self.now().sub(t)
    }

    /// The span until `t`.
    #[must_use]
    pub fn until(&self, t: Tick) -> Delta {
        t.sub(self.now())
    }

    /// Firing time of the earliest pending event, if any.
    #[must_use]
    pub fn next_at(&self) -> Option<Tick> {
        self.0.lock().schedule.peek_when()
    }

    /// Sets the current time to `now` and fires everything that became due.
    ///
    /// A value earlier than the current time is accepted, but doing so while
    /// timers are pending leads to undefined event ordering.
    pub fn set(&self, now: Tick) {
        let deferred = {
            let mut state = self.0.lock();
            state.now = now;
            state.schedule.fire_due(now)
        };
        for callback in deferred {
            callback();
        }
    }

    /// Advances the current time by `d` and fires everything that became
    /// due. A negative `d` regresses the clock, with the same caveat as
    /// [`SteppedClock::set`].
    pub fn step(&self, d: Delta) {
        let deferred = {
            let mut state = self.0.lock();
            state.now = state.now.add(d);
            let now = state.now;
            state.schedule.fire_due(now)
        };
        for callback in deferred {
            callback();
        }
    }

    /// Blocks the calling thread until at least `d` has been stepped past on
    /// this clock. A zero or negative `d` returns immediately.
    pub fn sleep(&self, d: Delta) {
        sleep_via(&*self.0, d);
    }

    /// Creates a [`Timer`] that sends the current time on its channel once
    /// `d` has elapsed.
    pub fn new_timer(&self, d: Delta) -> Timer<Tick, Delta> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let id = self.schedule_send(d, None, tx, false);
        Timer::new(self.keeper(), id, Some(rx))
    }

    /// Convenience for [`SteppedClock::new_timer`] when only the channel is
    /// needed.
    pub fn after(&self, d: Delta) -> Receiver<Tick> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.schedule_send(d, None, tx, true);
        rx
    }

    /// Runs `f` on its own thread once `d` has elapsed. The returned
    /// [`Timer`] can cancel or re-arm the call; it has no channel.
    pub fn after_func<F>(&self, d: Delta, f: F) -> Timer<Tick, Delta>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.0.lock();
        let when = state.now.add(d);
        let id = state
            .schedule
            .create(when, None, FireAction::Spawn(Arc::new(f)), false);
        state.schedule.insert(id);
        drop(state);
        Timer::bare(self.keeper(), id)
    }

    /// Creates a [`Ticker`] that sends the current time on its channel every
    /// `d`.
    ///
    /// # Panics
    ///
    /// Panics when `d` is zero or negative.
    pub fn new_ticker(&self, d: Delta) -> Ticker<Tick, Delta> {
        assert!(d.seconds() > 0.0, "non-positive interval for new_ticker");

        let (tx, rx) = crossbeam_channel::bounded(1);
        let id = self.schedule_send(d, Some(d), tx, false);
        Ticker::new(self.keeper(), id, rx)
    }

    /// Convenience for [`SteppedClock::new_ticker`] when only the channel is
    /// needed. Returns `None` when `d` is zero or negative; the underlying
    /// ticker can never be stopped and lives for the lifetime of the clock.
    pub fn tick(&self, d: Delta) -> Option<Receiver<Tick>> {
        if d.seconds() <= 0.0 {
            return None;
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.schedule_send(d, Some(d), tx, true);
        Some(rx)
    }

    fn schedule_send(
        &self,
        d: Delta,
        period: Option<Delta>,
        tx: crossbeam_channel::Sender<Tick>,
        orphaned: bool,
    ) -> EventId {
        let mut state = self.0.lock();
        let when = state.now.add(d);
        let id = state
            .schedule
            .create(when, period, FireAction::Send(tx), orphaned);
        state.schedule.insert(id);
        id
    }

    fn keeper(&self) -> Arc<dyn Timekeeper<Tick, Delta>> {
        Arc::clone(&self.0) as Arc<dyn Timekeeper<Tick, Delta>>
    }
}

impl SteppedInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, SteppedState> {
        self.state
            .lock()
            .expect("acquiring lock must always succeed")
    }
}

impl Timekeeper<Tick, Delta> for SteppedInner {
    fn with_schedule(&self, f: &mut dyn FnMut(Tick, &mut Schedule<Tick, Delta>)) {
        let mut state = self.lock();
        let now = state.now;
        f(now, &mut state.schedule);
    }

    fn release(&self, id: EventId) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.schedule.release(id);
    }
}

impl Clock for SteppedClock {
    type Time = Tick;
    type Span = Delta;

    fn now(&self) -> Tick {
        SteppedClock::now(self)
    }

    fn sleep(&self, d: Delta) {
        SteppedClock::sleep(self, d);
    }

    fn new_timer(&self, d: Delta) -> Timer<Tick, Delta> {
        SteppedClock::new_timer(self, d)
    }

    fn after(&self, d: Delta) -> Receiver<Tick> {
        SteppedClock::after(self, d)
    }

    fn after_func<F>(&self, d: Delta, f: F) -> Timer<Tick, Delta>
    where
        F: Fn() + Send + Sync + 'static,
    {
        SteppedClock::after_func(self, d, f)
    }

    fn new_ticker(&self, d: Delta) -> Ticker<Tick, Delta> {
        SteppedClock::new_ticker(self, d)
    }

    fn tick(&self, d: Delta) -> Option<Receiver<Tick>> {
        SteppedClock::tick(self, d)
    }
}

impl ReferenceClock<Tick, Delta> for SteppedClock {
    type Timer = Timer<Tick, Delta>;

    fn now(&self) -> Tick {
        SteppedClock::now(self)
    }

    fn seconds(&self, secs: f64) -> Delta {
        Delta::from_secs_f64(secs)
    }

    fn after_func(&self, d: Delta, f: Arc<dyn Fn() + Send + Sync>) -> Timer<Tick, Delta> {
        let mut state = self.0.lock();
        let when = state.now.add(d);
        let id = state
            .schedule
            .create(when, None, FireAction::Callback(f), false);
        state.schedule.insert(id);
        drop(state);
        Timer::bare(self.keeper(), id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(SteppedClock: Send, Sync);
        static_assertions::assert_impl_all!(Tick: Send, Sync);
        static_assertions::assert_impl_all!(Delta: Send, Sync);
    }

    #[test]
    fn tick_arithmetic() {
        let t = Tick::from_nanos(100);
        assert_eq!(t.add(Delta::from_nanos(50)), Tick::from_nanos(150));
        assert_eq!(t.sub(Tick::from_nanos(30)), Delta::from_nanos(70));
        assert_eq!(Tick::from_nanos(30).sub(t), Delta::from_nanos(-70));
        assert!(t.after(Tick::from_nanos(99)));
        assert!(t.before(Tick::from_nanos(101)));
        assert!(Tick::ZERO.is_zero());
    }

    #[test]
    fn delta_conversions() {
        assert_eq!(Delta::from_secs(2).as_nanos(), 2_000_000_000);
        assert_eq!(Delta::from_millis(3).as_nanos(), 3_000_000);
        assert_eq!(Delta::from_micros(4).as_nanos(), 4_000);
        assert_eq!(Delta::from_secs_f64(0.5).as_nanos(), 500_000_000);
        assert_eq!(Delta::from_secs_f64(-1.5).as_nanos(), -1_500_000_000);
        assert_eq!(Delta::from_secs(1).seconds(), 1.0);
        assert_eq!(Delta::from_secs_f64(f64::NAN), Delta::ZERO);
    }

    #[test]
    fn step_and_set_move_time() {
        let clock = SteppedClock::new();
        assert_eq!(clock.now(), Tick::ZERO);

        clock.step(Delta::from_nanos(10));
        assert_eq!(clock.now(), Tick::from_nanos(10));

        clock.set(Tick::from_nanos(100));
        assert_eq!(clock.now(), Tick::from_nanos(100));
        assert_eq!(clock.since(Tick::from_nanos(40)), Delta::from_nanos(60));
        assert_eq!(clock.until(Tick::from_nanos(150)), Delta::from_nanos(50));
    }

    #[test]
    fn new_at_anchors_time() {
        let clock = SteppedClock::new_at(Tick::from_nanos(500));
        assert_eq!(clock.now(), Tick::from_nanos(500));
    }

    #[test]
    fn clones_share_the_timeline() {
        let clock = SteppedClock::new();
        let clone = clock.clone();

        clock.step(Delta::from_nanos(7));
        assert_eq!(clone.now(), Tick::from_nanos(7));
    }

    #[test]
    fn after_delivers_once_due() {
        let clock = SteppedClock::new();
        let rx = clock.after(Delta::from_nanos(100));

        clock.step(Delta::from_nanos(99));
        assert!(rx.try_recv().is_err());

        clock.step(Delta::from_nanos(1));
        assert_eq!(rx.try_recv(), Ok(Tick::from_nanos(100)));
    }

    #[test]
    fn tick_rejects_non_positive_interval() {
        let clock = SteppedClock::new();
        assert!(clock.tick(Delta::ZERO).is_none());
        assert!(clock.tick(Delta::from_nanos(-5)).is_none());
        assert!(clock.tick(Delta::from_nanos(5)).is_some());
    }

    #[test]
    #[should_panic(expected = "non-positive interval")]
    fn new_ticker_rejects_non_positive_interval() {
        let clock = SteppedClock::new();
        let _ = clock.new_ticker(Delta::ZERO);
    }

    #[test]
    fn sleep_blocks_until_stepped_past() {
        let clock = SteppedClock::new();
        let sleeper = {
            let clock = clock.clone();
            thread::spawn(move || clock.sleep(Delta::from_nanos(100)))
        };

        // Wait for the sleeper to enqueue its wakeup.
        while clock.next_at().is_none() {
            thread::yield_now();
        }

        clock.step(Delta::from_nanos(100));
        sleeper.join().expect("sleeper must wake");
    }

    #[test]
    fn sleep_with_non_positive_duration_returns_immediately() {
        let clock = SteppedClock::new();
        clock.sleep(Delta::ZERO);
        clock.sleep(Delta::from_nanos(-1));
    }

    #[test]
    fn after_func_runs_on_another_thread() {
        let clock = SteppedClock::new();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let _timer = clock.after_func(Delta::from_nanos(10), move || {
            let _ = tx.try_send(thread::current().id());
        });

        clock.step(Delta::from_nanos(10));

        let fired_on = rx
            .recv_timeout(Duration::from_secs(1))
            .expect("after_func must fire");
        assert_ne!(fired_on, thread::current().id());
    }

    #[test]
    fn reference_callback_runs_on_the_stepping_thread() {
        let clock = SteppedClock::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let _timer = ReferenceClock::after_func(
            &clock,
            Delta::from_nanos(10),
            Arc::new(move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        clock.step(Delta::from_nanos(9));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        clock.step(Delta::from_nanos(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reference_seconds_round_trip() {
        let clock = SteppedClock::new();
        assert_eq!(
            ReferenceClock::<Tick, Delta>::seconds(&clock, 1.5),
            Delta::from_nanos(1_500_000_000)
        );
    }
}
