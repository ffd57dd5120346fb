// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crossbeam_channel::Receiver;

use crate::schedule::{EventId, FireAction, Schedule, Timekeeper, sleep_via};
use crate::traits::{Clock, ReferenceClock, ReferenceTimer, TimePoint, TimeSpan};
use crate::{Ticker, Timer};

/// A clock that tracks a reference clock with a configurable offset and
/// scale.
///
/// The relative clock reports a *local* timeline derived from its reference:
/// while the clock is active, local time advances by `scale` units per unit
/// of reference time. The clock can be started, stopped, re-anchored
/// ([`RelativeClock::set`]), stepped and rescaled at runtime, and the whole
/// timer/ticker surface operates on the local timeline — a timer scheduled
/// 100ms out fires after 50ms of reference time when the scale is `2.0`, and
/// never fires by elapse of reference time when the clock is paused.
///
/// # Flow of time
///
/// The clock keeps a *sync point*: the pair of the last reference instant it
/// looked at and the local instant that held then. Reads project the current
/// reference time through the sync point lazily, so `now` costs a reference
/// read plus arithmetic; there is no background task updating the clock.
/// Scaled intervals round-trip through floating-point seconds, so very large
/// intervals may lose sub-second precision.
///
/// A scale of `0.0` pauses the local timeline even while the clock is
/// active. A negative scale runs local time backwards relative to the
/// reference; pending events can then only fire through explicit
/// [`RelativeClock::set`] or [`RelativeClock::step`].
///
/// # Driving pending events
///
/// The clock keeps a single one-shot timer armed on its reference — the
/// *waker* — targeted at the earliest pending local event. Whenever the
/// reference fires it, the clock refreshes its sync point, fires everything
/// that became due (in firing-time order; ties are unspecified), and re-arms
/// for the new queue head. A late callback drains every overdue event in one
/// pass, so no event fires before its time and every event has fired by the
/// first wake after its time.
///
/// # State sharing
///
/// Cloning is cheap and clones share one timeline, like the clocks handed
/// out by this crate's other schedulers.
///
/// # Stacking
///
/// `RelativeClock` itself implements [`ReferenceClock`], so a relative clock
/// can serve as the reference of another relative clock; the scales compose.
///
/// # Examples
///
/// ```
/// use skew::{Delta, RelativeClock, SteppedClock, Tick};
///
/// let reference = SteppedClock::new();
/// let clock = RelativeClock::new(reference.clone(), Tick::ZERO, 2.0);
/// clock.start();
///
/// let rx = clock.after(Delta::from_nanos(200));
///
/// // 100ns of reference time is 200ns of local time at scale 2.
/// reference.step(Delta::from_nanos(100));
/// assert_eq!(rx.try_recv(), Ok(Tick::from_nanos(200)));
/// ```
pub struct RelativeClock<T, D, R>(Arc<RelativeInner<T, D, R>>)
where
    T: TimePoint<D>,
    D: TimeSpan,
    R: ReferenceClock<T, D>;

impl<T, D, R> Clone for RelativeClock<T, D, R>
where
    T: TimePoint<D>,
    D: TimeSpan,
    R: ReferenceClock<T, D>,
{
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T, D, R> fmt::Debug for RelativeClock<T, D, R>
where
    T: TimePoint<D>,
    D: TimeSpan,
    R: ReferenceClock<T, D>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelativeClock").finish_non_exhaustive()
    }
}

struct RelativeInner<T, D, R>
where
    T: TimePoint<D>,
    D: TimeSpan,
    R: ReferenceClock<T, D>,
{
    reference: R,
    weak: Weak<Self>,
    state: Mutex<RelativeState<T, D, R::Timer>>,
}

struct RelativeState<T, D, RT> {
    /// Rate of local time per unit of reference time. `0.0` pauses the
    /// local timeline even while `active`.
    scale: f64,
    /// Whether the clock is currently tracking the reference.
    active: bool,
    /// The sync point: the local instant believed to hold at `now_ref`.
    now_local: T,
    now_ref: T,
    schedule: Schedule<T, D>,
    /// The reference timer driving pending events, kept around for re-arming
    /// even while disarmed.
    waker: Option<RT>,
    /// Local firing time the waker is currently armed for. `None` while the
    /// waker is disarmed, spent, or stale after a transform change.
    wake_at: Option<T>,
}

impl<T, D, R> RelativeClock<T, D, R>
where
    T: TimePoint<D>,
    D: TimeSpan,
    R: ReferenceClock<T, D>,
{
    /// Creates a clock whose local time reads `at` right now, advancing at
    /// `scale` once started. The clock starts out stopped; call
    /// [`RelativeClock::start`] to begin tracking the reference.
    #[must_use]
    pub fn new(reference: R, at: T, scale: f64) -> Self {
        let now_ref = reference.now();
        Self(Arc::new_cyclic(|weak| RelativeInner {
            reference,
            weak: weak.clone(),
            state: Mutex::new(RelativeState {
                scale,
                active: false,
                now_local: at,
                now_ref,
                schedule: Schedule::default(),
                waker: None,
                wake_at: None,
            }),
        }))
    }

    /// The current local time.
    #[must_use]
    pub fn now(&self) -> T {
        let mut state = self.0.lock();
        let now = self.0.reference.now();
        self.0.advance_ref(&mut state, now);
        state.now_local
    }

    /// The local time elapsed since `t`.
    #[must_use]
    pub fn since(&self, t: T) -> D {
        self.now().sub(t)
    }

    /// The local span until `t`.
    #[must_use]
    pub fn until(&self, t: T) -> D {
        t.sub(self.now())
    }

    /// Begins tracking the reference clock. Starting a running clock is a
    /// no-op.
    pub fn start(&self) {
        let mut state = self.0.lock();
        let now = self.0.reference.now();
        self.0.advance_ref(&mut state, now);
        state.active = true;
        self.0.reset_waker(&mut state);
    }

    /// Stops tracking the reference clock; local time holds still until the
    /// next [`RelativeClock::start`], [`RelativeClock::set`] or
    /// [`RelativeClock::step`]. Stopping a stopped clock is a no-op.
    pub fn stop(&self) {
        let mut state = self.0.lock();
        let now = self.0.reference.now();
        self.0.advance_ref(&mut state, now);
        state.active = false;
        self.0.reset_waker(&mut state);
    }

    /// Whether the clock is currently tracking its reference.
    #[must_use]
    pub fn active(&self) -> bool {
        self.0.lock().active
    }

    /// The current scale.
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.0.lock().scale
    }

    /// Changes the rate of local time per unit of reference time. The local
    /// time already accumulated is unaffected.
    pub fn set_scale(&self, scale: f64) {
        let mut state = self.0.lock();
        let now = self.0.reference.now();
        self.0.advance_ref(&mut state, now);
        state.scale = scale;
        // The local-to-reference mapping changed; the armed target is stale.
        state.wake_at = None;
        self.0.reset_waker(&mut state);
    }

    /// Firing time of the earliest pending local event, if any.
    #[must_use]
    pub fn next_at(&self) -> Option<T> {
        self.0.lock().schedule.peek_when()
    }

    /// Re-anchors local time to `now` at the current reference instant and
    /// fires everything that became due.
    ///
    /// A value earlier than the current local time is accepted, but doing so
    /// while timers are pending leads to undefined event ordering.
    pub fn set(&self, now: T) {
        let deferred = {
            let mut state = self.0.lock();
            state.now_local = now;
            state.now_ref = self.0.reference.now();
            state.wake_at = None;
            let deferred = state.schedule.fire_due(now);
            self.0.reset_waker(&mut state);
            deferred
        };
        run_deferred(deferred);
    }

    /// Advances local time by `d` and fires everything that became due. A
    /// negative `d` regresses the clock, with the same caveat as
    /// [`RelativeClock::set`].
    pub fn step(&self, d: D) {
        let deferred = {
            let mut state = self.0.lock();
            let now = self.0.reference.now();
            self.0.advance_ref(&mut state, now);
            state.now_local = state.now_local.add(d);
            state.wake_at = None;
            let local = state.now_local;
            let deferred = state.schedule.fire_due(local);
            self.0.reset_waker(&mut state);
            deferred
        };
        run_deferred(deferred);
    }

    /// Blocks the calling thread for at least `d` of local time. A zero or
    /// negative `d` returns immediately.
    ///
    /// The sleep is not interruptible; on a paused clock it lasts until
    /// someone advances local time past the deadline.
    pub fn sleep(&self, d: D) {
        sleep_via(&*self.0, d);
    }

    /// Creates a [`Timer`] that sends the local time on its channel once `d`
    /// of local time has elapsed.
    pub fn new_timer(&self, d: D) -> Timer<T, D> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let id = self.schedule_send(d, None, tx, false);
        Timer::new(self.keeper(), id, Some(rx))
    }

    /// Convenience for [`RelativeClock::new_timer`] when only the channel is
    /// needed.
    pub fn after(&self, d: D) -> Receiver<T> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.schedule_send(d, None, tx, true);
        rx
    }

    /// Runs `f` on its own thread once `d` of local time has elapsed. The
    /// returned [`Timer`] can cancel or re-arm the call; it has no channel.
    pub fn after_func<F>(&self, d: D, f: F) -> Timer<T, D>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.schedule_action(d, FireAction::Spawn(Arc::new(f)));
        Timer::bare(self.keeper(), id)
    }

    /// Creates a [`Ticker`] that sends the local time on its channel every
    /// `d` of local time.
    ///
    /// # Panics
    ///
    /// Panics when `d` is zero or negative.
    pub fn new_ticker(&self, d: D) -> Ticker<T, D> {
        assert!(d.seconds() > 0.0, "non-positive interval for new_ticker");

        let (tx, rx) = crossbeam_channel::bounded(1);
        let id = self.schedule_send(d, Some(d), tx, false);
        Ticker::new(self.keeper(), id, rx)
    }

    /// Convenience for [`RelativeClock::new_ticker`] when only the channel
    /// is needed. Returns `None` when `d` is zero or negative; the
    /// underlying ticker can never be stopped and lives for the lifetime of
    /// the clock.
    pub fn tick(&self, d: D) -> Option<Receiver<T>> {
        if d.seconds() <= 0.0 {
            return None;
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        self.schedule_send(d, Some(d), tx, true);
        Some(rx)
    }

    fn schedule_send(
        &self,
        d: D,
        period: Option<D>,
        tx: crossbeam_channel::Sender<T>,
        orphaned: bool,
    ) -> EventId {
        let mut state = self.0.lock();
        let now = self.0.reference.now();
        self.0.advance_ref(&mut state, now);
        let when = state.now_local.add(d);
        let id = state
            .schedule
            .create(when, period, FireAction::Send(tx), orphaned);
        state.schedule.insert(id);
        self.0.reset_waker(&mut state);
        id
    }

    fn schedule_action(&self, d: D, action: FireAction<T>) -> EventId {
        let mut state = self.0.lock();
        let now = self.0.reference.now();
        self.0.advance_ref(&mut state, now);
        let when = state.now_local.add(d);
        let id = state.schedule.create(when, None, action, false);
        state.schedule.insert(id);
        self.0.reset_waker(&mut state);
        id
    }

    fn keeper(&self) -> Arc<dyn Timekeeper<T, D>> {
        Arc::clone(&self.0) as Arc<dyn Timekeeper<T, D>>
    }

    /// Local firing time the waker is currently armed for. Test-only.
    #[cfg(test)]
    pub(crate) fn wake_target(&self) -> Option<T> {
        self.0.lock().wake_at
    }
}

fn run_deferred(deferred: Vec<Arc<dyn Fn() + Send + Sync>>) {
    for callback in deferred {
        callback();
    }
}

impl<T, D, R> RelativeInner<T, D, R>
where
    T: TimePoint<D>,
    D: TimeSpan,
    R: ReferenceClock<T, D>,
{
    fn lock(&self) -> MutexGuard<'_, RelativeState<T, D, R::Timer>> {
        self.state
            .lock()
            .expect("acquiring lock must always succeed")
    }

    /// Moves the sync point to the reference instant `now`.
    ///
    /// Must run before any change to `scale`, `active` or `now_local` and
    /// before any read of `now_local`; fields that affect how the reference
    /// is tracked must not change between syncs. Keeping both halves of the
    /// sync point in lockstep also keeps an armed waker target valid, which
    /// is what lets `reset_waker` skip re-arming for an unchanged head.
    #[expect(
        clippy::float_cmp,
        reason = "scale short-circuits are exact sentinel comparisons, not arithmetic"
    )]
    fn advance_ref(&self, state: &mut RelativeState<T, D, R::Timer>, now: T) {
        let then = state.now_ref;
        state.now_ref = now;

        // No local change if stopped, paused, or the reference hasn't moved.
        if !state.active || state.scale == 0.0 || now == then {
            return;
        }

        let mut dt = now.sub(then);
        if state.scale != 1.0 {
            dt = self.reference.seconds(dt.seconds() * state.scale);
        }
        state.now_local = state.now_local.add(dt);
    }

    /// Re-arms the reference timer for the current queue head, or disarms it
    /// when the clock cannot fire by elapse of reference time.
    fn reset_waker(&self, state: &mut RelativeState<T, D, R::Timer>) {
        let runnable = state.active && state.scale > 0.0;
        let Some(head) = state.schedule.peek_when().filter(|_| runnable) else {
            if let Some(waker) = state.waker.as_mut() {
                let _ = waker.stop();
            }
            if state.wake_at.take().is_some() {
                tracing::trace!("waker disarmed");
            }
            return;
        };

        if state.waker.is_some() && state.wake_at == Some(head) {
            return;
        }

        // Reference-clock duration until the head should fire.
        let dt = self
            .reference
            .seconds(head.sub(state.now_local).seconds() / state.scale);

        match state.waker.as_mut() {
            Some(waker) => {
                let _ = waker.reset(dt);
            }
            None => {
                let weak = self.weak.clone();
                state.waker = Some(self.reference.after_func(
                    dt,
                    Arc::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.on_wake();
                        }
                    }),
                ));
            }
        }
        state.wake_at = Some(head);
        tracing::trace!("waker armed for the queue head");
    }

    /// Runs whenever the armed reference timer fires.
    fn on_wake(&self) {
        let deferred = {
            let mut state = self.lock();
            let now = self.reference.now();
            // Don't step backwards if this callback was delivered late.
            if now.after(state.now_ref) {
                self.advance_ref(&mut state, now);
            }
            // The one-shot that woke us is spent; never short-circuit on it.
            state.wake_at = None;
            let local = state.now_local;
            let deferred = state.schedule.fire_due(local);
            tracing::trace!("woke and drained due events");
            self.reset_waker(&mut state);
            deferred
        };
        run_deferred(deferred);
    }
}

impl<T, D, R> Timekeeper<T, D> for RelativeInner<T, D, R>
where
    T: TimePoint<D>,
    D: TimeSpan,
    R: ReferenceClock<T, D>,
{
    fn with_schedule(&self, f: &mut dyn FnMut(T, &mut Schedule<T, D>)) {
        let mut state = self.lock();
        let now = self.reference.now();
        self.advance_ref(&mut state, now);
        let local = state.now_local;
        f(local, &mut state.schedule);
        self.reset_waker(&mut state);
    }

    fn release(&self, id: EventId) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.schedule.release(id);
    }
}

impl<T, D, R> Clock for RelativeClock<T, D, R>
where
    T: TimePoint<D>,
    D: TimeSpan,
    R: ReferenceClock<T, D>,
{
    type Time = T;
    type Span = D;

    fn now(&self) -> T {
        RelativeClock::now(self)
    }

    fn sleep(&self, d: D) {
        RelativeClock::sleep(self, d);
    }

    fn new_timer(&self, d: D) -> Timer<T, D> {
        RelativeClock::new_timer(self, d)
    }

    fn after(&self, d: D) -> Receiver<T> {
        RelativeClock::after(self, d)
    }

    fn after_func<F>(&self, d: D, f: F) -> Timer<T, D>
    where
        F: Fn() + Send + Sync + 'static,
    {
        RelativeClock::after_func(self, d, f)
    }

    fn new_ticker(&self, d: D) -> Ticker<T, D> {
        RelativeClock::new_ticker(self, d)
    }

    fn tick(&self, d: D) -> Option<Receiver<T>> {
        RelativeClock::tick(self, d)
    }
}

/// A relative clock can itself be the reference of another relative clock;
/// the scales compose and `seconds` re-exposes the underlying reference's
/// span constructor.
impl<T, D, R> ReferenceClock<T, D> for RelativeClock<T, D, R>
where
    T: TimePoint<D>,
    D: TimeSpan,
    R: ReferenceClock<T, D>,
{
    type Timer = Timer<T, D>;

    fn now(&self) -> T {
        RelativeClock::now(self)
    }

    fn seconds(&self, secs: f64) -> D {
        self.0.reference.seconds(secs)
    }

    fn after_func(&self, d: D, f: Arc<dyn Fn() + Send + Sync>) -> Timer<T, D> {
        let id = self.schedule_action(d, FireAction::Callback(f));
        Timer::bare(self.keeper(), id)
    }
}
