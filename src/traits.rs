// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::{Ticker, Timer};

/// An instant on some timeline.
///
/// The crate is generic over the representation of time: the same scheduler
/// core drives wall-clock time ([`jiff::Timestamp`]) and bare simulation
/// ticks ([`Tick`][crate::Tick]). A `TimePoint` is a cheap copyable value
/// with instant/duration arithmetic against its [`TimeSpan`].
pub trait TimePoint<D: TimeSpan>:
    Copy + PartialEq + std::fmt::Debug + Send + Sync + 'static
{
    /// Returns the instant offset from `self` by `d`.
    fn add(self, d: D) -> Self;

    /// Returns the span from `earlier` to `self`. Negative when `earlier`
    /// is actually later.
    fn sub(self, earlier: Self) -> D;

    /// Reports whether `self` is strictly after `other`.
    fn after(self, other: Self) -> bool;

    /// Reports whether `self` is strictly before `other`.
    fn before(self, other: Self) -> bool;

    /// Reports whether `self` is the origin of its timeline.
    fn is_zero(self) -> bool;
}

/// A signed span between two [`TimePoint`]s.
pub trait TimeSpan: Copy + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// The span expressed in floating-point seconds.
    ///
    /// Scale arithmetic in the relative clock round-trips through this
    /// representation, so very large spans may lose sub-second precision.
    fn seconds(self) -> f64;
}

/// The minimal contract a clock must satisfy to serve as the reference
/// (external time source) of a [`RelativeClock`][crate::RelativeClock].
///
/// [`SystemClock`][crate::SystemClock] implements this over wall time,
/// [`SteppedClock`][crate::SteppedClock] over simulation ticks, and
/// [`RelativeClock`][crate::RelativeClock] implements it itself so that
/// relative clocks can be stacked.
pub trait ReferenceClock<T, D>: Send + Sync + 'static
where
    T: TimePoint<D>,
    D: TimeSpan,
{
    /// The one-shot timer type this reference hands out.
    type Timer: ReferenceTimer<D> + Send;

    /// The current reference time.
    fn now(&self) -> T;

    /// Converts floating-point seconds into this reference's span type.
    ///
    /// Scaled intervals pass through this constructor so that one transform
    /// works for any time representation.
    fn seconds(&self, secs: f64) -> D;

    /// Arms a one-shot timer that runs `f` once `d` has elapsed on this
    /// reference's timeline.
    ///
    /// `f` must not be invoked while the caller's scheduler lock is held;
    /// implementations either dispatch it from a dedicated thread or defer
    /// it until their own lock is released.
    fn after_func(&self, d: D, f: Arc<dyn Fn() + Send + Sync>) -> Self::Timer;
}

/// A re-armable one-shot timer handed out by a [`ReferenceClock`].
pub trait ReferenceTimer<D: TimeSpan> {
    /// Re-arms the timer to fire after `d`. Returns `true` if the timer had
    /// been armed.
    fn reset(&mut self, d: D) -> bool;

    /// Disarms the timer. Returns `true` if the timer had been armed.
    ///
    /// Must not block on a callback already in flight; the residual race is
    /// resolved inside the callback itself.
    fn stop(&mut self) -> bool;
}

/// The user-facing scheduler surface shared by every clock in this crate.
///
/// Mirrors the familiar timer/ticker API: retrieve the current time, sleep,
/// and create timers and tickers that deliver on capacity-1 channels.
///
/// # Examples
///
/// ```
/// use skew::{Clock, Delta, SteppedClock};
///
/// fn wait_a_bit<C: Clock>(clock: &C, d: C::Span) -> C::Time {
///     let rx = clock.after(d);
///     // ... the channel yields the local fire time once `d` elapses ...
///     # let _ = rx;
///     clock.now()
/// }
///
/// let clock = SteppedClock::new();
/// wait_a_bit(&clock, Delta::from_millis(5));
/// ```
pub trait Clock {
    /// The instant type this clock reports.
    type Time: TimePoint<Self::Span>;

    /// The span type between two of this clock's instants.
    type Span: TimeSpan;

    /// The current time on this clock's timeline.
    fn now(&self) -> Self::Time;

    /// The time elapsed since `t`. Shorthand for `now() - t`.
    fn since(&self, t: Self::Time) -> Self::Span {
        self.now().sub(t)
    }

    /// The span until `t`. Shorthand for `t - now()`.
    fn until(&self, t: Self::Time) -> Self::Span {
        t.sub(self.now())
    }

    /// Blocks the calling thread for at least `d` of this clock's time.
    /// A zero or negative `d` returns immediately.
    fn sleep(&self, d: Self::Span);

    /// Creates a [`Timer`] that sends the local time on its channel once
    /// `d` has elapsed.
    fn new_timer(&self, d: Self::Span) -> Timer<Self::Time, Self::Span>;

    /// Convenience for [`Clock::new_timer`] when only the channel is
    /// needed. The underlying record is reclaimed after it fires.
    fn after(&self, d: Self::Span) -> Receiver<Self::Time>;

    /// Runs `f` on its own thread once `d` has elapsed. The returned
    /// [`Timer`] can cancel or re-arm the call; it has no channel.
    fn after_func<F>(&self, d: Self::Span, f: F) -> Timer<Self::Time, Self::Span>
    where
        F: Fn() + Send + Sync + 'static;

    /// Creates a [`Ticker`] that sends the local time on its channel every
    /// `d`. The channel has capacity 1: slow consumers see dropped ticks,
    /// not stalls.
    ///
    /// # Panics
    ///
    /// Panics when `d` is zero or negative.
    fn new_ticker(&self, d: Self::Span) -> Ticker<Self::Time, Self::Span>;

    /// Convenience for [`Clock::new_ticker`] when only the channel is
    /// needed. Returns `None` when `d` is zero or negative. Without a
    /// handle the underlying record can never be stopped, so it lives for
    /// the lifetime of the clock.
    fn tick(&self, d: Self::Span) -> Option<Receiver<Self::Time>>;
}
