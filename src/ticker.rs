// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::schedule::{EventId, Timekeeper};
use crate::traits::{TimePoint, TimeSpan};

/// A periodic event delivering "ticks" of a clock at intervals.
///
/// The local time at each fire is sent on [`Ticker::channel`]. The channel
/// has capacity 1 and the send is non-blocking: a slow consumer sees dropped
/// ticks, never a stall, and the ticker keeps advancing its next fire by one
/// period from the local time at the moment of fire.
///
/// # Examples
///
/// ```
/// use skew::{Delta, SteppedClock, Tick};
///
/// let clock = SteppedClock::new();
/// let ticker = clock.new_ticker(Delta::from_nanos(50));
///
/// clock.step(Delta::from_nanos(50));
/// assert_eq!(ticker.channel().try_recv(), Ok(Tick::from_nanos(50)));
///
/// clock.step(Delta::from_nanos(50));
/// assert_eq!(ticker.channel().try_recv(), Ok(Tick::from_nanos(100)));
/// ```
pub struct Ticker<T: TimePoint<D>, D: TimeSpan> {
    keeper: Arc<dyn Timekeeper<T, D>>,
    id: EventId,
    channel: Receiver<T>,
}

impl<T: TimePoint<D>, D: TimeSpan> Ticker<T, D> {
    pub(crate) fn new(keeper: Arc<dyn Timekeeper<T, D>>, id: EventId, channel: Receiver<T>) -> Self {
        Self {
            keeper,
            id,
            channel,
        }
    }

    /// The channel on which the ticks are delivered.
    #[must_use]
    pub fn channel(&self) -> &Receiver<T> {
        &self.channel
    }

    /// Stops the ticker and restarts it with the period `d`; the next tick
    /// arrives once the new period has elapsed.
    ///
    /// # Panics
    ///
    /// Panics when `d` is zero or negative.
    pub fn reset(&mut self, d: D) {
        assert!(d.seconds() > 0.0, "non-positive interval for Ticker::reset");

        self.keeper.with_schedule(&mut |now, schedule| {
            let event = schedule
                .get_mut(self.id)
                .expect("ticker record must outlive its handle");
            event.when = now.add(d);
            event.period = Some(d);
            schedule.reschedule(self.id);
        });
    }

    /// Turns the ticker off; no more ticks are sent.
    ///
    /// The channel is not closed, so a concurrent receiver never observes a
    /// spurious disconnect. A stopped ticker can be restarted with
    /// [`Ticker::reset`].
    pub fn stop(&mut self) {
        self.keeper.with_schedule(&mut |_, schedule| {
            schedule.remove(self.id);
        });
    }
}

impl<T: TimePoint<D>, D: TimeSpan> Drop for Ticker<T, D> {
    fn drop(&mut self) {
        self.keeper.release(self.id);
    }
}

impl<T: TimePoint<D>, D: TimeSpan> fmt::Debug for Ticker<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker").field("id", &self.id).finish_non_exhaustive()
    }
}
