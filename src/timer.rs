// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::schedule::{EventId, NO_POS, Timekeeper};
use crate::traits::{ReferenceTimer, TimePoint, TimeSpan};

/// A single scheduled event on one of this crate's clocks.
///
/// Unless the timer was created by `after_func`, the local time at the
/// moment of firing is sent on [`Timer::channel`]. The channel has capacity
/// 1 and the send is non-blocking, so an unread value is never replaced and
/// a second fire on a full channel is dropped.
///
/// A timer stays usable after it fired or was stopped: [`Timer::reset`]
/// re-arms it against the clock that created it.
///
/// # Examples
///
/// ```
/// use skew::{Delta, SteppedClock, Tick};
///
/// let clock = SteppedClock::new();
/// let timer = clock.new_timer(Delta::from_nanos(100));
///
/// clock.step(Delta::from_nanos(100));
///
/// let channel = timer.channel().expect("channel-backed timer");
/// assert_eq!(channel.try_recv(), Ok(Tick::from_nanos(100)));
/// ```
pub struct Timer<T: TimePoint<D>, D: TimeSpan> {
    keeper: Arc<dyn Timekeeper<T, D>>,
    id: EventId,
    channel: Option<Receiver<T>>,
}

impl<T: TimePoint<D>, D: TimeSpan> Timer<T, D> {
    pub(crate) fn new(
        keeper: Arc<dyn Timekeeper<T, D>>,
        id: EventId,
        channel: Option<Receiver<T>>,
    ) -> Self {
        Self {
            keeper,
            id,
            channel,
        }
    }

    pub(crate) fn bare(keeper: Arc<dyn Timekeeper<T, D>>, id: EventId) -> Self {
        Self::new(keeper, id, None)
    }

    /// The channel on which the firing time is delivered, or `None` for a
    /// timer created by `after_func`.
    #[must_use]
    pub fn channel(&self) -> Option<&Receiver<T>> {
        self.channel.as_ref()
    }

    /// Re-arms the timer to fire `d` after the clock's current local time.
    ///
    /// Returns `true` if the timer had still been pending, `false` if it had
    /// already fired or been stopped. When it returns `true`, at most one
    /// more fire happens, at the new time; a stale value from the previous
    /// arming may still sit in the channel and is the caller's to drain.
    pub fn reset(&mut self, d: D) -> bool {
        let mut was_active = false;
        self.keeper.with_schedule(&mut |now, schedule| {
            let event = schedule
                .get_mut(self.id)
                .expect("timer record must outlive its handle");
            was_active = event.heap_pos != NO_POS;
            event.when = now.add(d);
            schedule.reschedule(self.id);
        });
        was_active
    }

    /// Cancels the timer.
    ///
    /// Returns `true` if the call prevented the fire, `false` if the timer
    /// had already fired or been stopped. The channel is not closed, so a
    /// concurrent receiver never observes a spurious disconnect.
    pub fn stop(&mut self) -> bool {
        let mut was_active = false;
        self.keeper.with_schedule(&mut |_, schedule| {
            was_active = schedule
                .get(self.id)
                .expect("timer record must outlive its handle")
                .heap_pos
                != NO_POS;
            schedule.remove(self.id);
        });
        was_active
    }
}

impl<T: TimePoint<D>, D: TimeSpan> ReferenceTimer<D> for Timer<T, D> {
    fn reset(&mut self, d: D) -> bool {
        Timer::reset(self, d)
    }

    fn stop(&mut self) -> bool {
        Timer::stop(self)
    }
}

impl<T: TimePoint<D>, D: TimeSpan> Drop for Timer<T, D> {
    fn drop(&mut self) {
        self.keeper.release(self.id);
    }
}

impl<T: TimePoint<D>, D: TimeSpan> fmt::Debug for Timer<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("id", &self.id)
            .field("channel", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}
