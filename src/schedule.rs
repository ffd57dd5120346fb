// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;

use crate::traits::{TimePoint, TimeSpan};

/// Sentinel for an event that is currently not queued.
pub(crate) const NO_POS: usize = usize::MAX;

/// Children per node. A 4-ary heap trades a slightly deeper comparison per
/// level for fewer swaps than a binary heap on mixed insert/remove loads.
const ARITY: usize = 4;

/// Identifier of an event record.
///
/// Ids are generational: a handle that outlives its record can never alias a
/// recycled slot, so a late `stop` or `reset` on a long-dead timer is caught
/// instead of silently acting on a stranger's event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EventId {
    slot: u32,
    generation: u32,
}

/// What happens when an event's firing time is reached.
pub(crate) enum FireAction<T> {
    /// Non-blocking send of the local fire time on a capacity-1 channel.
    /// A full channel drops the value. Safe to run under the scheduler lock.
    Send(Sender<T>),
    /// Non-blocking send unblocking a sleeper. Safe to run under the lock.
    Wake(Sender<()>),
    /// User callback dispatched on a freshly spawned thread, so arbitrary
    /// user code never runs under the scheduler lock.
    Spawn(Arc<dyn Fn() + Send + Sync>),
    /// Reference-timer callback of a downstream clock. Collected during the
    /// drain and invoked only after the scheduler lock is released; running
    /// it under the lock would order this scheduler's lock before the
    /// downstream clock's and deadlock stacked clocks.
    Callback(Arc<dyn Fn() + Send + Sync>),
}

impl<T> fmt::Debug for FireAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send(_) => f.write_str("Send"),
            Self::Wake(_) => f.write_str("Wake"),
            Self::Spawn(_) => f.write_str("Spawn"),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// One pending timer, ticker tick, sleep wakeup or after-func call.
#[derive(Debug)]
pub(crate) struct Event<T, D> {
    /// Next local firing time.
    pub(crate) when: T,
    /// `Some` for tickers; re-queued at `now + period` on every fire.
    pub(crate) period: Option<D>,
    pub(crate) action: FireAction<T>,
    /// Position in the heap, or [`NO_POS`] when detached.
    pub(crate) heap_pos: usize,
    /// No user handle refers to this record anymore; the slot is reclaimed
    /// once the record is also detached from the heap.
    pub(crate) orphaned: bool,
}

#[derive(Debug)]
struct Slot<T, D> {
    generation: u32,
    event: Option<Event<T, D>>,
}

/// The pending-event queue of a scheduler: a slot arena holding the records
/// plus a 4-ary min-heap of ids keyed by local firing time.
///
/// Records are shared between the heap and the user-facing handle, and a
/// handle may outlive the record's presence in the heap (a fired one-shot
/// can be re-armed through `reset`). The arena therefore keeps a detached
/// record alive until its handle is gone.
#[derive(Debug)]
pub(crate) struct Schedule<T, D> {
    slots: Vec<Slot<T, D>>,
    free: Vec<u32>,
    heap: Vec<EventId>,
}

impl<T, D> Default for Schedule<T, D> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            heap: Vec::new(),
        }
    }
}

impl<T: TimePoint<D>, D: TimeSpan> Schedule<T, D> {
    /// Allocates a detached record. Call [`Self::insert`] to queue it.
    pub(crate) fn create(
        &mut self,
        when: T,
        period: Option<D>,
        action: FireAction<T>,
        orphaned: bool,
    ) -> EventId {
        let event = Event {
            when,
            period,
            action,
            heap_pos: NO_POS,
            orphaned,
        };

        match self.free.pop() {
            Some(slot) => {
                let entry = &mut self.slots[slot as usize];
                entry.event = Some(event);
                EventId {
                    slot,
                    generation: entry.generation,
                }
            }
            None => {
                let slot = u32::try_from(self.slots.len())
                    .expect("more than u32::MAX live events is not supported");
                self.slots.push(Slot {
                    generation: 0,
                    event: Some(event),
                });
                EventId {
                    slot,
                    generation: 0,
                }
            }
        }
    }

    pub(crate) fn get(&self, id: EventId) -> Option<&Event<T, D>> {
        self.slots
            .get(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.event.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: EventId) -> Option<&mut Event<T, D>> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.event.as_mut())
    }

    /// Queues a detached record. O(log n).
    pub(crate) fn insert(&mut self, id: EventId) {
        let pos = self.heap.len();
        self.heap.push(id);
        self.set_pos(pos);
        self.sift_up(pos);
    }

    /// Dequeues a record, leaving it detached. Removing a detached record is
    /// a no-op. O(log n).
    pub(crate) fn remove(&mut self, id: EventId) {
        let Some(event) = self.get_mut(id) else {
            return;
        };
        let pos = event.heap_pos;
        if pos == NO_POS {
            return;
        }
        event.heap_pos = NO_POS;

        let last = self.heap.len() - 1;
        self.heap.swap_remove(pos);
        if pos < last {
            self.set_pos(pos);
            self.sift_down(pos);
            self.sift_up(pos);
        }
    }

    /// Restores heap order after `when` changed; queues the record if it was
    /// detached. O(log n).
    pub(crate) fn reschedule(&mut self, id: EventId) {
        let pos = self
            .get(id)
            .expect("heap entry must reference a live event")
            .heap_pos;
        if pos == NO_POS {
            self.insert(id);
        } else {
            self.sift_up(pos);
            let pos = self
                .get(id)
                .expect("heap entry must reference a live event")
                .heap_pos;
            self.sift_down(pos);
        }
    }

    /// The queued event with the earliest firing time. O(1).
    pub(crate) fn peek(&self) -> Option<EventId> {
        self.heap.first().copied()
    }

    /// Firing time of the queue head. O(1).
    pub(crate) fn peek_when(&self) -> Option<T> {
        self.peek().map(|id| {
            self.get(id)
                .expect("heap entry must reference a live event")
                .when
        })
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Marks a record as having no user handle. Detached orphans free their
    /// slot immediately; queued ones are reclaimed when they next detach.
    pub(crate) fn release(&mut self, id: EventId) {
        let Some(event) = self.get_mut(id) else {
            return;
        };
        event.orphaned = true;
        if event.heap_pos == NO_POS {
            self.free_slot(id);
        }
    }

    /// Fires every queued event whose `when` is at or before `now`.
    ///
    /// Channel sends happen inline (they are non-blocking), `Spawn` actions
    /// go to fresh threads, and `Callback` actions are returned for the
    /// caller to invoke once its lock is released.
    pub(crate) fn fire_due(&mut self, now: T) -> Vec<Arc<dyn Fn() + Send + Sync>> {
        let mut deferred: Vec<Arc<dyn Fn() + Send + Sync>> = Vec::new();

        while let Some(id) = self.peek() {
            let (when, period) = {
                let event = self.get(id).expect("heap entry must reference a live event");
                (event.when, event.period)
            };
            if when.after(now) {
                break;
            }

            match period {
                Some(period) => {
                    debug_assert!(period.seconds() > 0.0, "periodic event with period {period:?}");
                    self.get_mut(id)
                        .expect("heap entry must reference a live event")
                        .when = now.add(period);
                    self.reschedule(id);
                }
                None => self.remove(id),
            }

            let reclaim = {
                let event = self.get(id).expect("heap entry must reference a live event");
                match &event.action {
                    FireAction::Send(tx) => {
                        let _ = tx.try_send(now);
                    }
                    FireAction::Wake(tx) => {
                        let _ = tx.try_send(());
                    }
                    FireAction::Spawn(f) => {
                        let f = Arc::clone(f);
                        thread::spawn(move || f());
                    }
                    FireAction::Callback(f) => deferred.push(Arc::clone(f)),
                }
                event.heap_pos == NO_POS && event.orphaned
            };
            if reclaim {
                self.free_slot(id);
            }
        }

        deferred
    }

    fn free_slot(&mut self, id: EventId) {
        let slot = &mut self.slots[id.slot as usize];
        debug_assert_eq!(slot.generation, id.generation);
        slot.event = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.slot);
    }

    fn when_at(&self, pos: usize) -> T {
        self.get(self.heap[pos])
            .expect("heap entry must reference a live event")
            .when
    }

    fn set_pos(&mut self, pos: usize) {
        let id = self.heap[pos];
        self.get_mut(id)
            .expect("heap entry must reference a live event")
            .heap_pos = pos;
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.set_pos(a);
        self.set_pos(b);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / ARITY;
            if self.when_at(pos).before(self.when_at(parent)) {
                self.swap(pos, parent);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let first = pos * ARITY + 1;
            if first >= self.heap.len() {
                break;
            }
            let last = (first + ARITY).min(self.heap.len());
            let mut least = first;
            for child in (first + 1)..last {
                if self.when_at(child).before(self.when_at(least)) {
                    least = child;
                }
            }
            if self.when_at(least).before(self.when_at(pos)) {
                self.swap(pos, least);
                pos = least;
            } else {
                break;
            }
        }
    }

    /// Validates the heap property, position bookkeeping and arena
    /// coherence. Test-only.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        for (pos, id) in self.heap.iter().enumerate() {
            let event = self
                .get(*id)
                .expect("heap entry must reference a live event");
            assert_eq!(event.heap_pos, pos, "stale heap position at {pos}");
            if pos > 0 {
                let parent = (pos - 1) / ARITY;
                assert!(
                    !self.when_at(pos).before(self.when_at(parent)),
                    "heap order violated between {pos} and its parent"
                );
            }
        }

        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(event) = &entry.event {
                if event.heap_pos != NO_POS {
                    assert_eq!(
                        self.heap[event.heap_pos].slot as usize, slot,
                        "detached-flag bookkeeping out of sync for slot {slot}"
                    );
                }
            }
        }
    }
}

/// Internal seam between the user-facing handles and the scheduler that owns
/// their records: lock, refresh the local now, expose the schedule, then
/// re-arm whatever drives the next fire.
pub(crate) trait Timekeeper<T: TimePoint<D>, D: TimeSpan>: Send + Sync {
    fn with_schedule(&self, f: &mut dyn FnMut(T, &mut Schedule<T, D>));

    /// Handle-drop path. Must tolerate a poisoned lock, since drops also run
    /// during unwinding.
    fn release(&self, id: EventId);
}

/// Blocks the caller until a one-shot scheduled `d` from now fires. Returns
/// immediately for a zero or negative `d`. Shared by every scheduler's
/// `sleep`.
pub(crate) fn sleep_via<T: TimePoint<D>, D: TimeSpan>(keeper: &dyn Timekeeper<T, D>, d: D) {
    if d.seconds() <= 0.0 {
        return;
    }

    let (tx, rx) = crossbeam_channel::bounded(1);
    keeper.with_schedule(&mut |now, schedule| {
        let id = schedule.create(now.add(d), None, FireAction::Wake(tx.clone()), true);
        schedule.insert(id);
    });

    // A disconnect means the scheduler was dropped; the sleep is abandoned.
    let _ = rx.recv();
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::stepped::{Delta, Tick};

    fn send_action() -> (FireAction<Tick>, crossbeam_channel::Receiver<Tick>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (FireAction::Send(tx), rx)
    }

    fn schedule_one(schedule: &mut Schedule<Tick, Delta>, at: i64) -> EventId {
        let (action, _rx) = send_action();
        let id = schedule.create(Tick::from_nanos(at), None, action, true);
        schedule.insert(id);
        id
    }

    #[test]
    fn peek_returns_earliest() {
        let mut schedule = Schedule::default();
        schedule_one(&mut schedule, 30);
        schedule_one(&mut schedule, 10);
        schedule_one(&mut schedule, 20);

        assert_eq!(schedule.peek_when(), Some(Tick::from_nanos(10)));
        schedule.assert_invariants();
    }

    #[test]
    fn remove_is_noop_when_detached() {
        let mut schedule = Schedule::default();
        let id = schedule_one(&mut schedule, 10);

        schedule.remove(id);
        assert!(schedule.is_empty());
        schedule.remove(id);
        assert!(schedule.is_empty());
        schedule.assert_invariants();
    }

    #[test]
    fn remove_middle_keeps_order() {
        let mut schedule = Schedule::default();
        let ids: Vec<_> = [50, 40, 30, 20, 10, 60, 70]
            .iter()
            .map(|at| schedule_one(&mut schedule, *at))
            .collect();

        schedule.remove(ids[2]);
        schedule.assert_invariants();
        assert_eq!(schedule.peek_when(), Some(Tick::from_nanos(10)));
    }

    #[test]
    fn reschedule_moves_head() {
        let mut schedule = Schedule::default();
        let id = schedule_one(&mut schedule, 10);
        schedule_one(&mut schedule, 20);

        schedule
            .get_mut(id)
            .expect("event must be live")
            .when = Tick::from_nanos(99);
        schedule.reschedule(id);

        assert_eq!(schedule.peek_when(), Some(Tick::from_nanos(20)));
        schedule.assert_invariants();
    }

    #[test]
    fn stale_id_does_not_alias_recycled_slot() {
        let mut schedule = Schedule::default();
        let id = schedule_one(&mut schedule, 10);
        schedule.remove(id);
        schedule.release(id);

        // The slot is recycled with a bumped generation.
        let successor = schedule_one(&mut schedule, 20);
        assert!(schedule.get(id).is_none());
        assert!(schedule.get(successor).is_some());
        schedule.remove(id);
        assert_eq!(schedule.peek_when(), Some(Tick::from_nanos(20)));
    }

    #[test]
    fn fire_due_detaches_one_shots() {
        let mut schedule = Schedule::default();
        let (action, rx) = send_action();
        let id = schedule.create(Tick::from_nanos(10), None, action, false);
        schedule.insert(id);

        let deferred = schedule.fire_due(Tick::from_nanos(10));
        assert!(deferred.is_empty());
        assert_eq!(rx.try_recv(), Ok(Tick::from_nanos(10)));
        assert_eq!(
            schedule.get(id).expect("record outlives the fire").heap_pos,
            NO_POS
        );
        assert!(schedule.is_empty());
    }

    #[test]
    fn fire_due_requeues_periodic() {
        let mut schedule = Schedule::default();
        let (action, rx) = send_action();
        let id = schedule.create(
            Tick::from_nanos(10),
            Some(Delta::from_nanos(10)),
            action,
            false,
        );
        schedule.insert(id);

        let _ = schedule.fire_due(Tick::from_nanos(25));

        // One fire; the record is re-queued at now + period.
        assert_eq!(rx.try_recv(), Ok(Tick::from_nanos(25)));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            schedule.get(id).expect("ticker record stays live").when,
            Tick::from_nanos(35)
        );
        schedule.assert_invariants();
    }

    #[test]
    fn fire_due_reclaims_orphans() {
        let mut schedule = Schedule::default();
        let (action, _rx) = send_action();
        let id = schedule.create(Tick::from_nanos(10), None, action, true);
        schedule.insert(id);

        let _ = schedule.fire_due(Tick::from_nanos(10));
        assert!(schedule.get(id).is_none(), "orphaned one-shot must be reclaimed");
    }

    #[test]
    fn fire_due_defers_callbacks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut schedule: Schedule<Tick, Delta> = Schedule::default();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);
        let id = schedule.create(
            Tick::from_nanos(5),
            None,
            FireAction::Callback(Arc::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })),
            true,
        );
        schedule.insert(id);

        let deferred = schedule.fire_due(Tick::from_nanos(5));
        assert_eq!(fired.load(Ordering::SeqCst), 0, "callback must not run inline");
        for f in deferred {
            f();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn heap_invariants_survive_random_ops(ops in prop::collection::vec((0u8..4, 0i64..1_000), 1..200)) {
            let mut schedule = Schedule::default();
            let mut live: Vec<EventId> = Vec::new();

            for (op, value) in ops {
                match op {
                    0 => {
                        let (action, _rx) = send_action();
                        let id = schedule.create(Tick::from_nanos(value), None, action, true);
                        schedule.insert(id);
                        live.push(id);
                    }
                    1 => {
                        if !live.is_empty() {
                            let id = live.remove(value as usize % live.len());
                            schedule.remove(id);
                            schedule.release(id);
                        }
                    }
                    2 => {
                        if !live.is_empty() {
                            let id = live[value as usize % live.len()];
                            schedule.get_mut(id).expect("live id").when = Tick::from_nanos(value);
                            schedule.reschedule(id);
                        }
                    }
                    _ => {
                        let _ = schedule.fire_due(Tick::from_nanos(value));
                        live.retain(|id| {
                            schedule.get(*id).is_some_and(|event| event.heap_pos != NO_POS)
                        });
                    }
                }
                schedule.assert_invariants();
            }
        }
    }
}
