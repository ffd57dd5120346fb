// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use jiff::{SignedDuration, Timestamp};

use crate::traits::{ReferenceClock, ReferenceTimer, TimePoint, TimeSpan};

static OUTSIDE_RANGE_MESSAGE: &str =
    "moving the clock outside of the supported timestamp range is not possible";

/// Deadline used when an arming span exceeds what an `Instant` can express.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

impl TimePoint<SignedDuration> for Timestamp {
    fn add(self, d: SignedDuration) -> Self {
        self.checked_add(d).expect(OUTSIDE_RANGE_MESSAGE)
    }

    fn sub(self, earlier: Self) -> SignedDuration {
        self.duration_since(earlier)
    }

    fn after(self, other: Self) -> bool {
        self > other
    }

    fn before(self, other: Self) -> bool {
        self < other
    }

    fn is_zero(self) -> bool {
        self == Timestamp::UNIX_EPOCH
    }
}

impl TimeSpan for SignedDuration {
    fn seconds(self) -> f64 {
        self.as_secs_f64()
    }
}

/// The host's real clock, exposed through the [`ReferenceClock`] contract.
///
/// This is the reference a [`VirtualClock`][crate::VirtualClock] tracks. It
/// reports wall time as [`jiff::Timestamp`] and hands out thread-backed
/// [`SystemTimer`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ReferenceClock<Timestamp, SignedDuration> for SystemClock {
    type Timer = SystemTimer;

    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn seconds(&self, secs: f64) -> SignedDuration {
        saturating_span(secs)
    }

    fn after_func(&self, d: SignedDuration, f: Arc<dyn Fn() + Send + Sync>) -> SystemTimer {
        SystemTimer::spawn(d, f)
    }
}

fn saturating_span(secs: f64) -> SignedDuration {
    SignedDuration::try_from_secs_f64(secs).unwrap_or_else(|_| {
        if secs < 0.0 {
            SignedDuration::MIN
        } else {
            SignedDuration::MAX
        }
    })
}

/// A re-armable one-shot timer backed by a dedicated thread.
///
/// The thread parks on a condition variable until the armed deadline passes,
/// runs the callback outside the timer's own lock, and parks again.
/// [`ReferenceTimer::stop`] disarms without waiting for a callback already in
/// flight; dropping the handle shuts the thread down.
#[derive(Debug)]
pub struct SystemTimer {
    shared: Arc<TimerShared>,
}

#[derive(Debug)]
struct TimerShared {
    state: Mutex<TimerState>,
    signal: Condvar,
}

#[derive(Debug)]
struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

impl SystemTimer {
    fn spawn(d: SignedDuration, f: Arc<dyn Fn() + Send + Sync>) -> Self {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                deadline: Some(arm_instant(d)),
                shutdown: false,
            }),
            signal: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("skew-timer".into())
            .spawn(move || run_timer(&thread_shared, &f))
            .expect("spawning the timer thread must succeed");

        Self { shared }
    }
}

/// Negative spans clamp to zero (fire as soon as possible); spans beyond the
/// `Instant` range clamp far enough out to never matter.
fn arm_instant(d: SignedDuration) -> Instant {
    let now = Instant::now();
    let span = if d.is_negative() {
        Duration::ZERO
    } else {
        d.unsigned_abs()
    };
    now.checked_add(span)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

#[mutants::skip] // timing loop; mutations hang the test suite
fn run_timer(shared: &TimerShared, f: &Arc<dyn Fn() + Send + Sync>) {
    loop {
        let mut state = shared
            .state
            .lock()
            .expect("acquiring lock must always succeed");

        loop {
            if state.shutdown {
                return;
            }
            match state.deadline {
                None => {
                    state = shared
                        .signal
                        .wait(state)
                        .expect("acquiring lock must always succeed");
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.deadline = None;
                        break;
                    }
                    state = shared
                        .signal
                        .wait_timeout(state, deadline - now)
                        .expect("acquiring lock must always succeed")
                        .0;
                }
            }
        }

        drop(state);
        // The callback takes scheduler locks; it must run outside ours.
        f();
    }
}

impl ReferenceTimer<SignedDuration> for SystemTimer {
    fn reset(&mut self, d: SignedDuration) -> bool {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("acquiring lock must always succeed");
        let was_armed = state.deadline.replace(arm_instant(d)).is_some();
        self.shared.signal.notify_one();
        was_armed
    }

    fn stop(&mut self) -> bool {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("acquiring lock must always succeed");
        let was_armed = state.deadline.take().is_some();
        self.shared.signal.notify_one();
        was_armed
    }
}

impl Drop for SystemTimer {
    fn drop(&mut self) {
        let Ok(mut state) = self.shared.state.lock() else {
            return;
        };
        state.shutdown = true;
        self.shared.signal.notify_one();
    }
}
