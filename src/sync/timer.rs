//! Timer: arms a timing-wheel callback, signals like an event on fire, and
//! rearms itself if given a nonzero interval.

use crate::sync::event::ResetType;
use crate::thread::ThreadId;
use crate::wait::{SignalOutcome, WaiterQueue, WaitObject};

pub struct Timer {
    pub reset_type: ResetType,
    pub signaled: bool,
    pub interval_ns: u64,
    /// Absolute tick the timer is next due to fire; `None` when disarmed.
    pub due_tick: Option<u64>,
    waiters: WaiterQueue,
}

impl Timer {
    pub fn new(reset_type: ResetType) -> Self {
        Timer {
            reset_type,
            signaled: false,
            interval_ns: 0,
            due_tick: None,
            waiters: WaiterQueue::new(),
        }
    }

    pub fn set(&mut self, now_tick: u64, initial_ns: u64, interval_ns: u64) {
        self.interval_ns = interval_ns;
        self.due_tick = Some(now_tick + initial_ns);
        self.signaled = false;
    }

    pub fn cancel(&mut self) {
        self.due_tick = None;
    }

    pub fn clear(&mut self) {
        self.signaled = false;
    }

    /// Called by the timing source when `due_tick` elapses. Signals per
    /// reset-type semantics and rearms if `interval_ns > 0`.
    pub fn fire(&mut self, now_tick: u64) -> SignalOutcome {
        let outcome = match self.reset_type {
            ResetType::Pulse => SignalOutcome::Pulse(self.waiters.drain_all()),
            ResetType::OneShot | ResetType::Sticky => {
                self.signaled = true;
                SignalOutcome::Level
            }
        };
        if self.interval_ns > 0 {
            self.due_tick = Some(now_tick + self.interval_ns);
        } else {
            self.due_tick = None;
        }
        outcome
    }
}

impl WaitObject for Timer {
    fn should_wait(&self, _thread: ThreadId) -> bool {
        !self.signaled
    }

    fn acquire(&mut self, _thread: ThreadId) {
        if self.reset_type == ResetType::OneShot {
            self.signaled = false;
        }
    }

    fn add_waiter(&mut self, thread: ThreadId) {
        self.waiters.push(thread);
    }

    fn remove_waiter(&mut self, thread: ThreadId) {
        self.waiters.remove(thread);
    }

    fn wake_up_all_waiters(&mut self) -> Vec<ThreadId> {
        self.waiters.drain_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_with_interval_rearms() {
        let mut t = Timer::new(ResetType::Sticky);
        t.set(0, 1_000, 500);
        assert_eq!(t.due_tick, Some(1_000));
        t.fire(1_000);
        assert!(t.signaled);
        assert_eq!(t.due_tick, Some(1_500));
    }

    #[test]
    fn fire_without_interval_disarms() {
        let mut t = Timer::new(ResetType::OneShot);
        t.set(0, 1_000, 0);
        t.fire(1_000);
        assert_eq!(t.due_tick, None);
    }

    #[test]
    fn cancel_clears_due_tick() {
        let mut t = Timer::new(ResetType::Sticky);
        t.set(0, 1_000, 0);
        t.cancel();
        assert_eq!(t.due_tick, None);
    }

    #[test]
    fn pulse_fire_returns_current_waiters_and_reverts() {
        let mut t = Timer::new(ResetType::Pulse);
        t.add_waiter(ThreadId(1));
        t.add_waiter(ThreadId(2));
        t.set(0, 1_000, 0);
        match t.fire(1_000) {
            SignalOutcome::Pulse(woken) => assert_eq!(woken, vec![ThreadId(1), ThreadId(2)]),
            SignalOutcome::Level => panic!("pulse fire must return SignalOutcome::Pulse"),
        }
        assert!(!t.signaled);
    }
}
