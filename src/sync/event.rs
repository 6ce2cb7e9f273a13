//! Event with OneShot/Sticky/Pulse reset semantics.

use crate::thread::ThreadId;
use crate::wait::{SignalOutcome, WaiterQueue, WaitObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    OneShot,
    Sticky,
    Pulse,
}

pub struct Event {
    pub reset_type: ResetType,
    pub signaled: bool,
    waiters: WaiterQueue,
}

impl Event {
    pub fn new(reset_type: ResetType) -> Self {
        Event {
            reset_type,
            signaled: false,
            waiters: WaiterQueue::new(),
        }
    }

    /// Signal the event. `Pulse` transiently releases every currently-parked
    /// thread and immediately reverts to non-signalled, so those waiters
    /// must be resumed directly rather than through a should-wait re-check.
    /// `OneShot`/`Sticky` instead leave the event signalled for the
    /// scheduler's normal wake pass to consume.
    pub fn signal(&mut self) -> SignalOutcome {
        match self.reset_type {
            ResetType::Pulse => {
                let woken = self.waiters.drain_all();
                self.signaled = false;
                SignalOutcome::Pulse(woken)
            }
            ResetType::OneShot | ResetType::Sticky => {
                self.signaled = true;
                SignalOutcome::Level
            }
        }
    }

    pub fn clear(&mut self) {
        self.signaled = false;
    }
}

impl WaitObject for Event {
    fn should_wait(&self, _thread: ThreadId) -> bool {
        !self.signaled
    }

    fn acquire(&mut self, _thread: ThreadId) {
        if self.reset_type == ResetType::OneShot {
            self.signaled = false;
        }
        // Sticky stays signalled for subsequent waiters; Pulse is already
        // cleared by `signal()` before any acquire can observe it.
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
    fn sticky_event_stays_signaled_across_multiple_acquires() {
        let mut e = Event::new(ResetType::Sticky);
        e.signal();
        assert!(!e.should_wait(ThreadId(1)));
        e.acquire(ThreadId(1));
        assert!(!e.should_wait(ThreadId(2)));
    }

    #[test]
    fn one_shot_event_consumes_on_first_acquire() {
        let mut e = Event::new(ResetType::OneShot);
        e.signal();
        assert!(!e.should_wait(ThreadId(1)));
        e.acquire(ThreadId(1));
        assert!(e.should_wait(ThreadId(2)));
    }

    #[test]
    fn pulse_event_wakes_current_waiters_then_reverts() {
        let mut e = Event::new(ResetType::Pulse);
        e.add_waiter(ThreadId(1));
        e.add_waiter(ThreadId(2));
        let outcome = e.signal();
        match outcome {
            SignalOutcome::Pulse(woken) => assert_eq!(woken, vec![ThreadId(1), ThreadId(2)]),
            SignalOutcome::Level => panic!("pulse signal must return SignalOutcome::Pulse"),
        }
        assert!(e.should_wait(ThreadId(3)));
    }
}
