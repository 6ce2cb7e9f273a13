//! Reentrant mutex with priority-inheritance bookkeeping.
//!
//! The min-priority-of-pending-waiters computation that drives inheritance
//! needs to read `Thread::priority`, which this object doesn't own, so
//! `mutex.priority` here is a cached value the scheduler recomputes and
//! writes via `set_pending_priority` whenever the pending set changes -- it
//! is not derived internally.

use crate::thread::ThreadId;
use crate::wait::{WaiterQueue, WaitObject};

pub struct Mutex {
    pub holder: Option<ThreadId>,
    pub lock_count: u32,
    pending: WaiterQueue,
    /// Cached minimum priority among `pending`'s threads; `None` when empty.
    /// Numerically lower means higher priority.
    cached_pending_priority: Option<u8>,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    pub fn new() -> Self {
        Mutex {
            holder: None,
            lock_count: 0,
            pending: WaiterQueue::new(),
            cached_pending_priority: None,
        }
    }

    pub fn new_locked(owner: ThreadId) -> Self {
        Mutex {
            holder: Some(owner),
            lock_count: 1,
            pending: WaiterQueue::new(),
            cached_pending_priority: None,
        }
    }

    pub fn pending_iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.pending.iter()
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The minimum priority among threads pending on this mutex, used by
    /// priority inheritance: `best = min(nominal, min over held_mutexes of
    /// mutex.priority)`.
    pub fn priority(&self) -> Option<u8> {
        self.cached_pending_priority
    }

    pub fn set_pending_priority(&mut self, priority: Option<u8>) {
        self.cached_pending_priority = priority;
    }

    /// Pick the next holder among `pending`: highest priority, FIFO on
    /// ties. Requires the caller to supply each pending thread's current
    /// priority since this object doesn't track threads directly.
    pub fn select_next_holder(&self, priorities: impl Fn(ThreadId) -> u8) -> Option<ThreadId> {
        self.pending
            .iter()
            .min_by_key(|&t| priorities(t))
    }

    pub fn release(&mut self, thread: ThreadId) -> Result<bool, ()> {
        if self.holder != Some(thread) {
            return Err(());
        }
        self.lock_count -= 1;
        if self.lock_count == 0 {
            self.holder = None;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

impl WaitObject for Mutex {
    fn should_wait(&self, thread: ThreadId) -> bool {
        self.holder.is_some() && self.holder != Some(thread)
    }

    fn acquire(&mut self, thread: ThreadId) {
        if self.holder == Some(thread) {
            self.lock_count += 1;
        } else {
            self.holder = Some(thread);
            self.lock_count = 1;
        }
        self.pending.remove(thread);
    }

    fn add_waiter(&mut self, thread: ThreadId) {
        self.pending.push(thread);
    }

    fn remove_waiter(&mut self, thread: ThreadId) {
        self.pending.remove(thread);
    }

    fn wake_up_all_waiters(&mut self) -> Vec<ThreadId> {
        self.pending.drain_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_wait_is_false_for_holder_reentry() {
        let m = Mutex::new_locked(ThreadId(1));
        assert!(!m.should_wait(ThreadId(1)));
        assert!(m.should_wait(ThreadId(2)));
    }

    #[test]
    fn reentrant_acquire_increments_count_release_decrements() {
        let mut m = Mutex::new();
        m.acquire(ThreadId(1));
        m.acquire(ThreadId(1));
        assert_eq!(m.lock_count, 2);
        assert_eq!(m.release(ThreadId(1)), Ok(false));
        assert_eq!(m.release(ThreadId(1)), Ok(true));
        assert!(m.holder.is_none());
    }

    #[test]
    fn release_by_non_holder_fails() {
        let mut m = Mutex::new_locked(ThreadId(1));
        assert_eq!(m.release(ThreadId(2)), Err(()));
    }

    #[test]
    fn select_next_holder_picks_highest_priority_fifo_on_ties() {
        let mut m = Mutex::new_locked(ThreadId(1));
        m.add_waiter(ThreadId(2));
        m.add_waiter(ThreadId(3));
        let priorities = |t: ThreadId| if t == ThreadId(2) { 50 } else { 50 };
        // Equal priority -> min_by_key keeps first encountered (FIFO order).
        assert_eq!(m.select_next_holder(priorities), Some(ThreadId(2)));
    }
}
