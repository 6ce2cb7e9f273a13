//! The priority ready queue.
//!
//! The guest ABI is not fair: threads carry a priority and the ready queue
//! must return the highest-priority runnable thread, FIFO among equals.
//! This is one `VecDeque<ThreadId>` bucket per priority level rather than a
//! single flat queue, plus the `pop_first_better`/starvation-boost
//! operations priority-aware preemption and reschedule need.

use std::collections::VecDeque;

use crate::thread::ThreadId;

pub const PRIORITY_LEVELS: usize = 64;

pub struct ReadyQueue {
    buckets: Vec<VecDeque<ThreadId>>,
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue {
    pub fn new() -> Self {
        ReadyQueue {
            buckets: (0..PRIORITY_LEVELS).map(|_| VecDeque::new()).collect(),
        }
    }

    pub fn push_back(&mut self, priority: u8, thread: ThreadId) {
        self.buckets[priority as usize].push_back(thread);
    }

    pub fn push_front(&mut self, priority: u8, thread: ThreadId) {
        self.buckets[priority as usize].push_front(thread);
    }

    pub fn remove(&mut self, priority: u8, thread: ThreadId) {
        self.buckets[priority as usize].retain(|&t| t != thread);
    }

    /// Move `thread` from `old_prio` to `new_prio`, joining the back of the
    /// new bucket's FIFO line.
    pub fn reposition(&mut self, thread: ThreadId, old_prio: u8, new_prio: u8) {
        if old_prio == new_prio {
            return;
        }
        self.remove(old_prio, thread);
        self.push_back(new_prio, thread);
    }

    /// Highest-priority thread (lowest bucket index), FIFO within the
    /// bucket.
    pub fn pop_first(&mut self) -> Option<ThreadId> {
        self.buckets.iter_mut().find_map(|b| b.pop_front())
    }

    pub fn get_first(&self) -> Option<ThreadId> {
        self.buckets.iter().find_map(|b| b.front().copied())
    }

    pub fn first_priority(&self) -> Option<u8> {
        self.buckets.iter().position(|b| !b.is_empty()).map(|p| p as u8)
    }

    /// Pop the head of the queue only if it is strictly higher priority
    /// (numerically lower) than `current_prio`; otherwise leave the queue
    /// untouched.
    pub fn pop_first_better(&mut self, current_prio: u8) -> Option<ThreadId> {
        let best = self.first_priority()?;
        if best < current_prio {
            self.pop_first()
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    pub fn contains(&self, priority: u8, thread: ThreadId) -> bool {
        self.buckets[priority as usize].contains(&thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_first_respects_priority_then_fifo() {
        let mut q = ReadyQueue::new();
        q.push_back(50, ThreadId(1));
        q.push_back(10, ThreadId(2));
        q.push_back(50, ThreadId(3));
        assert_eq!(q.pop_first(), Some(ThreadId(2)));
        assert_eq!(q.pop_first(), Some(ThreadId(1)));
        assert_eq!(q.pop_first(), Some(ThreadId(3)));
        assert_eq!(q.pop_first(), None);
    }

    #[test]
    fn pop_first_better_only_returns_strictly_higher_priority() {
        let mut q = ReadyQueue::new();
        q.push_back(30, ThreadId(1));
        assert_eq!(q.pop_first_better(30), None);
        assert!(q.contains(30, ThreadId(1)));
        assert_eq!(q.pop_first_better(31), Some(ThreadId(1)));
    }

    #[test]
    fn reposition_moves_between_buckets() {
        let mut q = ReadyQueue::new();
        q.push_back(40, ThreadId(5));
        q.reposition(ThreadId(5), 40, 20);
        assert!(!q.contains(40, ThreadId(5)));
        assert!(q.contains(20, ThreadId(5)));
    }
}
