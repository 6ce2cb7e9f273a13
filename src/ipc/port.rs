//! Client/server port halves.

use std::collections::VecDeque;

use crate::object::ObjectId;
use crate::thread::ThreadId;
use crate::wait::{WaiterQueue, WaitObject};

pub struct ClientPort {
    pub server_port: ObjectId,
    pub name: String,
}

pub struct ServerPort {
    pub name: String,
    pub max_sessions: u32,
    pub active_sessions: u32,
    /// Server sessions created by `Connect` and awaiting `AcceptSession`.
    pending: VecDeque<ObjectId>,
    /// Threads blocked in `Connect` because the port was saturated.
    connect_waiters: WaiterQueue,
}

impl ServerPort {
    pub fn new(name: impl Into<String>, max_sessions: u32) -> Self {
        ServerPort {
            name: name.into(),
            max_sessions,
            active_sessions: 0,
            pending: VecDeque::new(),
            connect_waiters: WaiterQueue::new(),
        }
    }

    pub fn is_saturated(&self) -> bool {
        self.active_sessions >= self.max_sessions
    }

    pub fn enqueue_pending_session(&mut self, server_session: ObjectId) {
        self.active_sessions += 1;
        self.pending.push_back(server_session);
    }

    pub fn accept_session(&mut self) -> Option<ObjectId> {
        self.pending.pop_front()
    }

    pub fn park_connect_waiter(&mut self, thread: ThreadId) {
        self.connect_waiters.push(thread);
    }

    /// Called when a session closes and frees a saturated slot.
    pub fn release_slot(&mut self) -> Vec<ThreadId> {
        self.active_sessions = self.active_sessions.saturating_sub(1);
        if !self.is_saturated() {
            self.connect_waiters.drain_all()
        } else {
            Vec::new()
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl WaitObject for ServerPort {
    /// A thread `WaitSynchronization`-ing a server port blocks until at
    /// least one connection is pending; `acquire` is a no-op since the
    /// actual dequeue happens through `accept_session`, and any number of
    /// waiters may simultaneously observe readiness.
    fn should_wait(&self, _thread: ThreadId) -> bool {
        self.pending.is_empty()
    }

    fn acquire(&mut self, _thread: ThreadId) {}

    fn add_waiter(&mut self, thread: ThreadId) {
        self.connect_waiters.push(thread);
    }

    fn remove_waiter(&mut self, thread: ThreadId) {
        self.connect_waiters.remove(thread);
    }

    fn wake_up_all_waiters(&mut self) -> Vec<ThreadId> {
        self.connect_waiters.drain_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturation_and_release() {
        let mut p = ServerPort::new("srv:test", 1);
        assert!(!p.is_saturated());
        p.enqueue_pending_session(ObjectId(10));
        assert!(p.is_saturated());
        p.park_connect_waiter(ThreadId(1));
        let woken = p.release_slot();
        assert_eq!(woken, vec![ThreadId(1)]);
        assert!(!p.is_saturated());
    }

    #[test]
    fn accept_dequeues_fifo() {
        let mut p = ServerPort::new("srv:test", 4);
        p.enqueue_pending_session(ObjectId(1));
        p.enqueue_pending_session(ObjectId(2));
        assert_eq!(p.accept_session(), Some(ObjectId(1)));
        assert_eq!(p.accept_session(), Some(ObjectId(2)));
        assert_eq!(p.accept_session(), None);
    }
}
