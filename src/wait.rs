//! The wait-object protocol shared by every synchronizable kernel object.
//!
//! Rather than `dyn WaitObject` trait objects -- which would force every
//! caller to go through a vtable and make the arena invariant (`KernelObject`
//! is a plain enum, see `object.rs`) impossible to express -- dispatch is by
//! matching on the `KernelObject` variant and calling the same trait method
//! on whichever concrete type is inside. The trait still documents the
//! contract every object must satisfy; `kernel_context.rs` is the only place
//! that performs the match.

use crate::thread::ThreadId;

/// FIFO list of threads parked on an object, in the order they started
/// waiting. Resumption picks from the front: arrival order, not priority.
#[derive(Debug, Default, Clone)]
pub struct WaiterQueue(Vec<ThreadId>);

impl WaiterQueue {
    pub fn new() -> Self {
        WaiterQueue(Vec::new())
    }

    pub fn push(&mut self, thread: ThreadId) {
        if !self.0.contains(&thread) {
            self.0.push(thread);
        }
    }

    pub fn remove(&mut self, thread: ThreadId) {
        self.0.retain(|&t| t != thread);
    }

    pub fn drain_all(&mut self) -> Vec<ThreadId> {
        std::mem::take(&mut self.0)
    }

    pub fn front(&self) -> Option<ThreadId> {
        self.0.first().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Every wait-synchronizable kernel object (mutex, semaphore, event, timer,
/// address arbiter buckets) implements this contract.
pub trait WaitObject {
    /// Would the given thread block if it tried to acquire this object now?
    fn should_wait(&self, thread: ThreadId) -> bool;

    /// Claim the object on behalf of `thread`. Only valid to call when
    /// `should_wait` just returned `false`.
    fn acquire(&mut self, thread: ThreadId);

    fn add_waiter(&mut self, thread: ThreadId);
    fn remove_waiter(&mut self, thread: ThreadId);

    /// Pop every currently-blocked waiter so the scheduler can re-evaluate
    /// each of them (used by objects where signaling can satisfy more than
    /// one waiter, e.g. semaphores and broadcast-reset events).
    fn wake_up_all_waiters(&mut self) -> Vec<ThreadId>;
}

/// Result of signaling a broadcast-reset object (event, timer). `Pulse`
/// carries the waiters to resume directly -- the object already reverted to
/// non-signaled, so the generic should-wait re-check would refuse all of
/// them. `Level` means the object is left signaled and waiters should go
/// through the normal wake-then-re-check-then-readd pass, since exactly one
/// of them consuming it (OneShot) or none (Sticky) is itself how the object
/// decides who actually wakes.
#[derive(Debug, Clone)]
pub enum SignalOutcome {
    Pulse(Vec<ThreadId>),
    Level,
}

/// Why a previously-blocked thread is being resumed. A small sum type
/// instead of a stored closure or boxed callback -- the scheduler matches
/// on this to decide what value, if any, to leave in the thread's return
/// registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// The object(s) being waited on became available.
    ObjectSignaled { index: Option<usize> },
    /// The wait's timeout elapsed before anything signaled.
    TimedOut,
    /// An address arbiter signal targeted this thread.
    ArbiterSignaled,
    /// An IPC reply arrived for this thread's pending `SendSyncRequest`.
    IpcReplied,
    /// The thread was torn down (process exit, forced termination) while
    /// parked; it must not touch its return registers at all.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiter_queue_is_fifo_and_deduplicates() {
        let mut q = WaiterQueue::new();
        q.push(ThreadId(1));
        q.push(ThreadId(2));
        q.push(ThreadId(1));
        assert_eq!(q.len(), 2);
        assert_eq!(q.front(), Some(ThreadId(1)));
        q.remove(ThreadId(1));
        assert_eq!(q.front(), Some(ThreadId(2)));
    }

    #[test]
    fn drain_all_empties_the_queue() {
        let mut q = WaiterQueue::new();
        q.push(ThreadId(5));
        let drained = q.drain_all();
        assert_eq!(drained, vec![ThreadId(5)]);
        assert!(q.is_empty());
    }
}
