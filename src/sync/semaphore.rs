//! Counting semaphore.

use crate::thread::ThreadId;
use crate::wait::{WaiterQueue, WaitObject};

pub struct Semaphore {
    pub count: i32,
    pub max: i32,
    waiters: WaiterQueue,
}

impl Semaphore {
    pub fn new(initial: i32, max: i32) -> Self {
        Semaphore {
            count: initial,
            max,
            waiters: WaiterQueue::new(),
        }
    }

    /// Add `n` to the count (failing if it would exceed `max`) and wake up
    /// to `n` waiters, FIFO. Returns the woken thread ids.
    pub fn release(&mut self, n: i32) -> Result<Vec<ThreadId>, ()> {
        if self.count.checked_add(n).is_none_or(|v| v > self.max) {
            return Err(());
        }
        self.count += n;
        let mut woken = Vec::new();
        while woken.len() < n as usize {
            if self.count <= 0 {
                break;
            }
            match self.waiters.front() {
                Some(t) => {
                    self.waiters.remove(t);
                    self.count -= 1;
                    woken.push(t);
                }
                None => break,
            }
        }
        Ok(woken)
    }
}

impl WaitObject for Semaphore {
    fn should_wait(&self, _thread: ThreadId) -> bool {
        self.count <= 0
    }

    fn acquire(&mut self, _thread: ThreadId) {
        self.count -= 1;
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
    fn should_wait_when_count_not_positive() {
        let s = Semaphore::new(0, 4);
        assert!(s.should_wait(ThreadId(1)));
    }

    #[test]
    fn release_rejects_exceeding_max() {
        let mut s = Semaphore::new(3, 4);
        assert!(s.release(2).is_err());
    }

    #[test]
    fn release_wakes_up_to_n_fifo() {
        let mut s = Semaphore::new(0, 10);
        s.add_waiter(ThreadId(1));
        s.add_waiter(ThreadId(2));
        s.add_waiter(ThreadId(3));
        let woken = s.release(2).unwrap();
        assert_eq!(woken, vec![ThreadId(1), ThreadId(2)]);
        assert_eq!(s.count, 0);
    }
}
