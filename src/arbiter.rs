//! Address arbiter: address-keyed thread parking.
//!
//! Not a `WaitObject` in the usual sense -- there is one arbiter per
//! process, and threads park against an *address* within it rather than
//! against the arbiter object itself, so the parking table is keyed by
//! address instead of holding one flat waiter list.

use std::collections::BTreeMap;

use crate::wait::WaiterQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbitrationType {
    Signal,
    WaitIfLessThan,
    WaitIfLessThanWithTimeout,
    DecrementAndWaitIfLessThan,
    DecrementAndWaitIfLessThanWithTimeout,
}

impl ArbitrationType {
    pub fn is_wait(self) -> bool {
        !matches!(self, ArbitrationType::Signal)
    }

    pub fn has_timeout(self) -> bool {
        matches!(
            self,
            ArbitrationType::WaitIfLessThanWithTimeout
                | ArbitrationType::DecrementAndWaitIfLessThanWithTimeout
        )
    }

    pub fn decrements(self) -> bool {
        matches!(
            self,
            ArbitrationType::DecrementAndWaitIfLessThan
                | ArbitrationType::DecrementAndWaitIfLessThanWithTimeout
        )
    }
}

#[derive(Default)]
pub struct AddressArbiter {
    parked: BTreeMap<u32, WaiterQueue>,
}

use crate::thread::ThreadId;

impl AddressArbiter {
    pub fn new() -> Self {
        AddressArbiter {
            parked: BTreeMap::new(),
        }
    }

    pub fn park(&mut self, address: u32, thread: ThreadId) {
        self.parked.entry(address).or_default().push(thread);
    }

    pub fn remove(&mut self, address: u32, thread: ThreadId) {
        if let Some(q) = self.parked.get_mut(&address) {
            q.remove(thread);
            if q.is_empty() {
                self.parked.remove(&address);
            }
        }
    }

    /// Wake up to `n` threads parked on `address`, FIFO (`n < 0` wakes all).
    pub fn signal(&mut self, address: u32, n: i32) -> Vec<ThreadId> {
        let Some(q) = self.parked.get_mut(&address) else {
            return Vec::new();
        };
        let mut woken = Vec::new();
        let limit = if n < 0 { usize::MAX } else { n as usize };
        while woken.len() < limit {
            match q.front() {
                Some(t) => {
                    q.remove(t);
                    woken.push(t);
                }
                None => break,
            }
        }
        if q.is_empty() {
            self.parked.remove(&address);
        }
        woken
    }

    pub fn parked_count(&self, address: u32) -> usize {
        self.parked.get(&address).map(WaiterQueue::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_wakes_first_n_fifo() {
        let mut a = AddressArbiter::new();
        a.park(0x1000, ThreadId(1));
        a.park(0x1000, ThreadId(2));
        a.park(0x1000, ThreadId(3));
        let woken = a.signal(0x1000, 2);
        assert_eq!(woken, vec![ThreadId(1), ThreadId(2)]);
        assert_eq!(a.parked_count(0x1000), 1);
    }

    #[test]
    fn signal_negative_n_wakes_everyone() {
        let mut a = AddressArbiter::new();
        a.park(0x2000, ThreadId(1));
        a.park(0x2000, ThreadId(2));
        let woken = a.signal(0x2000, -1);
        assert_eq!(woken.len(), 2);
        assert_eq!(a.parked_count(0x2000), 0);
    }

    #[test]
    fn distinct_addresses_are_independent() {
        let mut a = AddressArbiter::new();
        a.park(0x1000, ThreadId(1));
        a.park(0x2000, ThreadId(2));
        assert_eq!(a.signal(0x1000, 1), vec![ThreadId(1)]);
        assert_eq!(a.parked_count(0x2000), 1);
    }
}
