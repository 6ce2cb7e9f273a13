//! Per-process handle table.
//!
//! An id-indexed table (`BTreeMap<Handle, ObjectId>` behind a small manager
//! struct) that maps a process-local `Handle` number to an `ObjectId` in
//! the global arena rather than owning the object directly, since the same
//! kernel object (a session, a shared memory block) can be referenced by
//! handles in more than one process's table.

use std::collections::BTreeMap;

use crate::error::{KernelError, KernelResult};
use crate::object::ObjectId;

/// Reserved pseudo-handles, resolved by the caller rather than looked up in
/// the table.
pub const HANDLE_CURRENT_THREAD: Handle = Handle(0xFFFF_8000);
pub const HANDLE_CURRENT_PROCESS: Handle = Handle(0xFFFF_8001);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(pub u32);

impl Handle {
    pub fn is_current_thread(self) -> bool {
        self == HANDLE_CURRENT_THREAD
    }

    pub fn is_current_process(self) -> bool {
        self == HANDLE_CURRENT_PROCESS
    }
}

#[derive(Default)]
pub struct HandleTable {
    entries: BTreeMap<Handle, ObjectId>,
    next_raw: u32,
    limit: usize,
}

impl HandleTable {
    pub fn new(limit: usize) -> Self {
        HandleTable {
            entries: BTreeMap::new(),
            next_raw: 1,
            limit,
        }
    }

    pub fn create(&mut self, object: ObjectId) -> KernelResult<Handle> {
        if self.entries.len() >= self.limit {
            return Err(KernelError::OutOfRange);
        }
        // Skip the reserved pseudo-handle range (0xFFFF_8000.. ) entirely;
        // in practice `next_raw` never gets close for a table bounded by
        // `limit`, but the check keeps the invariant explicit.
        loop {
            let candidate = Handle(self.next_raw);
            self.next_raw = self.next_raw.wrapping_add(1);
            if candidate.0 >= 0xFFFF_8000 {
                continue;
            }
            if !self.entries.contains_key(&candidate) {
                self.entries.insert(candidate, object);
                return Ok(candidate);
            }
        }
    }

    pub fn get(&self, handle: Handle) -> KernelResult<ObjectId> {
        self.entries.get(&handle).copied().ok_or(KernelError::InvalidHandle)
    }

    pub fn duplicate(&mut self, handle: Handle) -> KernelResult<Handle> {
        let object = self.get(handle)?;
        self.create(object)
    }

    pub fn close(&mut self, handle: Handle) -> KernelResult<ObjectId> {
        self.entries.remove(&handle).ok_or(KernelError::InvalidHandle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectId;

    #[test]
    fn create_get_close_round_trip() {
        let mut table = HandleTable::new(16);
        let h = table.create(ObjectId(7)).unwrap();
        assert_eq!(table.get(h).unwrap(), ObjectId(7));
        assert_eq!(table.close(h).unwrap(), ObjectId(7));
        assert!(matches!(table.get(h), Err(KernelError::InvalidHandle)));
    }

    #[test]
    fn duplicate_creates_a_second_handle_to_the_same_object() {
        let mut table = HandleTable::new(16);
        let h1 = table.create(ObjectId(3)).unwrap();
        let h2 = table.duplicate(h1).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(table.get(h2).unwrap(), ObjectId(3));
        table.close(h1).unwrap();
        assert_eq!(table.get(h2).unwrap(), ObjectId(3));
    }

    #[test]
    fn table_enforces_its_limit() {
        let mut table = HandleTable::new(1);
        table.create(ObjectId(1)).unwrap();
        assert!(matches!(table.create(ObjectId(2)), Err(KernelError::OutOfRange)));
    }

    #[test]
    fn invalid_handle_is_reported() {
        let table = HandleTable::new(4);
        assert!(matches!(table.get(Handle(999)), Err(KernelError::InvalidHandle)));
    }
}
