//! Kernel object arena.
//!
//! Threads and the wait objects they block on form cycles: a thread holds a
//! handle to a mutex, the mutex's waiter list holds a reference back to the
//! thread. Modeling that with owned `Rc`/`Arc` graphs fights the borrow
//! checker for no benefit, so every kernel object here lives in one arena,
//! keyed by a small `ThreadId`/`ObjectId` newtype into a single `BTreeMap`
//! rather than handing out shared pointers, and is referred to everywhere
//! else by a stable, copyable `ObjectId`.

use std::collections::BTreeMap;

use crate::arbiter::AddressArbiter;
use crate::ipc::port::{ClientPort, ServerPort};
use crate::ipc::session::{ClientSession, ServerSession};
use crate::process::Process;
use crate::shmem::SharedMemory;
use crate::sync::event::Event;
use crate::sync::mutex::Mutex;
use crate::sync::semaphore::Semaphore;
use crate::sync::timer::Timer;
use crate::thread::Thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u32);

/// Minimal, queryable resource limit: current usage vs. a configured cap.
/// `Commit` and session admission both consult it.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimit {
    pub commit_limit: usize,
    pub commit_current: usize,
    pub thread_limit: usize,
    pub thread_current: usize,
    pub session_limit: usize,
    pub session_current: usize,
}

impl Default for ResourceLimit {
    fn default() -> Self {
        ResourceLimit {
            commit_limit: 32 * 1024 * 1024,
            commit_current: 0,
            thread_limit: 256,
            thread_current: 0,
            session_limit: 256,
            session_current: 0,
        }
    }
}

pub enum KernelObject {
    Thread(Thread),
    Process(Process),
    Mutex(Mutex),
    Semaphore(Semaphore),
    Event(Event),
    Timer(Timer),
    AddressArbiter(AddressArbiter),
    SharedMemory(SharedMemory),
    ClientPort(ClientPort),
    ServerPort(ServerPort),
    ClientSession(ClientSession),
    ServerSession(ServerSession),
    ResourceLimit(ResourceLimit),
}

impl KernelObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            KernelObject::Thread(_) => "Thread",
            KernelObject::Process(_) => "Process",
            KernelObject::Mutex(_) => "Mutex",
            KernelObject::Semaphore(_) => "Semaphore",
            KernelObject::Event(_) => "Event",
            KernelObject::Timer(_) => "Timer",
            KernelObject::AddressArbiter(_) => "AddressArbiter",
            KernelObject::SharedMemory(_) => "SharedMemory",
            KernelObject::ClientPort(_) => "ClientPort",
            KernelObject::ServerPort(_) => "ServerPort",
            KernelObject::ClientSession(_) => "ClientSession",
            KernelObject::ServerSession(_) => "ServerSession",
            KernelObject::ResourceLimit(_) => "ResourceLimit",
        }
    }
}

/// Arena of kernel objects keyed by stable `ObjectId`. IDs are never reused
/// within a process lifetime; the counter only ever increases.
#[derive(Default)]
pub struct ObjectArena {
    objects: BTreeMap<ObjectId, KernelObject>,
    next_id: u32,
}

impl ObjectArena {
    pub fn new() -> Self {
        ObjectArena {
            objects: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn insert(&mut self, object: KernelObject) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.objects.insert(id, object);
        id
    }

    pub fn get(&self, id: ObjectId) -> Option<&KernelObject> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut KernelObject> {
        self.objects.get_mut(&id)
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<KernelObject> {
        self.objects.remove(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &KernelObject)> {
        self.objects.iter().map(|(id, obj)| (*id, obj))
    }

    pub fn ids_matching(&self, mut pred: impl FnMut(&KernelObject) -> bool) -> Vec<ObjectId> {
        self.objects.iter().filter(|(_, obj)| pred(obj)).map(|(id, _)| *id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_unique() {
        let mut arena = ObjectArena::new();
        let a = arena.insert(KernelObject::ResourceLimit(ResourceLimit::default()));
        let b = arena.insert(KernelObject::ResourceLimit(ResourceLimit::default()));
        assert_ne!(a, b);
        assert!(arena.contains(a));
        assert!(arena.contains(b));
    }

    #[test]
    fn remove_frees_the_slot_but_keeps_the_id_retired() {
        let mut arena = ObjectArena::new();
        let a = arena.insert(KernelObject::ResourceLimit(ResourceLimit::default()));
        assert!(arena.remove(a).is_some());
        assert!(!arena.contains(a));
        assert!(arena.get(a).is_none());
    }
}
