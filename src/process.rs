//! Guest processes: id, name, lifecycle state, per-process handle table,
//! VM manager, and the threads that belong to it. No ELF-loading or
//! page-table fields -- the loader and the ARM MMU model live outside this
//! crate.

use crate::config::KernelConfig;
use crate::handle::HandleTable;
use crate::memory::vm_manager::VmManager;
use crate::object::ObjectId;
use crate::thread::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Exited,
}

pub struct Process {
    pub id: ProcessId,
    pub name: String,
    pub state: ProcessState,
    pub handles: HandleTable,
    pub vm: VmManager,
    pub threads: Vec<ThreadId>,
    pub resource_limit: ObjectId,
    /// Next free TLS (thread-local storage) slot page offset, allocated one
    /// per spawned thread.
    pub tls_slots_used: u32,
}

impl Process {
    pub fn new(id: ProcessId, name: impl Into<String>, resource_limit: ObjectId, config: &KernelConfig) -> Self {
        Process {
            id,
            name: name.into(),
            state: ProcessState::Created,
            handles: HandleTable::new(config.max_handles_per_process),
            vm: VmManager::new(),
            threads: Vec::new(),
            resource_limit,
            tls_slots_used: 0,
        }
    }

    pub fn add_thread(&mut self, thread: ThreadId) {
        self.threads.push(thread);
    }

    pub fn remove_thread(&mut self, thread: ThreadId) {
        self.threads.retain(|&t| t != thread);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_process_has_empty_thread_list_and_handle_table() {
        let cfg = KernelConfig::default();
        let p = Process::new(ProcessId(1), "test", ObjectId(1), &cfg);
        assert_eq!(p.state, ProcessState::Created);
        assert!(p.threads.is_empty());
        assert!(p.handles.is_empty());
    }

    #[test]
    fn thread_list_add_remove() {
        let cfg = KernelConfig::default();
        let mut p = Process::new(ProcessId(1), "test", ObjectId(1), &cfg);
        p.add_thread(ThreadId(10));
        p.add_thread(ThreadId(11));
        p.remove_thread(ThreadId(10));
        assert_eq!(p.threads, vec![ThreadId(11)]);
    }
}
