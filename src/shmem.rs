//! Shared memory kernel objects: owning process, size, per-mapper
//! permission, host backing, and the two-sided (owner-perm, other-perm)
//! pair the `CreateMemoryBlock` ABI exposes. Lives as one entry in the
//! single `KernelObject` arena like every other kernel object.

use crate::memory::vma::Permission;
use crate::process::ProcessId;

#[derive(Debug, Clone)]
pub struct SharedMemory {
    pub owner: ProcessId,
    pub size: u32,
    pub owner_permission: Permission,
    pub other_permission: Permission,
    /// Processes (other than the owner) that currently have this block
    /// mapped, and at what base address.
    pub mappings: Vec<(ProcessId, u32)>,
}

impl SharedMemory {
    pub fn new(owner: ProcessId, size: u32, owner_permission: Permission, other_permission: Permission) -> Self {
        SharedMemory {
            owner,
            size,
            owner_permission,
            other_permission,
            mappings: Vec::new(),
        }
    }

    pub fn permission_for(&self, process: ProcessId) -> Permission {
        if process == self.owner {
            self.owner_permission
        } else {
            self.other_permission
        }
    }

    pub fn map(&mut self, process: ProcessId, base: u32) {
        if !self.mappings.iter().any(|&(p, _)| p == process) {
            self.mappings.push((process, base));
        }
    }

    pub fn unmap(&mut self, process: ProcessId) {
        self.mappings.retain(|&(p, _)| p != process);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_differs_by_side() {
        let shm = SharedMemory::new(ProcessId(1), 0x1000, Permission::READ | Permission::WRITE, Permission::READ);
        assert_eq!(shm.permission_for(ProcessId(1)), Permission::READ | Permission::WRITE);
        assert_eq!(shm.permission_for(ProcessId(2)), Permission::READ);
    }

    #[test]
    fn map_unmap() {
        let mut shm = SharedMemory::new(ProcessId(1), 0x1000, Permission::READ, Permission::READ);
        shm.map(ProcessId(2), 0x2000);
        assert_eq!(shm.mappings.len(), 1);
        shm.unmap(ProcessId(2));
        assert!(shm.mappings.is_empty());
    }
}
