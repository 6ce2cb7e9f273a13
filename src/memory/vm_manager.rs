//! Per-process VMA map.
//!
//! An ordered `BTreeMap<base, Vma>` keyed for `O(log n)` upper-bound lookup
//! (`find_vma`) instead of a linear scan, since this map is walked on every
//! `ControlMemory`/`QueryMemory` SVC rather than only at process setup.

use std::collections::BTreeMap;

use crate::error::{KernelError, KernelResult};
use crate::memory::vma::{BackingKind, MemInfoState, Permission, Vma};
use crate::memory::{is_page_aligned, PAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMemoryOp {
    Free,
    Commit,
    Map,
    Unmap,
    Protect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegion {
    App,
    System,
    Base,
    Linear,
}

pub struct VmManager {
    regions: BTreeMap<u32, Vma>,
}

impl Default for VmManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VmManager {
    pub fn new() -> Self {
        let mut regions = BTreeMap::new();
        regions.insert(
            0,
            Vma {
                base: 0,
                size: u32::MAX,
                permissions: Permission::NONE,
                state: MemInfoState::Free,
                backing: BackingKind::Free,
            },
        );
        VmManager { regions }
    }

    /// Upper-bound lookup: the VMA whose `[base, end)` contains `addr`.
    pub fn find_vma(&self, addr: u32) -> Option<&Vma> {
        self.regions
            .range(..=addr)
            .next_back()
            .map(|(_, v)| v)
            .filter(|v| v.contains(addr))
    }

    fn find_vma_base(&self, addr: u32) -> Option<u32> {
        self.regions
            .range(..=addr)
            .next_back()
            .filter(|(_, v)| v.contains(addr))
            .map(|(&base, _)| base)
    }

    /// Split the VMA covering `at` into two at that boundary, if `at` falls
    /// strictly inside it. No-op if `at` is already a VMA boundary.
    fn split_at(&mut self, at: u32) {
        if let Some(base) = self.find_vma_base(at) {
            if base == at {
                return;
            }
            let vma = self.regions.get(&base).unwrap().clone();
            if at >= vma.end() {
                return;
            }
            let left_size = at - base;
            let right = Vma {
                base: at,
                size: vma.size - left_size,
                permissions: vma.permissions,
                state: vma.state,
                backing: vma.backing,
            };
            self.regions.get_mut(&base).unwrap().size = left_size;
            self.regions.insert(at, right);
        }
    }

    /// Merge `base` with its immediate neighbours if they're mergeable.
    fn coalesce_around(&mut self, base: u32) {
        let end = match self.regions.get(&base) {
            Some(v) => v.end(),
            None => return,
        };
        if let Some((&next_base, _)) = self.regions.range((end + 1)..).next() {
            if next_base == end {
                let can_merge = {
                    let a = &self.regions[&base];
                    let b = &self.regions[&next_base];
                    a.mergeable_with(b)
                };
                if can_merge {
                    let next = self.regions.remove(&next_base).unwrap();
                    self.regions.get_mut(&base).unwrap().size += next.size;
                }
            }
        }
        if let Some((&prev_base, _)) = self.regions.range(..base).next_back() {
            let prev_end = self.regions[&prev_base].end();
            if prev_end == base {
                let can_merge = {
                    let a = &self.regions[&prev_base];
                    let b = &self.regions[&base];
                    a.mergeable_with(b)
                };
                if can_merge {
                    let cur = self.regions.remove(&base).unwrap();
                    self.regions.get_mut(&prev_base).unwrap().size += cur.size;
                }
            }
        }
    }

    pub fn map_backing_memory(
        &mut self,
        base: u32,
        size: u32,
        permissions: Permission,
        state: MemInfoState,
        backing: BackingKind,
    ) -> KernelResult<()> {
        if !is_page_aligned(base) {
            return Err(KernelError::MisalignedAddress);
        }
        if !is_page_aligned(size) || size == 0 {
            return Err(KernelError::MisalignedSize);
        }
        let end = base.checked_add(size).ok_or(KernelError::OutOfRange)?;
        self.split_at(base);
        self.split_at(end);
        let overlapping: Vec<u32> = self
            .regions
            .range(base..end)
            .map(|(&b, _)| b)
            .collect();
        for b in overlapping {
            self.regions.remove(&b);
        }
        self.regions.insert(
            base,
            Vma {
                base,
                size,
                permissions,
                state,
                backing,
            },
        );
        self.coalesce_around(base);
        Ok(())
    }

    pub fn unmap(&mut self, base: u32, size: u32) -> KernelResult<()> {
        if !is_page_aligned(base) {
            return Err(KernelError::MisalignedAddress);
        }
        if !is_page_aligned(size) || size == 0 {
            return Err(KernelError::MisalignedSize);
        }
        self.map_backing_memory(base, size, Permission::NONE, MemInfoState::Free, BackingKind::Free)
    }

    pub fn reprotect_range(&mut self, base: u32, size: u32, permissions: Permission) -> KernelResult<()> {
        if !is_page_aligned(base) {
            return Err(KernelError::MisalignedAddress);
        }
        if !is_page_aligned(size) || size == 0 {
            return Err(KernelError::MisalignedSize);
        }
        let end = base.checked_add(size).ok_or(KernelError::OutOfRange)?;
        self.split_at(base);
        self.split_at(end);
        let bases: Vec<u32> = self.regions.range(base..end).map(|(&b, _)| b).collect();
        for b in &bases {
            self.regions.get_mut(b).unwrap().permissions = permissions;
        }
        for b in bases {
            self.coalesce_around(b);
        }
        Ok(())
    }

    /// Widest contiguous run around `addr` sharing permissions + state,
    /// regardless of exact backing identity.
    pub fn query_memory(&self, addr: u32) -> Option<(u32, u32, Permission, MemInfoState)> {
        let anchor = self.find_vma(addr)?;
        let mut lo = anchor.base;
        let mut hi = anchor.end();

        for (&b, v) in self.regions.range(..anchor.base).rev() {
            if v.end() == lo && v.mergeable_with(anchor) {
                lo = b;
            } else {
                break;
            }
        }
        for (&b, v) in self.regions.range(anchor.end()..) {
            if b == hi && v.mergeable_with(anchor) {
                hi = v.end();
            } else {
                break;
            }
        }
        Some((lo, hi - lo, anchor.permissions, anchor.state))
    }

    pub fn control_memory(
        &mut self,
        op: ControlMemoryOp,
        _region: MemoryRegion,
        addr: u32,
        size: u32,
        permissions: Permission,
        linear: bool,
    ) -> KernelResult<u32> {
        if !is_page_aligned(addr) && addr != 0 {
            return Err(KernelError::MisalignedAddress);
        }
        if !is_page_aligned(size) {
            return Err(KernelError::MisalignedSize);
        }
        match op {
            ControlMemoryOp::Commit => {
                let _ = linear;
                self.map_backing_memory(addr, size, permissions, MemInfoState::Private, BackingKind::Backing)?;
                Ok(addr)
            }
            ControlMemoryOp::Free | ControlMemoryOp::Unmap => {
                self.unmap(addr, size)?;
                Ok(addr)
            }
            ControlMemoryOp::Map => {
                self.map_backing_memory(addr, size, permissions, MemInfoState::Aliased, BackingKind::Backing)?;
                Ok(addr)
            }
            ControlMemoryOp::Protect => {
                self.reprotect_range(addr, size, permissions)?;
                Ok(addr)
            }
        }
    }

    pub fn log_layout(&self) {
        for (base, vma) in &self.regions {
            log::debug!(
                "vma base=0x{:08X} size=0x{:X} perm={:?} state={:?}",
                base,
                vma.size,
                vma.permissions,
                vma.state
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_unmap_query_round_trip() {
        let mut vm = VmManager::new();
        vm.map_backing_memory(0x1000, PAGE_SIZE, Permission::READ | Permission::WRITE, MemInfoState::Private, BackingKind::Backing)
            .unwrap();
        let (base, size, perm, state) = vm.query_memory(0x1000).unwrap();
        assert_eq!(base, 0x1000);
        assert_eq!(size, PAGE_SIZE);
        assert_eq!(perm, Permission::READ | Permission::WRITE);
        assert_eq!(state, MemInfoState::Private);

        vm.unmap(0x1000, PAGE_SIZE).unwrap();
        let (_, _, _, state) = vm.query_memory(0x1000).unwrap();
        assert_eq!(state, MemInfoState::Free);
    }

    #[test]
    fn misaligned_address_is_rejected() {
        let mut vm = VmManager::new();
        let err = vm
            .map_backing_memory(0x1001, PAGE_SIZE, Permission::READ, MemInfoState::Private, BackingKind::Backing)
            .unwrap_err();
        assert_eq!(err, KernelError::MisalignedAddress);
    }

    #[test]
    fn misaligned_size_is_rejected() {
        let mut vm = VmManager::new();
        let err = vm
            .map_backing_memory(0x1000, 100, Permission::READ, MemInfoState::Private, BackingKind::Backing)
            .unwrap_err();
        assert_eq!(err, KernelError::MisalignedSize);
    }

    #[test]
    fn adjacent_identical_mappings_coalesce() {
        let mut vm = VmManager::new();
        vm.map_backing_memory(0x1000, PAGE_SIZE, Permission::READ, MemInfoState::Private, BackingKind::Backing)
            .unwrap();
        vm.map_backing_memory(0x2000, PAGE_SIZE, Permission::READ, MemInfoState::Private, BackingKind::Backing)
            .unwrap();
        let (base, size, _, _) = vm.query_memory(0x1500).unwrap();
        assert_eq!(base, 0x1000);
        assert_eq!(size, PAGE_SIZE * 2);
    }

    #[test]
    fn reprotect_splits_at_edges() {
        let mut vm = VmManager::new();
        vm.map_backing_memory(0x1000, PAGE_SIZE * 4, Permission::READ, MemInfoState::Private, BackingKind::Backing)
            .unwrap();
        vm.reprotect_range(0x2000, PAGE_SIZE, Permission::READ | Permission::WRITE)
            .unwrap();
        let (base, size, perm, _) = vm.query_memory(0x2000).unwrap();
        assert_eq!(base, 0x2000);
        assert_eq!(size, PAGE_SIZE);
        assert_eq!(perm, Permission::READ | Permission::WRITE);

        let (base, _, perm, _) = vm.query_memory(0x1000).unwrap();
        assert_eq!(base, 0x1000);
        assert_eq!(perm, Permission::READ);
    }
}
