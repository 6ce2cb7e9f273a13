//! Virtual memory areas.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permission: u8 {
        const READ    = 0b001;
        const WRITE   = 0b010;
        const EXECUTE = 0b100;
    }
}

impl Permission {
    pub const NONE: Permission = Permission::empty();
    pub const DONT_CARE: Permission = Permission::from_bits_truncate(0b1000);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemInfoState {
    Free,
    Reserved,
    Io,
    Static,
    Code,
    Private,
    Shared,
    Continuous,
    Aliased,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackingKind {
    Free,
    Backing,
    SharedMemory,
}

#[derive(Debug, Clone)]
pub struct Vma {
    pub base: u32,
    pub size: u32,
    pub permissions: Permission,
    pub state: MemInfoState,
    pub backing: BackingKind,
}

impl Vma {
    pub fn end(&self) -> u32 {
        self.base + self.size
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Whether `self` and `other` can merge into a single VMA: adjacent
    /// VMAs with identical permissions, state, and compatible backing are
    /// mergeable. Backing compatibility only requires both to be the same
    /// enum variant -- distinct shared-memory blocks are never merged
    /// because `SharedMemory` doesn't carry the block id here; callers that
    /// need to distinguish blocks track that separately.
    pub fn mergeable_with(&self, other: &Vma) -> bool {
        self.permissions == other.permissions
            && self.state == other.state
            && std::mem::discriminant(&self.backing) == std::mem::discriminant(&other.backing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_half_open() {
        let v = Vma {
            base: 0x1000,
            size: 0x1000,
            permissions: Permission::READ,
            state: MemInfoState::Private,
            backing: BackingKind::Backing,
        };
        assert!(v.contains(0x1000));
        assert!(v.contains(0x1FFF));
        assert!(!v.contains(0x2000));
    }

    #[test]
    fn mergeable_requires_matching_permission_state_and_backing_kind() {
        let a = Vma {
            base: 0,
            size: 0x1000,
            permissions: Permission::READ | Permission::WRITE,
            state: MemInfoState::Private,
            backing: BackingKind::Backing,
        };
        let mut b = a.clone();
        b.base = 0x1000;
        assert!(a.mergeable_with(&b));
        b.permissions = Permission::READ;
        assert!(!a.mergeable_with(&b));
    }
}
