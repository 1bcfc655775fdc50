//! Guest and Host Address types.
//!
//! This module defines strong types for the three address spaces the bridge deals with so
//! that they are never mixed by accident:
//! 1. **Guest physical:** Addresses on the simulated bus (`PhysAddr`).
//! 2. **Guest virtual:** Addresses as seen by guest software, only used by debug hooks (`VirtAddr`).
//! 3. **Host:** Raw pointer values inside the simulator process (`HostAddr`).

use super::constants::{GUEST_PAGE_SIZE, PAGE_OFFSET_MASK};

/// A virtual address in the guest address space.
///
/// Only the debug front end works with virtual addresses; the bridge itself asks the
/// engine to translate them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub u64);

/// A physical address on the simulated guest bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub u64);

/// An address inside the host process (the numeric value of a host pointer).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostAddr(pub usize);

impl VirtAddr {
    /// Creates a new virtual address from a raw 64-bit value.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(&self) -> u64 {
        self.0
    }
}

impl PhysAddr {
    /// Creates a new physical address from a raw 64-bit value.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(&self) -> u64 {
        self.0
    }

    /// Returns the base address of the guest page containing this address.
    pub const fn page_base(&self) -> Self {
        Self(self.0 & !PAGE_OFFSET_MASK)
    }

    /// Returns the byte offset of this address within its guest page.
    pub const fn page_offset(&self) -> u64 {
        self.0 & PAGE_OFFSET_MASK
    }

    /// Returns `true` if the address is aligned to a guest page boundary.
    pub const fn is_page_aligned(&self) -> bool {
        self.0 % GUEST_PAGE_SIZE == 0
    }
}

impl HostAddr {
    /// Creates a host address from a raw pointer.
    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    /// Returns the raw address value.
    #[inline(always)]
    pub const fn val(&self) -> usize {
        self.0
    }

    /// Returns the base of the host page containing this address.
    ///
    /// # Arguments
    ///
    /// * `page_size` - Host page size in bytes; must be a power of two.
    #[inline(always)]
    pub const fn page_base(&self, page_size: usize) -> Self {
        Self(self.0 & !(page_size - 1))
    }
}
