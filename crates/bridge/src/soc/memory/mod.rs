//! Guest RAM.
//!
//! This module implements the main system memory. It provides:
//! 1. **Buffer:** Host-backed storage (`DramBuffer`) for RAM contents.
//! 2. **Memory:** A RAM window that maps the buffer at a guest physical base address and
//!    exposes host pointers for the bus fast path and the engine's page pointers.

/// Host mmap buffer for raw byte storage.
pub mod buffer;

use std::ptr::NonNull;
use std::sync::Arc;

use self::buffer::DramBuffer;
use crate::common::PhysAddr;

/// System memory mapped at a fixed guest physical base.
#[derive(Debug)]
pub struct Memory {
    /// Shared reference to the underlying memory buffer.
    buffer: Arc<DramBuffer>,
    /// The base physical address where this memory is mapped.
    base_addr: u64,
}

impl Memory {
    /// Creates a new Memory instance.
    ///
    /// # Arguments
    ///
    /// * `buffer` - Shared DRAM buffer.
    /// * `base_addr` - Starting physical address.
    pub const fn new(buffer: Arc<DramBuffer>, base_addr: u64) -> Self {
        Self { buffer, base_addr }
    }

    /// Returns (base_address, size_in_bytes) of the RAM window.
    pub fn address_range(&self) -> (u64, u64) {
        (self.base_addr, self.buffer.len() as u64)
    }

    /// Returns the backing buffer.
    pub const fn buffer(&self) -> &Arc<DramBuffer> {
        &self.buffer
    }

    /// Returns `true` if `addr` is inside this RAM window.
    pub fn contains(&self, addr: PhysAddr) -> bool {
        addr.val()
            .checked_sub(self.base_addr)
            .is_some_and(|off| off < self.buffer.len() as u64)
    }

    /// Returns the host pointer backing guest physical `addr`, if it is in range.
    pub fn host_ptr(&self, addr: PhysAddr) -> Option<NonNull<u8>> {
        let offset = addr.val().checked_sub(self.base_addr)?;
        self.buffer.ptr_at(usize::try_from(offset).ok()?)
    }
}
