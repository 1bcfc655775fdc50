//! Host-backed guest RAM buffer.
//!
//! This module provides a wrapper around an anonymous `mmap` region used as guest RAM.
//! Pages are only materialized by the host when first touched, and the region is
//! host-page aligned, which the memory protector relies on: every guest page handed to the
//! engine lies inside exactly one host page (or spans whole host pages).

use std::io;
use std::ptr::{self, NonNull};

/// An anonymous, host-page-aligned memory mapping.
///
/// Contents are accessed through raw pointers only. No Rust reference into the buffer
/// outlives a single copy, so pages may be write-protected while the buffer is shared.
#[derive(Debug)]
pub struct DramBuffer {
    ptr: NonNull<u8>,
    size: usize,
}

// SAFETY: the buffer is plain memory; all accesses go through raw pointers and callers
// coordinate concurrent writes the same way guest software would.
unsafe impl Send for DramBuffer {}
// SAFETY: see above.
unsafe impl Sync for DramBuffer {}

impl DramBuffer {
    /// Maps a zero-filled buffer of `size` bytes.
    ///
    /// # Arguments
    ///
    /// * `size` - Size of the buffer in bytes; must be non-zero.
    ///
    /// # Returns
    ///
    /// The buffer, or the OS error reported by `mmap`.
    pub fn new(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "guest RAM size must be non-zero",
            ));
        }
        // SAFETY: anonymous private mapping with no address hint has no preconditions.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(raw.cast::<u8>())
            .ok_or_else(|| io::Error::other("mmap returned a null mapping"))?;
        tracing::debug!(size, base = ?ptr, "guest RAM mapped");
        Ok(Self { ptr, size })
    }

    /// Returns the size of the buffer in bytes.
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Always `false`; zero-sized buffers are rejected at construction.
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Returns a pointer to byte `offset`, or `None` when out of range.
    pub fn ptr_at(&self, offset: usize) -> Option<NonNull<u8>> {
        if offset >= self.size {
            return None;
        }
        // SAFETY: `offset` is within the mapping.
        Some(unsafe { self.ptr.add(offset) })
    }

    /// Returns `true` if `[addr, addr + len)` lies inside the buffer.
    pub fn contains_host_range(&self, addr: usize, len: usize) -> bool {
        let start = self.ptr.as_ptr() as usize;
        addr >= start && addr.checked_add(len).is_some_and(|end| end <= start + self.size)
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// Returns `false` without copying if the range is out of bounds.
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> bool {
        if !self.in_bounds(offset, dst.len()) {
            return false;
        }
        // SAFETY: range checked above; `dst` cannot alias the mapping mutably.
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), dst.as_mut_ptr(), dst.len()) };
        true
    }

    /// Copies `src` into the buffer at `offset`.
    ///
    /// Returns `false` without copying if the range is out of bounds. Writing to a page
    /// that is currently write-protected faults like any other host write.
    pub fn write(&self, offset: usize, src: &[u8]) -> bool {
        if !self.in_bounds(offset, src.len()) {
            return false;
        }
        // SAFETY: range checked above.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(offset), src.len()) };
        true
    }

    fn in_bounds(&self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).is_some_and(|end| end <= self.size)
    }
}

impl Drop for DramBuffer {
    fn drop(&mut self) {
        // SAFETY: the region was mapped in `new` with exactly this size.
        if unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.size) } != 0 {
            tracing::warn!(size = self.size, "failed to unmap guest RAM");
        }
    }
}
