//! Host page-protection primitives.
//!
//! Thin wrappers around `sysconf` and `mprotect`. The restore path is used from the fault
//! handler, so it reports failure as a plain `bool` and touches nothing but the syscall.

use std::io;

use crate::config::Protection;

/// Returns the host page size in bytes.
pub fn page_size() -> usize {
    // SAFETY: `sysconf` has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as usize }
}

/// Returns the `mprotect` flags for a protection mode.
const fn prot_flags(protection: Protection) -> libc::c_int {
    match protection {
        Protection::ReadOnly => libc::PROT_READ,
        Protection::NoAccess => libc::PROT_NONE,
    }
}

/// Removes write (or all) access from `len` bytes starting at host page `page`.
///
/// # Safety
///
/// `page..page + len` must be page-aligned memory mapped by this process that no Rust
/// reference assumes accessible while protected, and every access to it must either go
/// through raw pointers or be covered by an installed fault handler.
pub unsafe fn protect(page: usize, len: usize, protection: Protection) -> io::Result<()> {
    // SAFETY: forwarded to the caller.
    let rc = unsafe { libc::mprotect(page as *mut libc::c_void, len, prot_flags(protection)) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Restores read/write access to `len` bytes starting at host page `page`.
///
/// Async-signal-safe: no allocation, no locking, no error construction.
///
/// # Safety
///
/// `page..page + len` must be page-aligned memory previously passed to [`protect`].
pub unsafe fn restore(page: usize, len: usize) -> bool {
    // SAFETY: forwarded to the caller.
    unsafe {
        libc::mprotect(
            page as *mut libc::c_void,
            len,
            libc::PROT_READ | libc::PROT_WRITE,
        ) == 0
    }
}
