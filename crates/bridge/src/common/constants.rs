//! Global Bridge Constants.
//!
//! This module defines constants shared by the protector, the environment, and the core:
//! 1. **Memory Constants:** Guest page geometry.
//! 2. **Timer Constants:** Generic-timer channel count.
//! 3. **Debug Constants:** Signal numbers reported to the debug front end.

/// Guest page size in bytes (4KB).
pub const GUEST_PAGE_SIZE: u64 = 4096;

/// Number of bits to shift to convert between guest bytes and guest page frames.
pub const GUEST_PAGE_SHIFT: u32 = 12;

/// Mask for extracting the page offset from a guest address.
pub const PAGE_OFFSET_MASK: u64 = GUEST_PAGE_SIZE - 1;

/// Number of generic-timer channels per core (physical, virtual, hypervisor, secure).
pub const TIMER_CHANNELS: usize = 4;

/// Picoseconds per second.
pub const PS_PER_SEC: u64 = 1_000_000_000_000;

/// Signal reported to the debug front end when a breakpoint, watchpoint, or step halts the core.
pub const SIGTRAP: i32 = 5;

/// Signal reported to the debug front end when the core is interrupted by the user.
pub const SIGINT: i32 = 2;
