//! Common utilities and types used throughout the bridge.
//!
//! This module provides fundamental building blocks that are shared across all components
//! of the bridge. It includes:
//! 1. **Address Types:** Strong types for guest physical, guest virtual, and host addresses.
//! 2. **Constants:** Page geometry, generic-timer channels, and debugger signal numbers.
//! 3. **Error Handling:** The crate-wide `Error` type and `Result` alias.

/// Address type definitions (guest physical/virtual and host addresses).
pub mod addr;

/// Common constants used throughout the bridge.
pub mod constants;

/// Error types for construction, configuration, and host-primitive failures.
pub mod error;

pub use addr::{HostAddr, PhysAddr, VirtAddr};
pub use constants::{GUEST_PAGE_SHIFT, GUEST_PAGE_SIZE};
pub use error::{Error, Result};
