//! Device trait for memory-mapped I/O.
//!
//! This module defines the `Device` trait implemented by every bus target. It provides:
//! 1. **Identification:** `name` and `address_range` for bus routing.
//! 2. **Access:** Byte-slice read/write at device-relative offsets with a status result.
//!
//! All implementors must be `Send` so that the bus can be shared between core threads.

use crate::soc::transaction::BusStatus;

/// Trait for memory-mapped I/O devices attached to the guest bus.
pub trait Device: Send {
    /// Returns a short name for this device (e.g., `"UART0"`, `"DRAM"`).
    fn name(&self) -> &str;
    /// Returns (base_address, size_in_bytes) for this device's region.
    fn address_range(&self) -> (u64, u64);
    /// Reads `data.len()` bytes at the given device-relative offset.
    fn read(&mut self, offset: u64, data: &mut [u8]) -> BusStatus;
    /// Writes `data` at the given device-relative offset.
    fn write(&mut self, offset: u64, data: &[u8]) -> BusStatus;
}
