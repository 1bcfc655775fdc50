//! System interconnect (bus) for memory and MMIO access.
//!
//! This module implements the bus that routes guest physical accesses. It provides:
//! 1. **RAM regions:** Host-backed windows served without locking, either by page pointer
//!    (engine fast path) or by copy (transport).
//! 2. **Device routing:** MMIO devices sorted by base address, each behind its own lock so
//!    that cores on different threads can share the bus.
//! 3. **Timing:** Transfer time from bus width and base latency.

use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::common::PhysAddr;
use crate::soc::memory::Memory;
use crate::soc::memory::buffer::DramBuffer;
use crate::soc::traits::Device;
use crate::soc::transaction::{BusStatus, Command, Response, Transaction};

/// Guest bus shared by every core of the platform.
///
/// Built during elaboration with `&mut self` methods, then shared behind an `Arc`.
pub struct Bus {
    ram: Vec<Memory>,
    devices: Vec<(u64, u64, Mutex<Box<dyn Device>>)>,
    /// Bus width in bytes (e.g., 8 for 64-bit); used to compute transfer cycles.
    pub width_bytes: u64,
    /// Base latency in cycles per transaction.
    pub latency_cycles: u64,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("ram", &self.ram)
            .field("devices", &self.devices.len())
            .field("width_bytes", &self.width_bytes)
            .field("latency_cycles", &self.latency_cycles)
            .finish()
    }
}

impl Bus {
    /// Creates a new bus with the given width and latency.
    ///
    /// # Arguments
    ///
    /// * `width_bytes` - Transfer width in bytes (e.g., 8); clamped to at least 1.
    /// * `latency_cycles` - Base cycles per transaction.
    ///
    /// # Returns
    ///
    /// An empty bus; add RAM with `add_ram` and devices with `add_device`.
    pub fn new(width_bytes: u64, latency_cycles: u64) -> Self {
        Self {
            ram: Vec::new(),
            devices: Vec::new(),
            width_bytes: width_bytes.max(1),
            latency_cycles,
        }
    }

    /// Maps `buffer` as guest RAM at `base`.
    pub fn add_ram(&mut self, base: u64, buffer: Arc<DramBuffer>) {
        tracing::debug!(base = format_args!("{base:#x}"), size = buffer.len(), "RAM attached");
        self.ram.push(Memory::new(buffer, base));
        self.ram.sort_by_key(|m| m.address_range().0);
    }

    /// Registers an MMIO device; devices are sorted by base address for lookup.
    pub fn add_device(&mut self, dev: Box<dyn Device>) {
        let (base, size) = dev.address_range();
        tracing::debug!(name = dev.name(), base = format_args!("{base:#x}"), size, "device attached");
        self.devices.push((base, size, Mutex::new(dev)));
        self.devices.sort_by_key(|d| d.0);
    }

    /// Returns the number of cycles to transfer the given number of bytes on this bus.
    ///
    /// Cycles = base latency plus ceiling(bytes / width_bytes) transfers.
    pub fn calculate_transit_time(&self, bytes: usize) -> u64 {
        self.latency_cycles + (bytes as u64).div_ceil(self.width_bytes)
    }

    /// Returns the RAM regions as (base, size) pairs.
    pub fn ram_regions(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ram.iter().map(Memory::address_range)
    }

    fn find_ram(&self, addr: PhysAddr) -> Option<&Memory> {
        self.ram.iter().find(|m| m.contains(addr))
    }

    /// Returns the host pointer backing the guest page at `page`, or `None` for non-RAM.
    ///
    /// `page` must be a guest page base; the whole page must lie inside one RAM region.
    pub fn page_ptr(&self, page: PhysAddr, page_size: u64) -> Option<NonNull<u8>> {
        let last = PhysAddr(page.val().checked_add(page_size.checked_sub(1)?)?);
        let mem = self.find_ram(page)?;
        if !mem.contains(last) {
            return None;
        }
        mem.host_ptr(page)
    }

    /// Resolves `[addr, addr + len)` to a host pointer if it lies inside one RAM region.
    pub fn host_range(&self, addr: PhysAddr, len: usize) -> Option<NonNull<u8>> {
        let mem = self.find_ram(addr)?;
        if len > 0 {
            let last = PhysAddr(addr.val().checked_add(len as u64 - 1)?);
            if !mem.contains(last) {
                return None;
            }
        }
        mem.host_ptr(addr)
    }

    /// Returns `true` if `[ptr, ptr + len)` lies inside host memory backing guest RAM.
    pub fn owns_host_range(&self, ptr: NonNull<u8>, len: usize) -> bool {
        let addr = ptr.as_ptr() as usize;
        self.ram.iter().any(|m| m.buffer().contains_host_range(addr, len))
    }

    /// Returns `true` if any RAM region or device claims `addr`.
    pub fn is_valid_address(&self, addr: PhysAddr) -> bool {
        self.find_ram(addr).is_some() || self.find_device(addr).is_some()
    }

    fn find_device(&self, addr: PhysAddr) -> Option<(&Mutex<Box<dyn Device>>, u64)> {
        let a = addr.val();
        self.devices
            .iter()
            .find(|(base, size, _)| a >= *base && a - *base < *size)
            .map(|(base, _, dev)| (dev, a - *base))
    }

    /// Performs a synchronous transaction.
    ///
    /// Accesses must fall entirely inside one RAM region or one device; anything else is
    /// an [`BusStatus::AddressError`]. Debug accesses are not timed.
    pub fn transport(&self, txn: &mut Transaction<'_>) -> Response {
        let len = txn.data.len();
        let status = if let Some(mem) = self.find_ram(txn.addr) {
            self.ram_access(mem, txn)
        } else if let Some((dev, offset)) = self.find_device(txn.addr) {
            match dev.lock() {
                Ok(mut dev) => {
                    let (_, size) = dev.address_range();
                    if offset.checked_add(len as u64).is_none_or(|end| end > size) {
                        BusStatus::AddressError
                    } else {
                        match txn.command {
                            Command::Read => dev.read(offset, txn.data),
                            Command::Write => dev.write(offset, txn.data),
                        }
                    }
                }
                Err(_) => BusStatus::DeviceError,
            }
        } else {
            BusStatus::AddressError
        };

        if !status.is_ok() {
            tracing::trace!(addr = format_args!("{:#x}", txn.addr.val()), len, %status, "bus error");
            return Response::error(status);
        }
        let cycles = if txn.is_debug {
            0
        } else {
            self.calculate_transit_time(len)
        };
        Response::ok(cycles)
    }

    fn ram_access(&self, mem: &Memory, txn: &mut Transaction<'_>) -> BusStatus {
        let (base, _) = mem.address_range();
        let Ok(offset) = usize::try_from(txn.addr.val() - base) else {
            return BusStatus::AddressError;
        };
        let ok = match txn.command {
            Command::Read => mem.buffer().read(offset, txn.data),
            Command::Write => mem.buffer().write(offset, txn.data),
        };
        if ok { BusStatus::Ok } else { BusStatus::AddressError }
    }
}
