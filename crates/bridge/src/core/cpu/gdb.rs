//! GDB-style Introspection.
//!
//! Data-access hooks for an external debug front end. The wire protocol lives elsewhere;
//! every hook reports failure as `false` or `None` and never aborts the simulation.

use super::CpuCore;
use crate::common::constants::GUEST_PAGE_SIZE;
use crate::common::{PhysAddr, VirtAddr};
use crate::engine::WatchKind;
use crate::env::StopReason;

impl CpuCore {
    /// Number of registers exposed to the debugger.
    pub fn gdb_num_registers(&self) -> usize {
        self.engine.num_registers()
    }

    /// Width of register `idx` in bytes.
    pub fn gdb_register_width(&self, idx: usize) -> Option<usize> {
        if idx >= self.engine.num_registers() {
            return None;
        }
        self.engine.register_width(idx)
    }

    /// Reads register `idx` into `buf`.
    ///
    /// Fails for unknown registers and for buffers shorter than the register.
    pub fn gdb_read_reg(&self, idx: usize, buf: &mut [u8]) -> bool {
        match self.gdb_register_width(idx) {
            Some(width) if buf.len() >= width => self.engine.read_register(idx, &mut buf[..width]),
            _ => false,
        }
    }

    /// Writes register `idx` from `buf`.
    ///
    /// Fails for unknown registers and for buffers shorter than the register.
    pub fn gdb_write_reg(&mut self, idx: usize, buf: &[u8]) -> bool {
        match self.gdb_register_width(idx) {
            Some(width) if buf.len() >= width => self.engine.write_register(idx, &buf[..width]),
            _ => false,
        }
    }

    /// Guest page size for address translation, defaulting to the bridge page size.
    pub fn gdb_page_size(&self) -> u64 {
        self.engine.page_size().unwrap_or(GUEST_PAGE_SIZE)
    }

    /// Translates a guest virtual address with the engine's current MMU state.
    pub fn gdb_virt_to_phys(&self, addr: VirtAddr) -> Option<PhysAddr> {
        self.engine.virt_to_phys(addr)
    }

    /// Inserts a breakpoint at `addr`. Inserting an existing breakpoint succeeds.
    pub fn gdb_insert_breakpoint(&mut self, addr: VirtAddr) -> bool {
        if self.env.debug().has_breakpoint(addr) {
            return true;
        }
        if !self.engine.add_breakpoint(addr) {
            return false;
        }
        self.env.debug().insert_breakpoint(addr)
    }

    /// Removes the breakpoint at `addr`; fails if none is set.
    pub fn gdb_remove_breakpoint(&mut self, addr: VirtAddr) -> bool {
        if !self.env.debug().remove_breakpoint(addr) {
            return false;
        }
        let _ = self.engine.remove_breakpoint(addr);
        true
    }

    /// Inserts a watchpoint over `[addr, addr + size)`. Inserting an existing one succeeds.
    pub fn gdb_insert_watchpoint(&mut self, addr: VirtAddr, size: u64, kind: WatchKind) -> bool {
        if size == 0 {
            return false;
        }
        if !self.env.debug().insert_watchpoint(addr, size, kind) {
            return true;
        }
        if self.engine.add_watchpoint(addr, size, kind) {
            return true;
        }
        let _ = self.env.debug().remove_watchpoint(addr, size, kind);
        false
    }

    /// Removes a watchpoint inserted with the same arguments; fails if none matches.
    pub fn gdb_remove_watchpoint(&mut self, addr: VirtAddr, size: u64, kind: WatchKind) -> bool {
        if !self.env.debug().remove_watchpoint(addr, size, kind) {
            return false;
        }
        let _ = self.engine.remove_watchpoint(addr, size, kind);
        true
    }

    /// Halts the core on behalf of the front end and records `signal` as the stop reason.
    pub fn gdb_notify(&mut self, signal: i32) {
        self.engine.stop();
        self.env.debug().record(StopReason::Signal(signal));
    }

    /// Enables or disables halting before every basic block.
    pub fn gdb_single_step(&mut self, enable: bool) {
        self.env.debug().set_stepping(enable);
        self.engine.trace_basic_blocks(enable);
    }
}
