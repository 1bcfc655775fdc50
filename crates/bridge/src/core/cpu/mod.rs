//! CPU Core Definition and Initialization.
//!
//! This module defines `CpuCore`, the processor model the simulation kernel drives. It
//! coordinates the following:
//! 1. **Construction:** Creates the environment, attaches it to the protector and syscall
//!    registry, and asks the factory for an engine.
//! 2. **Execution:** Quantum-based `simulate` with run/sleep cycle accounting.
//! 3. **Memory Tracking:** Page invalidations and dirty pages from protection faults.
//! 4. **Debugging:** GDB-style register and breakpoint access.

/// Quantum execution, interrupt delivery, and timers.
pub mod execution;

/// GDB-style introspection hooks.
pub mod gdb;

/// Page invalidation, dirty tracking, and disassembly reads.
pub mod memory;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::common::{Error, PhysAddr, Result};
use crate::core::irq::{IrqHandle, IrqLatch};
use crate::engine::{Engine, EngineFactory, Environment};
use crate::env::{CoreEnvironment, StopReason};
use crate::sim::SimContext;
use crate::stats::CoreStats;
use crate::syscall::{CoreHandle, SyscallArg, SyscallError, SyscallRegistry};

/// One simulated processor: an engine plus the environment it runs against.
pub struct CpuCore {
    core_id: u32,
    engine: Box<dyn Engine>,
    env: Arc<CoreEnvironment>,
    irqs: Arc<IrqLatch>,
    syscalls: Arc<SyscallRegistry>,
    handle: CoreHandle,

    run_cycles: u64,
    sleep_cycles: u64,
    total_cycles: u64,

    dirty: BTreeSet<PhysAddr>,
    dirty_overflowed: bool,

    quanta: u64,
    interrupts_delivered: u64,
    pages_invalidated: u64,
    translation_flushes: u64,
    timers_fired: u64,
}

impl fmt::Debug for CpuCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuCore")
            .field("core_id", &self.core_id)
            .field("handle", &self.handle)
            .field("run_cycles", &self.run_cycles)
            .field("sleep_cycles", &self.sleep_cycles)
            .field("total_cycles", &self.total_cycles)
            .finish_non_exhaustive()
    }
}

impl CpuCore {
    /// Creates core `core_id` on the shared platform `ctx`.
    ///
    /// # Arguments
    ///
    /// * `core_id` - Immutable identifier of the core.
    /// * `ctx` - Shared bus, protector, clock, and syscall registry.
    /// * `factory` - Creates the engine; receives `ctx.config.core.engine_args`.
    ///
    /// # Returns
    ///
    /// The core, or [`Error::EngineCreation`] if the factory rejected the arguments.
    pub fn new(core_id: u32, ctx: &SimContext, factory: &dyn EngineFactory) -> Result<Self> {
        let env = Arc::new(CoreEnvironment::new(core_id, ctx)?);
        let args = ctx.config.core.engine_args.as_str();
        let engine = factory
            .create(core_id, Arc::clone(&env) as Arc<dyn Environment>, args)
            .ok_or_else(|| Error::EngineCreation {
                core_id,
                args: args.to_owned(),
            })?;
        let handle = ctx.syscalls.register(core_id, engine.syscall_handler());
        tracing::debug!(core_id, owner = ?env.owner(), port = handle.index(), "core created");

        Ok(Self {
            core_id,
            engine,
            env,
            irqs: Arc::new(IrqLatch::default()),
            syscalls: Arc::clone(&ctx.syscalls),
            handle,
            run_cycles: 0,
            sleep_cycles: 0,
            total_cycles: 0,
            dirty: BTreeSet::new(),
            dirty_overflowed: false,
            quanta: 0,
            interrupts_delivered: 0,
            pages_invalidated: 0,
            translation_flushes: 0,
            timers_fired: 0,
        })
    }

    /// Immutable identifier of this core.
    pub const fn core_id(&self) -> u32 {
        self.core_id
    }

    /// Environment shared with the engine.
    pub const fn env(&self) -> &Arc<CoreEnvironment> {
        &self.env
    }

    /// Syscall port of this core, for other cores' subscriber lists.
    pub const fn handle(&self) -> CoreHandle {
        self.handle
    }

    /// Cloneable handle for raising input lines from other threads.
    pub fn irq_handle(&self) -> IrqHandle {
        IrqHandle::new(self.core_id, Arc::clone(&self.irqs))
    }

    /// Current program counter.
    pub fn program_counter(&self) -> u64 {
        self.engine.program_counter()
    }

    /// Current stack pointer.
    pub fn stack_pointer(&self) -> u64 {
        self.engine.stack_pointer()
    }

    /// Total cycles (`run + sleep`).
    pub const fn cycle_count(&self) -> u64 {
        self.total_cycles
    }

    /// Cycles the engine executed.
    pub const fn run_cycles(&self) -> u64 {
        self.run_cycles
    }

    /// Cycles the core slept.
    pub const fn sleep_cycles(&self) -> u64 {
        self.sleep_cycles
    }

    /// Simulated time the core is ahead of the kernel clock.
    pub fn local_time_ps(&self) -> u64 {
        self.env.local_time_ps()
    }

    /// Resets the local time offset once the kernel has caught up.
    pub fn sync_local_time(&self) {
        self.env.sync_local_time();
    }

    /// Appends `subscriber` to this core's broadcast list. Append-only.
    pub fn add_syscall_subscriber(&self, subscriber: CoreHandle) {
        self.env.subscribe(subscriber);
    }

    /// Delivers a system call broadcast by another core to this core's engine.
    pub fn handle_syscall(&self, callno: i32, arg: &SyscallArg) -> std::result::Result<(), SyscallError> {
        self.syscalls.deliver(self.handle, callno, arg)
    }

    /// Removes and returns why the core last halted for the debugger.
    pub fn take_stop_reason(&self) -> Option<StopReason> {
        self.env.debug().take_stop()
    }

    /// Snapshot of this core's counters.
    pub fn stats(&self) -> CoreStats {
        CoreStats {
            core_id: self.core_id,
            run_cycles: self.run_cycles,
            sleep_cycles: self.sleep_cycles,
            total_cycles: self.total_cycles,
            quanta: self.quanta,
            interrupts_delivered: self.interrupts_delivered,
            pages_invalidated: self.pages_invalidated,
            translation_flushes: self.translation_flushes,
            timers_fired: self.timers_fired,
            blocks_executed: self.env.debug().blocks_executed(),
            dirty_pages: self.dirty.len(),
        }
    }
}

impl Drop for CpuCore {
    fn drop(&mut self) {
        self.syscalls.detach(self.handle);
        tracing::debug!(core_id = self.core_id, "core destroyed");
    }
}
