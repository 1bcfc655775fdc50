//! Execution-engine contract.
//!
//! The engine is an external, instruction-accurate CPU model. This module defines the two
//! halves of the protocol between it and the bridge:
//! 1. **`Engine`:** What the core asks of the engine (run, interrupt, invalidate, debug).
//! 2. **`Environment`:** What the engine may call back into while it runs (memory, bus,
//!    time, timers, interrupts out, syscalls, debug hooks).
//! 3. **`EngineFactory`:** How an engine is created for a core.
//!
//! All `Environment` callbacks are made from the thread currently running
//! [`Engine::step`] unless stated otherwise.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::common::{PhysAddr, VirtAddr};
use crate::soc::{Response, Transaction};
use crate::syscall::{SyscallArg, SyscallHandler};

/// Kind of memory access a watchpoint triggers on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Reads only.
    Read,
    /// Writes only.
    Write,
    /// Reads and writes.
    Access,
}

impl WatchKind {
    /// Returns `true` if an access of the given direction triggers this watchpoint.
    pub const fn matches(self, is_write: bool) -> bool {
        match self {
            Self::Read => !is_write,
            Self::Write => is_write,
            Self::Access => true,
        }
    }
}

/// Advisory notifications from the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hint {
    /// The core is waiting for an interrupt; the rest of the quantum is sleep time.
    Idle,
    /// Translated code is stale; flush all translations before the next step.
    FlushTranslations,
}

/// Instruction-accurate CPU model driven by a [`crate::core::CpuCore`].
pub trait Engine: Send {
    /// Executes up to `cycles` cycles and returns how many were executed.
    ///
    /// Returns early when halted by a debug hook, [`Engine::stop`], or an idle hint.
    fn step(&mut self, cycles: u64) -> u64;

    /// Requests that the current or next `step` returns as soon as possible.
    fn stop(&mut self);

    /// Raises or lowers input interrupt line `irq`.
    fn interrupt(&mut self, irq: u32, set: bool);

    /// A timer requested with [`Environment::notify`] fired for `event_id`.
    fn notified(&mut self, event_id: u64);

    /// Discards translations and cached pointers for the guest page `page`.
    fn invalidate_page(&mut self, page: PhysAddr);

    /// Discards all translations.
    fn flush_translations(&mut self);

    /// Number of registers exposed to the debugger.
    fn num_registers(&self) -> usize;

    /// Width in bytes of register `idx`.
    fn register_width(&self, idx: usize) -> Option<usize>;

    /// Reads register `idx` into `buf` (at least `register_width` bytes).
    fn read_register(&self, idx: usize, buf: &mut [u8]) -> bool;

    /// Writes register `idx` from `buf`.
    fn write_register(&mut self, idx: usize, buf: &[u8]) -> bool;

    /// Current guest MMU page size, if paging is enabled.
    fn page_size(&self) -> Option<u64>;

    /// Translates a guest virtual address with the current MMU state.
    fn virt_to_phys(&self, addr: VirtAddr) -> Option<PhysAddr>;

    /// Enables [`Environment::handle_breakpoint`] callbacks at `addr`.
    fn add_breakpoint(&mut self, addr: VirtAddr) -> bool;

    /// Disables breakpoint callbacks at `addr`.
    fn remove_breakpoint(&mut self, addr: VirtAddr) -> bool;

    /// Enables [`Environment::handle_watchpoint`] callbacks for `[addr, addr + size)`.
    fn add_watchpoint(&mut self, addr: VirtAddr, size: u64, kind: WatchKind) -> bool;

    /// Disables watchpoint callbacks for `[addr, addr + size)`.
    fn remove_watchpoint(&mut self, addr: VirtAddr, size: u64, kind: WatchKind) -> bool;

    /// Enables or disables [`Environment::handle_begin_basic_block`] callbacks.
    fn trace_basic_blocks(&mut self, enable: bool);

    /// Disassembles one instruction from `bytes` located at `addr`.
    ///
    /// Returns the text and the instruction length in bytes.
    fn disassemble(&self, addr: VirtAddr, bytes: &[u8]) -> Option<(String, usize)>;

    /// Current program counter.
    fn program_counter(&self) -> u64;

    /// Current stack pointer.
    fn stack_pointer(&self) -> u64;

    /// Thread-safe receiver for system calls broadcast by other cores.
    fn syscall_handler(&self) -> Arc<dyn SyscallHandler>;
}

/// Capabilities the engine calls back into while running.
pub trait Environment: Send + Sync {
    /// Host pointer for reading the guest page at `page`; `None` means use [`transport`].
    ///
    /// [`transport`]: Environment::transport
    fn get_page_ptr_r(&self, page: PhysAddr) -> Option<NonNull<u8>>;

    /// Host pointer for writing the guest page at `page`; `None` means use [`transport`].
    ///
    /// [`transport`]: Environment::transport
    fn get_page_ptr_w(&self, page: PhysAddr) -> Option<NonNull<u8>>;

    /// Asks to be told (via [`Engine::invalidate_page`]) when the host page at `host` is
    /// next written. `host` must come from `get_page_ptr_w` for `page`.
    fn protect_page(&self, host: NonNull<u8>, page: PhysAddr);

    /// Performs a bus access outside the page fast path.
    fn transport(&self, txn: &mut Transaction<'_>) -> Response;

    /// Raises or lowers output line `id` of this core.
    fn signal(&self, id: u64, set: bool);

    /// Delivers a system call to every subscriber of this core.
    fn broadcast_syscall(&self, callno: i32, arg: SyscallArg, asynchronous: bool);

    /// Current simulated time in picoseconds, including progress within the quantum.
    fn get_time_ps(&self) -> u64;

    /// Engine parameter `name` from the platform configuration.
    fn get_param(&self, name: &str) -> Option<String>;

    /// Calls [`Engine::notified`] with `event_id` at absolute time `time_ps`.
    fn notify(&self, event_id: u64, time_ps: u64);

    /// Cancels a pending [`Environment::notify`] for `event_id`.
    fn cancel(&self, event_id: u64);

    /// Advisory notification.
    fn hint(&self, hint: Hint);

    /// A basic block at `addr` is about to execute; returns `true` to halt.
    fn handle_begin_basic_block(&self, addr: VirtAddr) -> bool;

    /// A breakpoint at `addr` was reached; returns `true` to halt.
    fn handle_breakpoint(&self, addr: VirtAddr) -> bool;

    /// A watched access happened; returns `true` to halt.
    fn handle_watchpoint(&self, addr: VirtAddr, size: u64, data: u64, is_write: bool) -> bool;
}

/// Creates the engine for a core.
pub trait EngineFactory {
    /// Returns a new engine for `core_id`, or `None` if the arguments are rejected.
    fn create(&self, core_id: u32, env: Arc<dyn Environment>, args: &str) -> Option<Box<dyn Engine>>;
}

impl<F> EngineFactory for F
where
    F: Fn(u32, Arc<dyn Environment>, &str) -> Option<Box<dyn Engine>>,
{
    fn create(&self, core_id: u32, env: Arc<dyn Environment>, args: &str) -> Option<Box<dyn Engine>> {
        self(core_id, env, args)
    }
}
