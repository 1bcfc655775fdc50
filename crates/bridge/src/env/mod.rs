//! Per-core environment handed to the execution engine.
//!
//! `CoreEnvironment` is the capability set the engine calls back into while it runs one
//! core. It covers:
//! 1. **Memory:** Host page pointers for guest RAM and write protection of those pages.
//! 2. **Bus:** Transaction-level access for MMIO and anything off the fast path.
//! 3. **Time:** Kernel time plus progress within the current quantum, and one-shot timers.
//! 4. **Lines:** Output interrupt lines owned by this core.
//! 5. **Syscalls:** Fan-out of guest system calls to subscriber cores.
//! 6. **Debug hooks:** Basic-block, breakpoint, and watchpoint callbacks.
//!
//! The owning [`crate::core::CpuCore`] shares the environment through an `Arc` and reads
//! the state the engine leaves behind (idle and flush requests, faulted pages, stop
//! reasons) at quantum boundaries.

/// Debugger-facing breakpoint, watchpoint, and stop state.
pub mod debug;

/// Queue of pages whose write protection was lifted.
pub mod pages;

use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::common::constants::{GUEST_PAGE_SIZE, TIMER_CHANNELS};
use crate::common::{HostAddr, PhysAddr, Result, VirtAddr};
use crate::config::Protection;
use crate::core::irq::LineSet;
use crate::core::timer::{TimerChannel, TimerEvent, TimerSet};
use crate::engine::{Environment, Hint};
use crate::kernel::Clock;
use crate::protect::{MemoryProtector, OwnerId, PageAccessSink};
use crate::sim::SimContext;
use crate::soc::{Bus, Response, Transaction};
use crate::syscall::{CoreHandle, SyscallArg, SyscallRegistry};

use self::debug::DebugState;
use self::pages::PageQueue;

pub use self::debug::StopReason;
pub use self::pages::PageBatch;

/// Capability set of one core.
pub struct CoreEnvironment {
    core_id: u32,
    bus: Arc<Bus>,
    protector: Arc<MemoryProtector>,
    owner: OwnerId,
    pages: Arc<PageQueue>,
    clock: Arc<dyn Clock>,
    cycle_period_ps: u64,
    local_cycles: AtomicU64,
    params: HashMap<String, String>,
    timers: Mutex<TimerSet>,
    outputs: LineSet,
    idle: AtomicBool,
    flush_requested: AtomicBool,
    debug: DebugState,
    syscalls: Arc<SyscallRegistry>,
    subscribers: Mutex<Vec<CoreHandle>>,
}

impl fmt::Debug for CoreEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreEnvironment")
            .field("core_id", &self.core_id)
            .field("owner", &self.owner)
            .field("cycle_period_ps", &self.cycle_period_ps)
            .field("local_cycles", &self.local_cycles)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl CoreEnvironment {
    /// Creates the environment for `core_id` and attaches it to the protector.
    pub fn new(core_id: u32, ctx: &SimContext) -> Result<Self> {
        let pages = Arc::new(PageQueue::new(ctx.config.core.page_queue_capacity));
        let sink: Arc<dyn PageAccessSink> = pages.clone();
        let owner = ctx.protector.attach(sink)?;
        Ok(Self {
            core_id,
            bus: Arc::clone(&ctx.bus),
            protector: Arc::clone(&ctx.protector),
            owner,
            pages,
            clock: Arc::clone(&ctx.clock),
            cycle_period_ps: ctx.config.core.cycle_period_ps(),
            local_cycles: AtomicU64::new(0),
            params: ctx.config.core.params.clone(),
            timers: Mutex::new(TimerSet::default()),
            outputs: LineSet::new(),
            idle: AtomicBool::new(false),
            flush_requested: AtomicBool::new(false),
            debug: DebugState::default(),
            syscalls: Arc::clone(&ctx.syscalls),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Core this environment belongs to.
    pub const fn core_id(&self) -> u32 {
        self.core_id
    }

    /// Owner id under which pages are registered with the protector.
    pub const fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Debugger state.
    pub const fn debug(&self) -> &DebugState {
        &self.debug
    }

    fn timers(&self) -> MutexGuard<'_, TimerSet> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscriber_list(&self) -> MutexGuard<'_, Vec<CoreHandle>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `handle` to the broadcast list. Duplicates are delivered twice.
    pub fn subscribe(&self, handle: CoreHandle) {
        self.subscriber_list().push(handle);
    }

    /// Broadcast list in subscription order.
    pub fn subscribers(&self) -> Vec<CoreHandle> {
        self.subscriber_list().clone()
    }

    /// Current level of output line `id`.
    pub fn output_raised(&self, id: u32) -> bool {
        self.outputs.is_raised(id)
    }

    pub(crate) fn raise_output(&self, line: u32) {
        let _ = self.outputs.set(line, true);
    }

    /// Deadline pending on `channel`.
    pub fn timer_deadline(&self, channel: TimerChannel) -> Option<u64> {
        self.timers().pending(channel)
    }

    pub(crate) fn next_timer(&self) -> Option<TimerEvent> {
        self.timers().next()
    }

    pub(crate) fn take_due_timers(&self, now_ps: u64) -> Vec<TimerEvent> {
        self.timers().take_due(now_ps)
    }

    pub(crate) fn take_idle(&self) -> bool {
        self.idle.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn take_flush_request(&self) -> bool {
        self.flush_requested.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn take_faulted_pages(&self) -> PageBatch {
        self.pages.drain()
    }

    pub(crate) fn add_local_cycles(&self, cycles: u64) {
        let _ = self.local_cycles.fetch_add(cycles, Ordering::AcqRel);
    }

    /// Cycles executed since the last kernel synchronisation.
    pub fn local_cycles(&self) -> u64 {
        self.local_cycles.load(Ordering::Acquire)
    }

    /// Simulated time the core is ahead of the kernel clock.
    pub fn local_time_ps(&self) -> u64 {
        self.local_cycles().saturating_mul(self.cycle_period_ps)
    }

    /// Folds local progress back into the kernel clock's view of time.
    pub fn sync_local_time(&self) {
        self.local_cycles.store(0, Ordering::Release);
    }

    /// Lifts protection from every host page overlapping `[host, host + len)`.
    ///
    /// Owners are notified exactly as if the access had faulted, without taking a fault.
    fn release_protected(&self, host: NonNull<u8>, len: usize) {
        let page_size = self.protector.page_size();
        let start = HostAddr::from_ptr(host.as_ptr()).page_base(page_size).val();
        let end = host.as_ptr() as usize + len.max(1);
        let mut page = start;
        while page < end {
            let _ = self.protector.notify_page(page);
            page += page_size;
        }
    }
}

impl Environment for CoreEnvironment {
    fn get_page_ptr_r(&self, page: PhysAddr) -> Option<NonNull<u8>> {
        self.bus.page_ptr(page.page_base(), GUEST_PAGE_SIZE)
    }

    fn get_page_ptr_w(&self, page: PhysAddr) -> Option<NonNull<u8>> {
        self.bus.page_ptr(page.page_base(), GUEST_PAGE_SIZE)
    }

    fn protect_page(&self, host: NonNull<u8>, page: PhysAddr) {
        let page = page.page_base();
        let backs_page = self.bus.page_ptr(page, GUEST_PAGE_SIZE).is_some_and(|base| {
            let offset = (host.as_ptr() as usize).wrapping_sub(base.as_ptr() as usize);
            offset < GUEST_PAGE_SIZE as usize
        });
        if !backs_page {
            tracing::warn!(
                core = self.core_id,
                guest = format_args!("{:#x}", page.val()),
                "refusing to protect a pointer that does not back the guest page"
            );
            return;
        }
        // SAFETY: the pointer lies inside a guest RAM mapping owned by the bus, which is
        // only accessed through raw pointers and copies.
        let result = unsafe {
            self.protector
                .register_page(self.owner, page, HostAddr::from_ptr(host.as_ptr()))
        };
        if let Err(err) = result {
            tracing::warn!(core = self.core_id, error = %err, "page protection failed");
        }
    }

    fn transport(&self, txn: &mut Transaction<'_>) -> Response {
        let touches_protection =
            !txn.is_read() || self.protector.protection() == Protection::NoAccess;
        if touches_protection {
            if let Some(host) = self.bus.host_range(txn.addr, txn.data.len()) {
                self.release_protected(host, txn.data.len());
            }
        }
        self.bus.transport(txn)
    }

    fn signal(&self, id: u64, set: bool) {
        if id >= TIMER_CHANNELS as u64 {
            tracing::warn!(core = self.core_id, id, "signal on unknown output line");
            return;
        }
        let _ = self.outputs.set(id as u32, set);
    }

    fn broadcast_syscall(&self, callno: i32, arg: SyscallArg, asynchronous: bool) {
        let targets = self.subscribers();
        if targets.is_empty() {
            return;
        }
        if asynchronous {
            self.syscalls.broadcast_async(targets, callno, arg);
            return;
        }
        let report = self.syscalls.broadcast(&targets, callno, &arg);
        tracing::trace!(
            core = self.core_id,
            callno,
            delivered = report.delivered,
            failed = report.failures.len(),
            "syscall broadcast"
        );
    }

    fn get_time_ps(&self) -> u64 {
        self.clock.now_ps().saturating_add(self.local_time_ps())
    }

    fn get_param(&self, name: &str) -> Option<String> {
        self.params.get(name).cloned()
    }

    fn notify(&self, event_id: u64, time_ps: u64) {
        match TimerChannel::try_from(event_id) {
            Ok(channel) => {
                let _ = self.timers().arm(channel, time_ps);
                tracing::trace!(core = self.core_id, %channel, time_ps, "timer armed");
            }
            Err(id) => tracing::warn!(core = self.core_id, id, "notify for unknown timer"),
        }
    }

    fn cancel(&self, event_id: u64) {
        match TimerChannel::try_from(event_id) {
            Ok(channel) => {
                if self.timers().cancel(channel).is_some() {
                    tracing::trace!(core = self.core_id, %channel, "timer cancelled");
                }
            }
            Err(id) => tracing::warn!(core = self.core_id, id, "cancel for unknown timer"),
        }
    }

    fn hint(&self, hint: Hint) {
        match hint {
            Hint::Idle => self.idle.store(true, Ordering::Release),
            Hint::FlushTranslations => self.flush_requested.store(true, Ordering::Release),
        }
    }

    fn handle_begin_basic_block(&self, addr: VirtAddr) -> bool {
        self.debug.begin_block(addr)
    }

    fn handle_breakpoint(&self, addr: VirtAddr) -> bool {
        self.debug.hit_breakpoint(addr)
    }

    fn handle_watchpoint(&self, addr: VirtAddr, size: u64, data: u64, is_write: bool) -> bool {
        self.debug.hit_watchpoint(addr, size, data, is_write)
    }
}
