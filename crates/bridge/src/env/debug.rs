//! Debugger-facing state of one core.
//!
//! Breakpoints and watchpoints are mirrored here so that the engine's hooks can decide
//! whether to halt, and the reason for the last halt is kept for the debug front end.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::common::VirtAddr;
use crate::common::constants::SIGTRAP;
use crate::engine::WatchKind;

/// Why the core last halted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// A breakpoint was reached.
    Breakpoint(VirtAddr),
    /// A watched access happened.
    Watchpoint {
        /// Accessed address.
        addr: VirtAddr,
        /// Access size in bytes.
        size: u64,
        /// Value read or written.
        data: u64,
        /// Direction of the access.
        is_write: bool,
    },
    /// A single step completed before the block at this address.
    Step(VirtAddr),
    /// The front end interrupted the core with this signal.
    Signal(i32),
}

impl StopReason {
    /// Signal number reported to the debug front end.
    pub const fn signal(&self) -> i32 {
        match self {
            Self::Signal(sig) => *sig,
            Self::Breakpoint(_) | Self::Watchpoint { .. } | Self::Step(_) => SIGTRAP,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Watchpoint {
    addr: u64,
    size: u64,
    kind: WatchKind,
}

impl Watchpoint {
    fn overlaps(&self, addr: u64, size: u64) -> bool {
        let end = self.addr.saturating_add(self.size.max(1));
        let access_end = addr.saturating_add(size.max(1));
        addr < end && self.addr < access_end
    }
}

#[derive(Debug, Default)]
struct Points {
    breakpoints: BTreeSet<VirtAddr>,
    watchpoints: Vec<Watchpoint>,
    stop: Option<StopReason>,
}

/// Breakpoints, watchpoints, stepping, and the last stop reason.
#[derive(Debug, Default)]
pub struct DebugState {
    points: Mutex<Points>,
    stepping: AtomicBool,
    blocks: AtomicU64,
}

impl DebugState {
    fn points(&self) -> MutexGuard<'_, Points> {
        self.points.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a breakpoint; `false` if it was already present.
    pub fn insert_breakpoint(&self, addr: VirtAddr) -> bool {
        self.points().breakpoints.insert(addr)
    }

    /// Removes a breakpoint; `false` if none was present.
    pub fn remove_breakpoint(&self, addr: VirtAddr) -> bool {
        self.points().breakpoints.remove(&addr)
    }

    /// Returns `true` if a breakpoint is set at `addr`.
    pub fn has_breakpoint(&self, addr: VirtAddr) -> bool {
        self.points().breakpoints.contains(&addr)
    }

    /// Adds a watchpoint; `false` if an identical one was already present.
    pub fn insert_watchpoint(&self, addr: VirtAddr, size: u64, kind: WatchKind) -> bool {
        let wp = Watchpoint {
            addr: addr.val(),
            size,
            kind,
        };
        let mut points = self.points();
        if points.watchpoints.contains(&wp) {
            return false;
        }
        points.watchpoints.push(wp);
        true
    }

    /// Removes a watchpoint; `false` if no identical one was present.
    pub fn remove_watchpoint(&self, addr: VirtAddr, size: u64, kind: WatchKind) -> bool {
        let wp = Watchpoint {
            addr: addr.val(),
            size,
            kind,
        };
        let mut points = self.points();
        let before = points.watchpoints.len();
        points.watchpoints.retain(|w| *w != wp);
        points.watchpoints.len() != before
    }

    /// Enables or disables single stepping.
    pub fn set_stepping(&self, enable: bool) {
        self.stepping.store(enable, Ordering::Release);
    }

    /// Returns `true` while single stepping.
    pub fn is_stepping(&self) -> bool {
        self.stepping.load(Ordering::Acquire)
    }

    /// Basic blocks reported so far.
    pub fn blocks_executed(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Hook for the start of a basic block; halts when stepping.
    pub fn begin_block(&self, addr: VirtAddr) -> bool {
        let _ = self.blocks.fetch_add(1, Ordering::Relaxed);
        if !self.is_stepping() {
            return false;
        }
        self.record(StopReason::Step(addr));
        true
    }

    /// Hook for a breakpoint hit; halts only if the front end set one at `addr`.
    pub fn hit_breakpoint(&self, addr: VirtAddr) -> bool {
        let mut points = self.points();
        if !points.breakpoints.contains(&addr) {
            return false;
        }
        points.stop = Some(StopReason::Breakpoint(addr));
        true
    }

    /// Hook for a watched access; halts if a matching watchpoint overlaps the access.
    pub fn hit_watchpoint(&self, addr: VirtAddr, size: u64, data: u64, is_write: bool) -> bool {
        let mut points = self.points();
        let hit = points
            .watchpoints
            .iter()
            .any(|w| w.kind.matches(is_write) && w.overlaps(addr.val(), size));
        if hit {
            points.stop = Some(StopReason::Watchpoint {
                addr,
                size,
                data,
                is_write,
            });
        }
        hit
    }

    /// Records why the core halted, replacing any unread reason.
    pub fn record(&self, reason: StopReason) {
        self.points().stop = Some(reason);
    }

    /// Removes and returns the last stop reason.
    pub fn take_stop(&self) -> Option<StopReason> {
        self.points().stop.take()
    }
}
