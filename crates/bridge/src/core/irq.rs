//! Interrupt lines.
//!
//! Input lines are latched from any thread and delivered to the engine at the next
//! quantum boundary; output lines are raised by the engine (or a timer) and read by the
//! platform's interrupt routing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Number of input interrupt lines per core.
pub const IRQ_LINES: u32 = 64;

/// A set of up to 64 level-triggered lines.
#[derive(Debug, Default)]
pub struct LineSet {
    levels: AtomicU64,
}

impl LineSet {
    /// Creates a set with every line low.
    pub const fn new() -> Self {
        Self {
            levels: AtomicU64::new(0),
        }
    }

    /// Drives `line` to `level`; returns the previous level.
    pub fn set(&self, line: u32, level: bool) -> bool {
        let bit = 1u64 << line;
        let prev = if level {
            self.levels.fetch_or(bit, Ordering::AcqRel)
        } else {
            self.levels.fetch_and(!bit, Ordering::AcqRel)
        };
        prev & bit != 0
    }

    /// Current level of `line`.
    pub fn is_raised(&self, line: u32) -> bool {
        line < 64 && self.levels.load(Ordering::Acquire) & (1 << line) != 0
    }

    /// Current level of every line as a bitmap.
    pub fn snapshot(&self) -> u64 {
        self.levels.load(Ordering::Acquire)
    }
}

/// Input lines with change tracking.
#[derive(Debug, Default)]
pub struct IrqLatch {
    lines: LineSet,
    changed: AtomicU64,
}

impl IrqLatch {
    /// Records a level change on `irq`. Lines outside `0..IRQ_LINES` are dropped.
    pub fn set(&self, irq: u32, level: bool) -> bool {
        if irq >= IRQ_LINES {
            tracing::warn!(irq, "interrupt line out of range");
            return false;
        }
        let _ = self.lines.set(irq, level);
        let _ = self.changed.fetch_or(1 << irq, Ordering::AcqRel);
        true
    }

    /// Removes and returns every line changed since the last call with its current level.
    ///
    /// A line that toggled several times is reported once, at its latest level.
    pub fn take_changes(&self) -> Vec<(u32, bool)> {
        let mut changed = self.changed.swap(0, Ordering::AcqRel);
        let levels = self.lines.snapshot();
        let mut out = Vec::with_capacity(changed.count_ones() as usize);
        while changed != 0 {
            let irq = changed.trailing_zeros();
            out.push((irq, levels & (1 << irq) != 0));
            changed &= changed - 1;
        }
        out
    }

    /// Current level of `irq`.
    pub fn is_raised(&self, irq: u32) -> bool {
        self.lines.is_raised(irq)
    }
}

/// Cloneable handle for raising a core's input lines from another thread.
#[derive(Clone, Debug)]
pub struct IrqHandle {
    core_id: u32,
    latch: Arc<IrqLatch>,
}

impl IrqHandle {
    pub(crate) const fn new(core_id: u32, latch: Arc<IrqLatch>) -> Self {
        Self { core_id, latch }
    }

    /// Core the handle drives.
    pub const fn core_id(&self) -> u32 {
        self.core_id
    }

    /// Raises or lowers input line `irq`; see [`crate::core::CpuCore::interrupt`].
    pub fn interrupt(&self, irq: u32, set: bool) -> bool {
        self.latch.set(irq, set)
    }
}
