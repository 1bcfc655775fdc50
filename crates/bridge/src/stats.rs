//! Per-core statistics collection and reporting.
//!
//! This module snapshots the counters a `CpuCore` keeps while it runs. It provides:
//! 1. **Cycles:** Run, sleep, and total cycles with the share spent sleeping.
//! 2. **Quanta:** Number of `simulate` calls and interrupt changes delivered.
//! 3. **Memory tracking:** Page invalidations, full translation flushes, dirty pages.
//! 4. **Events:** Timers fired and basic blocks observed by the trace hook.

use std::fmt;

/// Snapshot of one core's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoreStats {
    /// Core the counters belong to.
    pub core_id: u32,
    /// Cycles the engine reported as executed.
    pub run_cycles: u64,
    /// Cycles the core spent idle.
    pub sleep_cycles: u64,
    /// `run_cycles + sleep_cycles`.
    pub total_cycles: u64,
    /// Number of non-empty `simulate` calls.
    pub quanta: u64,
    /// Interrupt line changes delivered to the engine.
    pub interrupts_delivered: u64,
    /// Single-page invalidations delivered to the engine.
    pub pages_invalidated: u64,
    /// Full translation flushes delivered to the engine.
    pub translation_flushes: u64,
    /// Timer channels that fired.
    pub timers_fired: u64,
    /// Basic blocks reported through the trace hook.
    pub blocks_executed: u64,
    /// Pages currently recorded as dirty.
    pub dirty_pages: usize,
}

impl CoreStats {
    fn pct(part: u64, whole: u64) -> f64 {
        if whole == 0 {
            0.0
        } else {
            part as f64 / whole as f64 * 100.0
        }
    }
}

impl fmt::Display for CoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==========================================================")?;
        writeln!(f, "CORE {} STATISTICS", self.core_id)?;
        writeln!(f, "==========================================================")?;
        writeln!(f, "sim_cycles               {}", self.total_cycles)?;
        writeln!(
            f,
            "  cycles.run             {} ({:.2}%)",
            self.run_cycles,
            Self::pct(self.run_cycles, self.total_cycles)
        )?;
        writeln!(
            f,
            "  cycles.sleep           {} ({:.2}%)",
            self.sleep_cycles,
            Self::pct(self.sleep_cycles, self.total_cycles)
        )?;
        writeln!(f, "  quanta                 {}", self.quanta)?;
        writeln!(f, "  irq.deliveries         {}", self.interrupts_delivered)?;
        writeln!(f, "----------------------------------------------------------")?;
        writeln!(f, "MEMORY TRACKING")?;
        writeln!(f, "  pages.invalidated      {}", self.pages_invalidated)?;
        writeln!(f, "  pages.dirty            {}", self.dirty_pages)?;
        writeln!(f, "  tc.flushes             {}", self.translation_flushes)?;
        writeln!(f, "----------------------------------------------------------")?;
        writeln!(f, "EVENTS")?;
        writeln!(f, "  timers.fired           {}", self.timers_fired)?;
        writeln!(f, "  blocks.executed        {}", self.blocks_executed)?;
        write!(f, "==========================================================")
    }
}
