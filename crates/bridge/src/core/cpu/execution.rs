//! Quantum execution.
//!
//! This module implements how the kernel advances a core. It performs the following:
//! 1. **Boundary Delivery:** Interrupt changes, page invalidations, and flush requests
//!    are handed to the engine while it is stopped.
//! 2. **Cycle Accounting:** Executed cycles count as run time, the idle remainder as sleep.
//! 3. **Timers:** Due channels notify the engine and raise their output line.

use super::CpuCore;
use crate::core::timer::TimerChannel;

impl CpuCore {
    /// Advances the core by up to `cycles` cycles.
    ///
    /// The engine's reported count is clamped to `cycles` and added to the run counter. If
    /// the engine hinted idle during the quantum, the rest of it is added to the sleep
    /// counter. Returns the sum of both deltas, which never exceeds `cycles`.
    pub fn simulate(&mut self, cycles: u64) -> u64 {
        if cycles == 0 {
            return 0;
        }
        self.deliver_interrupts();
        self.sync_pages();
        let _ = self.env.take_idle();

        let ran = self.engine.step(cycles).min(cycles);
        let slept = if self.env.take_idle() { cycles - ran } else { 0 };

        self.run_cycles += ran;
        self.sleep_cycles += slept;
        self.total_cycles = self.run_cycles + self.sleep_cycles;
        self.quanta += 1;
        self.env.add_local_cycles(ran + slept);

        // Writes made during the quantum are delivered before the kernel looks at the core.
        self.sync_pages();
        tracing::trace!(core_id = self.core_id, ran, slept, "quantum");
        ran + slept
    }

    /// Changes input line `irq`. Accepted at any time; delivered at the next quantum.
    pub fn interrupt(&self, irq: u32, set: bool) {
        let _ = self.irqs.set(irq, set);
    }

    fn deliver_interrupts(&mut self) {
        for (irq, level) in self.irqs.take_changes() {
            self.engine.interrupt(irq, level);
            self.interrupts_delivered += 1;
        }
    }

    /// Fires `channel`: notifies the engine and raises only that channel's output line.
    pub fn timer_irq_trigger(&mut self, channel: TimerChannel) {
        self.engine.notified(channel.event_id());
        self.env.raise_output(channel.line());
        self.timers_fired += 1;
        tracing::trace!(core_id = self.core_id, %channel, "timer fired");
    }

    /// Fires every timer due at `now_ps`, earliest first. Returns how many fired.
    pub fn advance_timers(&mut self, now_ps: u64) -> usize {
        let due = self.env.take_due_timers(now_ps);
        for event in &due {
            self.timer_irq_trigger(event.channel);
        }
        due.len()
    }

    /// Earliest pending timer deadline in picoseconds.
    pub fn next_timer_deadline(&self) -> Option<u64> {
        self.env.next_timer().map(|e| e.deadline_ps)
    }
}
