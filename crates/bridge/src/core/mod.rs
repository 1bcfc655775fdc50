//! Processor model facing the simulation kernel.
//!
//! This module contains the core the kernel drives and its supporting state:
//! 1. **CpuCore:** Engine ownership, quantum execution, cycle accounting, debugging.
//! 2. **Interrupts:** Input latch and output lines.
//! 3. **Timers:** Generic-timer channels and their deadlines.

/// CPU core implementation and execution orchestration.
pub mod cpu;

/// Interrupt line latch and handles.
pub mod irq;

/// Generic-timer channels.
pub mod timer;

pub use self::cpu::CpuCore;
pub use self::cpu::memory::DirtyPages;
pub use self::irq::IrqHandle;
pub use self::timer::TimerChannel;
