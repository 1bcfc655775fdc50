//! Simulation-kernel time source.
//!
//! The kernel owns simulated time; the bridge only reads it. [`ManualClock`] is a
//! settable implementation for kernels that advance time themselves (and for tests).

use std::sync::atomic::{AtomicU64, Ordering};

/// Current simulated time as seen by the kernel.
pub trait Clock: Send + Sync {
    /// Kernel time in picoseconds at the start of the current quantum.
    fn now_ps(&self) -> u64;
}

/// A clock advanced explicitly by its owner.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at time zero.
    pub const fn new() -> Self {
        Self {
            now: AtomicU64::new(0),
        }
    }

    /// Moves time forward by `delta_ps` and returns the new time.
    pub fn advance(&self, delta_ps: u64) -> u64 {
        self.now.fetch_add(delta_ps, Ordering::AcqRel) + delta_ps
    }

    /// Sets the absolute time. Moving backwards is ignored.
    pub fn set(&self, now_ps: u64) {
        let _ = self.now.fetch_max(now_ps, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_ps(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
