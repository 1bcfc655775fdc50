//! Bridge between an instruction-accurate CPU engine and a discrete-event simulation kernel.
//!
//! This crate adapts an external execution engine to a multi-core simulated platform with
//! the following:
//! 1. **Protect:** Write detection on guest RAM handed to the engine as raw host pointers,
//!    driven by host page protection and a process fault handler.
//! 2. **Env:** The per-core capability set the engine calls back into (memory, bus, time,
//!    timers, interrupts, syscalls, debug hooks).
//! 3. **Core:** The processor model the kernel drives (quanta, cycle accounting, interrupt
//!    lines, timer channels, GDB-style introspection).
//! 4. **Engine:** The trait contract the external engine implements.
//! 5. **SoC and Sim:** The guest bus with its RAM, and the context shared by all cores.

#[cfg(not(unix))]
compile_error!("cpu-bridge relies on mprotect and POSIX signals and only supports Unix hosts");

/// Common types and constants (addresses, page geometry, errors).
pub mod common;
/// Bridge configuration (defaults, protection mode, hierarchical config structures).
pub mod config;
/// Processor model (core, interrupt lines, timers).
pub mod core;
/// Execution-engine trait contract and factory seam.
pub mod engine;
/// Per-core environment handed to the engine.
pub mod env;
/// Simulation-kernel time source.
pub mod kernel;
/// Host page protection and the process fault handler.
pub mod protect;
/// Simulation context shared by the cores of a platform.
pub mod sim;
/// Guest bus (transactions, devices, RAM, interconnect).
pub mod soc;
/// Per-core statistics collection and reporting.
pub mod stats;
/// Cross-core system-call fan-out.
pub mod syscall;

/// Root configuration type; use `Config::default()` or deserialize from JSON.
pub use crate::config::Config;
/// The processor model driven by the simulation kernel.
pub use crate::core::CpuCore;
/// Engine-facing contract.
pub use crate::engine::{Engine, EngineFactory, Environment};
/// Shared platform state; construct with `SimContext::new`.
pub use crate::sim::SimContext;
