//! Simulation context shared by the cores of a platform.

/// Shared bus, protector, clock, and syscall registry.
pub mod context;

pub use self::context::SimContext;
