//! Guest bus model.
//!
//! This module organizes the components the environment uses to reach guest memory and
//! memory-mapped devices:
//! 1. **Transactions:** Request/response types for bus-mapped I/O.
//! 2. **Devices:** The `Device` trait implemented by bus targets.
//! 3. **Memory:** Host-backed guest RAM that can be handed to the engine page by page.
//! 4. **Interconnect:** Address routing between RAM regions and devices.

/// System bus interconnect and routing.
pub mod interconnect;

/// Host-backed guest RAM.
pub mod memory;

/// Device trait definitions for MMIO access.
pub mod traits;

/// Bus transaction and response types.
pub mod transaction;

pub use interconnect::Bus;
pub use traits::Device;
pub use transaction::{BusStatus, Response, Transaction};
