//! Shared simulation context.
//!
//! Everything the cores of one platform share: configuration, the guest bus with its RAM,
//! the memory protector, the kernel clock, and the syscall registry. The context replaces
//! process-wide singletons; cores receive it at construction and keep `Arc` clones of what
//! they need.

use std::fmt;
use std::sync::Arc;

use crate::common::Result;
use crate::config::Config;
use crate::kernel::Clock;
use crate::protect::{FaultHandler, FaultHandlerGuard, MemoryProtector};
use crate::soc::Bus;
use crate::soc::memory::buffer::DramBuffer;
use crate::syscall::SyscallRegistry;

/// Shared state for every core of one simulated platform.
pub struct SimContext {
    /// Validated configuration.
    pub config: Config,
    /// Guest bus, including RAM.
    pub bus: Arc<Bus>,
    /// Write-detection registry for pages handed to engines.
    pub protector: Arc<MemoryProtector>,
    /// Kernel time source.
    pub clock: Arc<dyn Clock>,
    /// Cross-core syscall ports.
    pub syscalls: Arc<SyscallRegistry>,
}

impl fmt::Debug for SimContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimContext")
            .field("config", &self.config)
            .field("bus", &self.bus)
            .field("protector", &self.protector)
            .field("clock_ps", &self.clock.now_ps())
            .field("syscalls", &self.syscalls)
            .finish()
    }
}

impl SimContext {
    /// Builds a context with a bus holding only the configured RAM window.
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let bus = Bus::new(config.memory.bus_width, config.memory.bus_latency);
        Self::with_bus(config, clock, bus)
    }

    /// Builds a context around a bus that already has its MMIO devices attached.
    ///
    /// The configured RAM window is added to `bus`.
    pub fn with_bus(config: Config, clock: Arc<dyn Clock>, mut bus: Bus) -> Result<Self> {
        config.validate()?;
        let ram = Arc::new(DramBuffer::new(config.memory.ram_size)?);
        bus.add_ram(config.memory.ram_base, ram);

        let protector = Arc::new(MemoryProtector::new(&config.protector));
        let syscalls = Arc::new(SyscallRegistry::new()?);
        tracing::debug!(
            ram_base = format_args!("{:#x}", config.memory.ram_base),
            ram_size = config.memory.ram_size,
            protector = ?protector,
            "simulation context ready"
        );
        Ok(Self {
            config,
            bus: Arc::new(bus),
            protector,
            clock,
            syscalls,
        })
    }

    /// Installs the process fault handler for this context's protector.
    ///
    /// Protected pages may only be written by engines while the returned guard lives.
    pub fn install_fault_handler(&self) -> Result<FaultHandlerGuard> {
        FaultHandler::install(Arc::clone(&self.protector))
    }
}
