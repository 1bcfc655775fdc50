//! Configuration system for the bridge.
//!
//! This module defines all configuration structures used to parameterize a core and its
//! environment. It provides:
//! 1. **Defaults:** Baseline constants (clock, RAM window, protector table size).
//! 2. **Structures:** Hierarchical config for the core, guest memory, and the memory protector.
//! 3. **Enums:** Host protection mode applied to registered pages.
//!
//! Configuration is supplied as JSON by the platform (`Config::from_json` /
//! `Config::from_file`) or built with `Config::default()`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::common::constants::{GUEST_PAGE_SIZE, PS_PER_SEC};
use crate::common::{Error, Result};
use crate::protect::host;

/// Protector slots required per host page of guest RAM.
///
/// Slots stay bound to a host page for the protector's lifetime and only RAM pages are
/// ever protected, so the number of bound slots never exceeds the RAM page count.
const SLOTS_PER_RAM_PAGE: usize = 2;

/// Default configuration constants for the bridge.
mod defaults {
    /// Core clock frequency (100 MHz).
    pub const CLOCK_HZ: u64 = 100_000_000;

    /// Base address of guest RAM (2 GiB).
    pub const RAM_BASE: u64 = 0x8000_0000;

    /// Size of guest RAM (128 MiB).
    pub const RAM_SIZE: usize = 128 * 1024 * 1024;

    /// Number of slots in the protected-page table.
    ///
    /// Each slot tracks one host page for the lifetime of the protector; validation
    /// requires two slots per host page of RAM (128 MiB of 4 KiB pages).
    pub const PROTECTOR_CAPACITY: usize = 1 << 16;

    /// Capacity of the per-core queue of faulted pages awaiting invalidation.
    pub const PAGE_QUEUE_CAPACITY: usize = 256;

    /// Bus width in bytes (64-bit).
    pub const BUS_WIDTH: u64 = 8;

    /// Base bus latency in cycles.
    pub const BUS_LATENCY: u64 = 1;
}

/// Host page protection applied when a page is registered with the protector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Protection {
    /// Remove write access only; reads stay unintercepted.
    #[default]
    ReadOnly,
    /// Remove all access; the first read or write faults.
    #[serde(alias = "None")]
    NoAccess,
}

/// Root configuration structure containing all bridge settings.
///
/// # Examples
///
/// ```
/// use cpu_bridge::config::{Config, Protection};
///
/// let json = r#"{
///     "core": {
///         "clock_hz": 200000000,
///         "engine_args": "-cpu cortex-a72",
///         "params": { "gic_base": "0x2c000000" }
///     },
///     "memory": { "ram_base": 0, "ram_size": 1048576 },
///     "protector": { "capacity": 1024, "protection": "NoAccess" }
/// }"#;
///
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.core.cycle_period_ps(), 5000);
/// assert_eq!(config.protector.protection, Protection::NoAccess);
/// assert_eq!(config.core.params["gic_base"], "0x2c000000");
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Core and engine settings
    #[serde(default)]
    pub core: CoreConfig,
    /// Guest memory window
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Memory protector settings
    #[serde(default)]
    pub protector: ProtectorConfig,
}

impl Config {
    /// Parses a configuration from a JSON string and validates it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Rejects values the bridge cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.core.clock_hz == 0 || self.core.clock_hz > PS_PER_SEC {
            return Err(Error::InvalidValue {
                field: "core.clock_hz",
                reason: format!("{} Hz is outside 1..=10^12", self.core.clock_hz),
            });
        }
        if self.memory.ram_base % GUEST_PAGE_SIZE != 0 {
            return Err(Error::InvalidValue {
                field: "memory.ram_base",
                reason: format!("{:#x} is not page aligned", self.memory.ram_base),
            });
        }
        if self.memory.ram_size == 0 {
            return Err(Error::InvalidValue {
                field: "memory.ram_size",
                reason: "must be non-zero".to_owned(),
            });
        }
        if self.memory.bus_width == 0 {
            return Err(Error::InvalidValue {
                field: "memory.bus_width",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.protector.capacity == 0 || !self.protector.capacity.is_power_of_two() {
            return Err(Error::InvalidValue {
                field: "protector.capacity",
                reason: format!("{} is not a non-zero power of two", self.protector.capacity),
            });
        }
        let ram_pages = self.memory.ram_size.div_ceil(host::page_size());
        if ram_pages.saturating_mul(SLOTS_PER_RAM_PAGE) > self.protector.capacity {
            return Err(Error::InvalidValue {
                field: "protector.capacity",
                reason: format!(
                    "{} slots cannot track {ram_pages} host pages of RAM (need {SLOTS_PER_RAM_PAGE} per page)",
                    self.protector.capacity
                ),
            });
        }
        Ok(())
    }
}

/// Core and engine settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Core clock frequency in Hz; converts cycles to simulated time.
    #[serde(default = "CoreConfig::default_clock_hz")]
    pub clock_hz: u64,

    /// Opaque configuration string passed to the engine factory.
    #[serde(default)]
    pub engine_args: String,

    /// Named parameters the engine may query through the environment.
    #[serde(default)]
    pub params: HashMap<String, String>,

    /// Capacity of the per-core queue of faulted pages awaiting invalidation.
    ///
    /// On overflow the core falls back to a full translation flush.
    #[serde(default = "CoreConfig::default_page_queue_capacity")]
    pub page_queue_capacity: usize,
}

impl CoreConfig {
    fn default_clock_hz() -> u64 {
        defaults::CLOCK_HZ
    }

    fn default_page_queue_capacity() -> usize {
        defaults::PAGE_QUEUE_CAPACITY
    }

    /// Returns the duration of one core cycle in picoseconds (at least 1).
    pub const fn cycle_period_ps(&self) -> u64 {
        let period = PS_PER_SEC / self.clock_hz;
        if period == 0 { 1 } else { period }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            clock_hz: defaults::CLOCK_HZ,
            engine_args: String::new(),
            params: HashMap::new(),
            page_queue_capacity: defaults::PAGE_QUEUE_CAPACITY,
        }
    }
}

/// Guest memory window backed by host RAM.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Guest physical base address of RAM.
    #[serde(default = "MemoryConfig::default_ram_base")]
    pub ram_base: u64,
    /// RAM size in bytes.
    #[serde(default = "MemoryConfig::default_ram_size")]
    pub ram_size: usize,
    /// Bus width in bytes; sets transport timing.
    #[serde(default = "MemoryConfig::default_bus_width")]
    pub bus_width: u64,
    /// Base bus latency in cycles; sets transport timing.
    #[serde(default = "MemoryConfig::default_bus_latency")]
    pub bus_latency: u64,
}

impl MemoryConfig {
    fn default_ram_base() -> u64 {
        defaults::RAM_BASE
    }

    fn default_ram_size() -> usize {
        defaults::RAM_SIZE
    }

    fn default_bus_width() -> u64 {
        defaults::BUS_WIDTH
    }

    fn default_bus_latency() -> u64 {
        defaults::BUS_LATENCY
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ram_base: defaults::RAM_BASE,
            ram_size: defaults::RAM_SIZE,
            bus_width: defaults::BUS_WIDTH,
            bus_latency: defaults::BUS_LATENCY,
        }
    }
}

/// Memory protector settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectorConfig {
    /// Number of table slots; must be a power of two and at least twice the number of host
    /// pages of RAM.
    #[serde(default = "ProtectorConfig::default_capacity")]
    pub capacity: usize,
    /// Protection applied to registered pages.
    #[serde(default)]
    pub protection: Protection,
}

impl ProtectorConfig {
    fn default_capacity() -> usize {
        defaults::PROTECTOR_CAPACITY
    }
}

impl Default for ProtectorConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::PROTECTOR_CAPACITY,
            protection: Protection::default(),
        }
    }
}
