//! Bus transactions.
//!
//! The engine falls back to these for any access that the page fast path cannot serve
//! (MMIO, unmapped RAM, debugger accesses). Failures are reported as a [`BusStatus`] in the
//! [`Response`]; the engine decides whether the guest sees a fault.

use std::fmt;

use crate::common::PhysAddr;

/// Direction of a bus transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Read `data.len()` bytes into `data`.
    Read,
    /// Write `data` to the target.
    Write,
}

/// A synchronous bus request.
#[derive(Debug)]
pub struct Transaction<'a> {
    /// Guest physical start address.
    pub addr: PhysAddr,
    /// Read destination or write source.
    pub data: &'a mut [u8],
    /// Transfer direction.
    pub command: Command,
    /// Debugger access: side-effect free and never timed.
    pub is_debug: bool,
}

impl<'a> Transaction<'a> {
    /// Creates a read of `data.len()` bytes at `addr`.
    pub const fn read(addr: PhysAddr, data: &'a mut [u8]) -> Self {
        Self {
            addr,
            data,
            command: Command::Read,
            is_debug: false,
        }
    }

    /// Creates a write of `data` at `addr`.
    pub const fn write(addr: PhysAddr, data: &'a mut [u8]) -> Self {
        Self {
            addr,
            data,
            command: Command::Write,
            is_debug: false,
        }
    }

    /// Marks the transaction as a debugger access.
    #[must_use]
    pub const fn debug(mut self) -> Self {
        self.is_debug = true;
        self
    }

    /// Returns `true` for reads.
    pub fn is_read(&self) -> bool {
        self.command == Command::Read
    }
}

/// Completion status of a bus transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusStatus {
    /// The target completed the access.
    Ok,
    /// No target is mapped at (part of) the address range.
    AddressError,
    /// The target rejected the access (unsupported width, read-only register, ...).
    DeviceError,
}

impl BusStatus {
    /// Returns `true` for [`BusStatus::Ok`].
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::AddressError => write!(f, "address error"),
            Self::DeviceError => write!(f, "device error"),
        }
    }
}

/// Result of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Response {
    /// Completion status.
    pub status: BusStatus,
    /// Cycles the transfer occupied the bus (0 for debug accesses and errors).
    pub cycles: u64,
}

impl Response {
    /// Creates a successful response.
    pub const fn ok(cycles: u64) -> Self {
        Self {
            status: BusStatus::Ok,
            cycles,
        }
    }

    /// Creates a failed response.
    pub const fn error(status: BusStatus) -> Self {
        Self { status, cycles: 0 }
    }
}
