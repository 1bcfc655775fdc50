//! Error definitions.
//!
//! Construction, configuration, and host-primitive failures are reported through one
//! `Error` enum. Runtime failures that the engine or the kernel must survive are *not*
//! errors: bus failures travel as [`BusStatus`](crate::soc::BusStatus) values in the
//! transport response, subscriber failures are recorded in a
//! [`BroadcastReport`](crate::syscall::BroadcastReport), and debug-hook failures are
//! plain `false`/`None` results.

use std::io;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building or wiring bridge components.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine factory returned no usable engine for a core.
    #[error("failed to create execution engine for core {core_id} (args: {args:?})")]
    EngineCreation {
        /// Id of the core being elaborated.
        core_id: u32,
        /// Configuration string handed to the factory.
        args: String,
    },

    /// Every slot of the protected-page table is claimed by another host page.
    #[error("protected page table is full ({capacity} slots), cannot protect host page {page:#x}")]
    ProtectorFull {
        /// Host page base that could not be registered.
        page: usize,
        /// Table capacity in slots.
        capacity: usize,
    },

    /// More page-access sinks were attached than a mapping can encode.
    #[error("too many protector owners (limit {limit})")]
    TooManyOwners {
        /// Maximum number of owners.
        limit: usize,
    },

    /// The guest page address does not fit the protected-page encoding.
    #[error("guest page {0:#x} is outside the protectable guest address range")]
    GuestAddress(u64),

    /// The owner id passed to the protector was never attached.
    #[error("unknown protector owner {0}")]
    UnknownOwner(u16),

    /// `mprotect` failed for a host page.
    #[error("mprotect failed for host page {page:#x}: {source}")]
    Protect {
        /// Host page base.
        page: usize,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// Installing or restoring a signal disposition failed.
    #[error("sigaction failed for signal {signal}: {source}")]
    SignalAction {
        /// Signal number.
        signal: i32,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A fault handler is already installed in this process.
    #[error("a fault handler is already installed")]
    HandlerInstalled,

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Configuration file could not be read.
    #[error("cannot read configuration: {0}")]
    Io(#[from] io::Error),

    /// Configuration parsed but holds an unusable value.
    #[error("invalid configuration value for `{field}`: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
