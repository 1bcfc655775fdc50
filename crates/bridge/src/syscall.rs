//! Cross-core system-call fan-out.
//!
//! Each core exposes a [`SyscallHandler`] (supplied by its engine) through a port in the
//! shared [`SyscallRegistry`]. An environment broadcasts to its subscriber list:
//! 1. **Synchronous:** every subscriber is attempted exactly once, in subscription order,
//!    before the call returns. A failing subscriber does not stop delivery to the rest.
//! 2. **Asynchronous:** the broadcast is queued to a dispatcher thread that delivers it the
//!    same way; the caller returns immediately.
//!
//! Failures are logged and counted, never propagated to the broadcaster. A subscriber must
//! not issue a synchronous broadcast back to the core that is synchronously broadcasting
//! to it; that cycle is the caller's responsibility to avoid.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::common::Result;

/// Opaque syscall argument shared between subscribers.
pub type SyscallArg = Arc<dyn Any + Send + Sync>;

/// Failure reported by a single subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyscallError {
    /// The subscriber does not implement this call number.
    #[error("syscall {0} is not supported")]
    Unsupported(i32),
    /// The argument has the wrong type or value for this call number.
    #[error("invalid argument for syscall {0}")]
    InvalidArgument(i32),
    /// The subscriber's core has been torn down.
    #[error("core {0} is detached")]
    Detached(u32),
    /// The handle does not name a registered port.
    #[error("no syscall port {0}")]
    UnknownPort(usize),
    /// Handler-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Receiver of broadcast system calls for one core.
///
/// May be called from the dispatcher thread or from another core's thread, concurrently
/// with the owning core's engine.
pub trait SyscallHandler: Send + Sync {
    /// Handles `callno` with `arg`.
    fn handle_syscall(&self, callno: i32, arg: &SyscallArg) -> std::result::Result<(), SyscallError>;
}

impl<F> SyscallHandler for F
where
    F: Fn(i32, &SyscallArg) -> std::result::Result<(), SyscallError> + Send + Sync,
{
    fn handle_syscall(&self, callno: i32, arg: &SyscallArg) -> std::result::Result<(), SyscallError> {
        self(callno, arg)
    }
}

/// Stable reference to a core's syscall port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreHandle(pub(crate) usize);

impl CoreHandle {
    /// Returns the port index.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Outcome of delivering one broadcast.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that handled the call successfully.
    pub delivered: usize,
    /// Subscribers that failed, in delivery order.
    pub failures: Vec<(CoreHandle, SyscallError)>,
}

impl BroadcastReport {
    /// Number of subscribers attempted.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failures.len()
    }
}

struct Port {
    core_id: u32,
    handler: Mutex<Option<Arc<dyn SyscallHandler>>>,
}

enum Job {
    Broadcast {
        targets: Vec<CoreHandle>,
        callno: i32,
        arg: SyscallArg,
    },
    Barrier(Sender<()>),
}

/// Registry of per-core syscall ports plus the asynchronous dispatcher.
pub struct SyscallRegistry {
    ports: Arc<boxcar::Vec<Port>>,
    failures: Arc<AtomicU64>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl fmt::Debug for SyscallRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyscallRegistry")
            .field("ports", &self.ports.count())
            .field("failures", &self.failures())
            .finish_non_exhaustive()
    }
}

impl SyscallRegistry {
    /// Creates a registry and starts its dispatcher thread.
    ///
    /// The dispatch queue is unbounded: handlers running on the dispatcher may themselves
    /// broadcast asynchronously without waiting on their own thread.
    pub fn new() -> Result<Self> {
        let ports: Arc<boxcar::Vec<Port>> = Arc::new(boxcar::Vec::new());
        let failures = Arc::new(AtomicU64::new(0));
        let (tx, rx) = crossbeam_channel::unbounded();

        let worker = {
            let ports = Arc::clone(&ports);
            let failures = Arc::clone(&failures);
            thread::Builder::new()
                .name("syscall-dispatch".to_owned())
                .spawn(move || dispatch_loop(&rx, &ports, &failures))?
        };

        Ok(Self {
            ports,
            failures,
            jobs: Some(tx),
            worker: Some(worker),
        })
    }

    /// Opens a port for `core_id` that delivers to `handler`.
    pub fn register(&self, core_id: u32, handler: Arc<dyn SyscallHandler>) -> CoreHandle {
        let index = self.ports.push(Port {
            core_id,
            handler: Mutex::new(Some(handler)),
        });
        tracing::debug!(core_id, port = index, "syscall port registered");
        CoreHandle(index)
    }

    /// Closes a port; later deliveries to it fail with [`SyscallError::Detached`].
    pub fn detach(&self, handle: CoreHandle) {
        if let Some(port) = self.ports.get(handle.0) {
            if let Ok(mut handler) = port.handler.lock() {
                *handler = None;
            }
        }
    }

    /// Core id of the port behind `handle`.
    pub fn core_id(&self, handle: CoreHandle) -> Option<u32> {
        self.ports.get(handle.0).map(|p| p.core_id)
    }

    /// Delivers one call to one port.
    pub fn deliver(
        &self,
        handle: CoreHandle,
        callno: i32,
        arg: &SyscallArg,
    ) -> std::result::Result<(), SyscallError> {
        deliver_one(&self.ports, handle, callno, arg)
    }

    /// Delivers `callno` to every target in order and waits for all of them.
    pub fn broadcast(&self, targets: &[CoreHandle], callno: i32, arg: &SyscallArg) -> BroadcastReport {
        deliver_all(&self.ports, &self.failures, targets, callno, arg)
    }

    /// Queues a broadcast for the dispatcher thread and returns without waiting.
    ///
    /// If the dispatcher is gone the broadcast is delivered synchronously instead.
    pub fn broadcast_async(&self, targets: Vec<CoreHandle>, callno: i32, arg: SyscallArg) {
        let Some(jobs) = &self.jobs else {
            let _ = self.broadcast(&targets, callno, &arg);
            return;
        };
        if let Err(err) = jobs.send(Job::Broadcast {
            targets,
            callno,
            arg,
        }) {
            tracing::warn!(callno, "syscall dispatcher unavailable, delivering inline");
            if let Job::Broadcast { targets, callno, arg } = err.into_inner() {
                let _ = self.broadcast(&targets, callno, &arg);
            }
        }
    }

    /// Waits until every asynchronous broadcast queued so far has been delivered.
    ///
    /// Must not be called from a syscall handler running on the dispatcher thread.
    pub fn wait_idle(&self) {
        let Some(jobs) = &self.jobs else { return };
        let (tx, rx) = crossbeam_channel::bounded(1);
        if jobs.send(Job::Barrier(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Total subscriber failures since creation.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Drop for SyscallRegistry {
    fn drop(&mut self) {
        // Closing the channel lets the dispatcher drain what is queued and exit.
        drop(self.jobs.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("syscall dispatcher panicked");
            }
        }
    }
}

fn dispatch_loop(rx: &Receiver<Job>, ports: &boxcar::Vec<Port>, failures: &AtomicU64) {
    for job in rx {
        match job {
            Job::Broadcast {
                targets,
                callno,
                arg,
            } => {
                let _ = deliver_all(ports, failures, &targets, callno, &arg);
            }
            Job::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::trace!("syscall dispatcher stopped");
}

fn deliver_one(
    ports: &boxcar::Vec<Port>,
    handle: CoreHandle,
    callno: i32,
    arg: &SyscallArg,
) -> std::result::Result<(), SyscallError> {
    let port = ports.get(handle.0).ok_or(SyscallError::UnknownPort(handle.0))?;
    // The handler runs without the port lock held so it may broadcast itself.
    let handler = port
        .handler
        .lock()
        .ok()
        .and_then(|h| h.clone())
        .ok_or(SyscallError::Detached(port.core_id))?;
    handler.handle_syscall(callno, arg)
}

fn deliver_all(
    ports: &boxcar::Vec<Port>,
    failures: &AtomicU64,
    targets: &[CoreHandle],
    callno: i32,
    arg: &SyscallArg,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    for &target in targets {
        match deliver_one(ports, target, callno, arg) {
            Ok(()) => report.delivered += 1,
            Err(err) => {
                tracing::warn!(callno, port = target.0, error = %err, "syscall delivery failed");
                let _ = failures.fetch_add(1, Ordering::Relaxed);
                report.failures.push((target, err));
            }
        }
    }
    report
}
