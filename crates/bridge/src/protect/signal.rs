//! Process fault handler.
//!
//! This is the only code that runs in signal context. It is kept to:
//! 1. **Lookup:** read the active protector pointer and resolve the faulting address.
//! 2. **Chaining:** hand unresolved faults to the disposition that was installed before us.
//!
//! Nothing here allocates, locks, or logs. At most one handler is installed per process;
//! [`FaultHandler::install`] returns a guard that restores the previous dispositions when
//! dropped.

use std::cell::UnsafeCell;
use std::io;
use std::mem::{self, MaybeUninit};
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::common::{Error, Result};

use super::{FaultResolution, MemoryProtector};

type FaultFn = extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void);

/// Signals raised by the host for protection faults (macOS reports them as `SIGBUS`).
const FAULT_SIGNALS: [libc::c_int; 2] = [libc::SIGSEGV, libc::SIGBUS];

/// `si_code` of a `SIGSEGV` caused by a permission violation on a mapped page (Linux and
/// macOS agree on the value).
const SEGV_ACCERR: libc::c_int = 2;

static INSTALLED: AtomicBool = AtomicBool::new(false);
static ACTIVE: AtomicPtr<MemoryProtector> = AtomicPtr::new(ptr::null_mut());

/// Dispositions replaced by the installed handler, indexed like [`FAULT_SIGNALS`].
///
/// Written only while `INSTALLED` is being acquired or released, before the handler is
/// live or after it was removed; read from the handler.
struct PreviousActions(UnsafeCell<[MaybeUninit<libc::sigaction>; 2]>);

// SAFETY: see the access discipline on the type.
unsafe impl Sync for PreviousActions {}

static PREVIOUS: PreviousActions =
    PreviousActions(UnsafeCell::new([const { MaybeUninit::uninit() }; 2]));

/// Installer for the process-wide protection fault handler.
#[derive(Debug)]
pub struct FaultHandler;

/// Keeps the fault handler installed; dropping it restores the previous dispositions.
#[derive(Debug)]
pub struct FaultHandlerGuard {
    protector: Arc<MemoryProtector>,
}

impl FaultHandlerGuard {
    /// Protector the handler resolves faults against.
    pub fn protector(&self) -> &Arc<MemoryProtector> {
        &self.protector
    }
}

impl FaultHandler {
    /// Installs the handler for `SIGSEGV` and `SIGBUS`, resolving faults against `protector`.
    ///
    /// Fails with [`Error::HandlerInstalled`] while another guard is alive.
    pub fn install(protector: Arc<MemoryProtector>) -> Result<FaultHandlerGuard> {
        if INSTALLED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::HandlerInstalled);
        }
        ACTIVE.store(Arc::as_ptr(&protector).cast_mut(), Ordering::Release);

        for (i, &signal) in FAULT_SIGNALS.iter().enumerate() {
            // SAFETY: `INSTALLED` was just acquired, so no other installer touches
            // `PREVIOUS`, and our handler for this signal is not live yet.
            let result = unsafe { install_one(signal, i) };
            if let Err(source) = result {
                // SAFETY: only the first `i` signals were installed.
                unsafe { restore_previous(i) };
                ACTIVE.store(ptr::null_mut(), Ordering::Release);
                INSTALLED.store(false, Ordering::Release);
                return Err(Error::SignalAction { signal, source });
            }
        }
        tracing::debug!("protection fault handler installed");
        Ok(FaultHandlerGuard { protector })
    }

    /// Returns `true` while a handler is installed in this process.
    pub fn is_installed() -> bool {
        INSTALLED.load(Ordering::Acquire)
    }
}

impl Drop for FaultHandlerGuard {
    fn drop(&mut self) {
        // Unpublish the protector before anything else so no new fault can reach it.
        ACTIVE.store(ptr::null_mut(), Ordering::Release);
        // SAFETY: this guard owns the installation; all signals were installed.
        unsafe { restore_previous(FAULT_SIGNALS.len()) };
        INSTALLED.store(false, Ordering::Release);
        tracing::debug!("protection fault handler removed");
    }
}

/// Installs `on_fault` for `signal`, saving the old disposition in `PREVIOUS[index]`.
///
/// # Safety
///
/// Caller must hold the installation (`INSTALLED`) and `on_fault` must not yet be live
/// for `signal`.
unsafe fn install_one(signal: libc::c_int, index: usize) -> io::Result<()> {
    // SAFETY: an all-zero `sigaction` is a valid empty disposition.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    let handler: FaultFn = on_fault;
    action.sa_sigaction = handler as libc::sighandler_t;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
    // SAFETY: `action.sa_mask` is a valid, exclusively borrowed sigset.
    let _ = unsafe { libc::sigemptyset(&mut action.sa_mask) };

    // SAFETY: exclusive access to `PREVIOUS` per the caller contract.
    let previous = unsafe { (*PREVIOUS.0.get())[index].as_mut_ptr() };
    // SAFETY: both pointers are valid for the call.
    if unsafe { libc::sigaction(signal, &action, previous) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Restores the dispositions saved for the first `count` fault signals.
///
/// # Safety
///
/// Caller must hold the installation and those entries of `PREVIOUS` must be initialized.
unsafe fn restore_previous(count: usize) {
    for (i, &signal) in FAULT_SIGNALS.iter().enumerate().take(count) {
        // SAFETY: entry `i` was initialized by `install_one`.
        let previous = unsafe { (*PREVIOUS.0.get())[i].as_ptr() };
        // SAFETY: `previous` points at a valid `sigaction`.
        if unsafe { libc::sigaction(signal, previous, ptr::null_mut()) } != 0 {
            tracing::warn!(signal, "failed to restore previous fault disposition");
        }
    }
}

/// Address that caused the fault.
///
/// # Safety
///
/// `info` must be the `siginfo_t` the kernel passed to an `SA_SIGINFO` handler.
#[cfg(target_os = "linux")]
unsafe fn fault_address(info: *const libc::siginfo_t) -> usize {
    // SAFETY: forwarded to the caller.
    unsafe { (*info).si_addr() as usize }
}

/// Address that caused the fault.
///
/// # Safety
///
/// `info` must be the `siginfo_t` the kernel passed to an `SA_SIGINFO` handler.
#[cfg(not(target_os = "linux"))]
unsafe fn fault_address(info: *const libc::siginfo_t) -> usize {
    // SAFETY: forwarded to the caller.
    unsafe { (*info).si_addr as usize }
}

/// Whether the fault is a permission violation on a mapped page.
///
/// # Safety
///
/// Same contract as [`fault_address`].
unsafe fn is_access_error(signal: libc::c_int, info: *const libc::siginfo_t) -> bool {
    // SAFETY: forwarded to the caller.
    let code = unsafe { (*info).si_code };
    if signal == libc::SIGSEGV {
        code == SEGV_ACCERR
    } else {
        cfg!(target_os = "macos")
    }
}

extern "C" fn on_fault(signal: libc::c_int, info: *mut libc::siginfo_t, context: *mut libc::c_void) {
    let protector = ACTIVE.load(Ordering::Acquire);
    if !protector.is_null() && !info.is_null() {
        // SAFETY: `info` is the kernel-provided siginfo for this signal.
        let (addr, access_error) =
            unsafe { (fault_address(info), is_access_error(signal, info)) };
        // SAFETY: `ACTIVE` is non-null only while the guard holds the `Arc`.
        let protector = unsafe { &*protector };
        match protector.resolve_fault(addr, access_error) {
            FaultResolution::Handled(_) | FaultResolution::Retry => return,
            FaultResolution::Unhandled => {}
        }
    }
    // SAFETY: arguments are exactly those the kernel passed to us.
    unsafe { chain(signal, info, context) };
}

/// Forwards an unresolved fault to the disposition installed before ours.
///
/// # Safety
///
/// Must only be called from `on_fault` with the kernel-provided arguments.
unsafe fn chain(signal: libc::c_int, info: *mut libc::siginfo_t, context: *mut libc::c_void) {
    let Some(index) = FAULT_SIGNALS.iter().position(|&s| s == signal) else {
        return;
    };
    // SAFETY: entries are initialized before the handler becomes live.
    let previous = unsafe { &*(*PREVIOUS.0.get())[index].as_ptr() };
    let handler = previous.sa_sigaction;

    if handler == libc::SIG_DFL || handler == libc::SIG_IGN {
        // Returning re-executes the faulting access under the default action, which
        // terminates the process.
        // SAFETY: resetting a disposition to default is always valid.
        let _ = unsafe { libc::signal(signal, libc::SIG_DFL) };
        return;
    }

    if previous.sa_flags & libc::SA_SIGINFO != 0 {
        // SAFETY: with `SA_SIGINFO` set the stored value is a three-argument handler.
        let f: FaultFn = unsafe { mem::transmute(handler) };
        f(signal, info, context);
    } else {
        // SAFETY: without `SA_SIGINFO` the stored value is a one-argument handler.
        let f: extern "C" fn(libc::c_int) = unsafe { mem::transmute(handler) };
        f(signal);
    }
}
