//! Write-detection for guest memory handed to the engine as raw host pointers.
//!
//! The engine reads and writes guest RAM through host pointers at native speed. To learn
//! about writes (stale translated code, dirty pages) without instrumenting each access,
//! pages are write-protected on the host and the resulting fault is intercepted:
//! 1. **Registration:** `register_page` records (owner, guest page) for a host page, then
//!    revokes write (or all) access to it.
//! 2. **Resolution:** a fault on a registered page restores access, drops the mapping
//!    (one-shot), and forwards the guest page to the owner's [`PageAccessSink`].
//! 3. **Chaining:** faults on unregistered pages are not ours and go to the previously
//!    installed handler, which is expected to be fatal.
//!
//! The table behind the protector is lock-free (see [`table`]) so that the fault handler,
//! which may fire on any engine thread at any instruction, never waits on a lock held by
//! the faulting thread itself.

/// Host `mprotect`/`sysconf` wrappers.
pub mod host;

/// Process fault handler installation and chaining.
pub mod signal;

/// Lock-free protected-page table.
pub mod table;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::common::constants::GUEST_PAGE_SHIFT;
use crate::common::{Error, HostAddr, PhysAddr, Result};
use crate::config::{Protection, ProtectorConfig};

use self::table::{MAX_GUEST_FRAME, MAX_OWNERS, Mapping, PageTable};

pub use self::signal::{FaultHandler, FaultHandlerGuard};

/// Receiver of page-access notifications for one environment.
///
/// Called from the fault handler: implementations must not allocate, block, or log.
pub trait PageAccessSink: Send + Sync {
    /// The host page backing `guest_page` was accessed and is no longer protected.
    fn page_accessed(&self, guest_page: PhysAddr);
}

/// Stable identifier of an attached [`PageAccessSink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(pub(crate) u16);

impl OwnerId {
    /// Returns the owner index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A resolved protection fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageAccess {
    /// Environment that registered the page.
    pub owner: OwnerId,
    /// Guest page backed by the faulting host page.
    pub guest_page: PhysAddr,
    /// Host page base that was unprotected.
    pub host_page: HostAddr,
}

/// Outcome of resolving a host fault against the protector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultResolution {
    /// The page was registered; access is restored and the owner notified.
    Handled(PageAccess),
    /// The page is known but was already unprotected by a concurrent fault; retry the access.
    Retry,
    /// The fault is not ours.
    Unhandled,
}

/// Registry of protected host pages.
pub struct MemoryProtector {
    table: PageTable,
    owners: boxcar::Vec<Arc<dyn PageAccessSink>>,
    page_size: usize,
    protection: Protection,
    registered: AtomicU64,
    handled: AtomicU64,
}

impl fmt::Debug for MemoryProtector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryProtector")
            .field("capacity", &self.table.capacity())
            .field("owners", &self.owners.count())
            .field("page_size", &self.page_size)
            .field("protection", &self.protection)
            .finish_non_exhaustive()
    }
}

impl MemoryProtector {
    /// Creates a protector using the host page size.
    pub fn new(config: &ProtectorConfig) -> Self {
        Self::with_page_size(config, host::page_size())
    }

    /// Creates a protector for an explicit host page size (power of two).
    pub fn with_page_size(config: &ProtectorConfig, page_size: usize) -> Self {
        Self {
            table: PageTable::new(config.capacity, page_size),
            owners: boxcar::Vec::new(),
            page_size,
            protection: config.protection,
            registered: AtomicU64::new(0),
            handled: AtomicU64::new(0),
        }
    }

    /// Host page size used for page-base computation.
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Protection applied to registered pages.
    pub const fn protection(&self) -> Protection {
        self.protection
    }

    /// Attaches a page-access sink and returns its owner id.
    pub fn attach(&self, sink: Arc<dyn PageAccessSink>) -> Result<OwnerId> {
        if self.owners.count() >= MAX_OWNERS {
            return Err(Error::TooManyOwners { limit: MAX_OWNERS });
        }
        let index = self.owners.push(sink);
        if index >= MAX_OWNERS {
            return Err(Error::TooManyOwners { limit: MAX_OWNERS });
        }
        Ok(OwnerId(index as u16))
    }

    /// Protects the host page containing `host_addr` on behalf of `owner`.
    ///
    /// The mapping is published first and the page protected second, so a fault can
    /// never observe a protected page without its mapping. Registering a page again
    /// supersedes the previous mapping.
    ///
    /// # Safety
    ///
    /// The host page containing `host_addr` must be memory mapped by this process that
    /// is only accessed through raw pointers (or under an installed [`FaultHandler`])
    /// while protected.
    pub unsafe fn register_page(
        &self,
        owner: OwnerId,
        guest_addr: PhysAddr,
        host_addr: HostAddr,
    ) -> Result<()> {
        if owner.index() >= self.owners.count() {
            return Err(Error::UnknownOwner(owner.0));
        }
        let guest_page = guest_addr.page_base();
        if guest_page.val() >> GUEST_PAGE_SHIFT > MAX_GUEST_FRAME {
            return Err(Error::GuestAddress(guest_page.val()));
        }
        let page = host_addr.page_base(self.page_size).val();
        let slot = self.table.claim(page).ok_or(Error::ProtectorFull {
            page,
            capacity: self.table.capacity(),
        })?;

        let mapping = Mapping { owner, guest_page };
        let _superseded = slot.publish(mapping);
        // SAFETY: caller guarantees the page is ours to protect.
        if let Err(source) = unsafe { host::protect(page, self.page_size, self.protection) } {
            slot.withdraw(mapping);
            return Err(Error::Protect { page, source });
        }
        let _ = self.registered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Resolves a fault at `fault_addr`.
    ///
    /// Signal-safe: a bounded table scan, at most one `mprotect`, and one call into the
    /// owner's sink.
    ///
    /// # Arguments
    ///
    /// * `fault_addr` - Faulting host address.
    /// * `access_error` - The host reported a permission fault (as opposed to an unmapped
    ///   address). Only then is a known-but-unprotected page worth retrying.
    pub fn resolve_fault(&self, fault_addr: usize, access_error: bool) -> FaultResolution {
        let page = HostAddr(fault_addr).page_base(self.page_size);
        let Some(slot) = self.table.find(page.val()) else {
            return FaultResolution::Unhandled;
        };
        let Some(mapping) = slot.begin_release() else {
            return if access_error {
                FaultResolution::Retry
            } else {
                FaultResolution::Unhandled
            };
        };

        // SAFETY: the page was protected by `register_page`, whose caller vouched for it.
        let restored = unsafe { host::restore(page.val(), self.page_size) };
        slot.finish_release(mapping, restored);
        if !restored {
            return FaultResolution::Unhandled;
        }

        let _ = self.handled.fetch_add(1, Ordering::Relaxed);
        if let Some(sink) = self.owners.get(mapping.owner.index()) {
            sink.page_accessed(mapping.guest_page);
        }
        FaultResolution::Handled(PageAccess {
            owner: mapping.owner,
            guest_page: mapping.guest_page,
            host_page: page,
        })
    }

    /// Handles a protection notification for `fault_addr`.
    ///
    /// Returns the resolved access, or `None` ("not handled") when no mapping exists for
    /// the containing host page; existing mappings are left untouched in that case.
    pub fn notify_page(&self, fault_addr: usize) -> Option<PageAccess> {
        match self.resolve_fault(fault_addr, false) {
            FaultResolution::Handled(access) => Some(access),
            FaultResolution::Retry | FaultResolution::Unhandled => None,
        }
    }

    /// Returns the live mapping for the host page containing `host_addr`, if any.
    pub fn lookup(&self, host_addr: HostAddr) -> Option<(OwnerId, PhysAddr)> {
        let page = host_addr.page_base(self.page_size).val();
        self.table
            .find(page)
            .and_then(table::Slot::current)
            .map(|m| (m.owner, m.guest_page))
    }

    /// Number of host pages currently protected.
    pub fn protected_pages(&self) -> usize {
        self.table
            .bound()
            .filter(|s| s.current().is_some())
            .count()
    }

    /// Number of successful registrations since creation.
    pub fn registrations(&self) -> u64 {
        self.registered.load(Ordering::Relaxed)
    }

    /// Number of faults resolved since creation.
    pub fn faults_handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Restores access to every protected page and drops all mappings.
    ///
    /// Owners are not notified. Returns the number of pages released.
    pub fn unprotect_all(&self) -> usize {
        let mut released = 0;
        for slot in self.table.bound() {
            let Some(mapping) = slot.begin_release() else {
                continue;
            };
            // SAFETY: the page was protected by `register_page`.
            let restored = unsafe { host::restore(slot.page(), self.page_size) };
            if !restored {
                tracing::warn!(page = slot.page(), "failed to restore access during teardown");
            }
            slot.finish_release(mapping, true);
            released += 1;
        }
        tracing::debug!(released, "memory protector torn down");
        released
    }
}
