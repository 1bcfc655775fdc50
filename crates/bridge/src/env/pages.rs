//! Queue of guest pages whose protection was lifted.
//!
//! The fault handler pushes here from signal context; the owning core drains the queue at
//! quantum boundaries and turns each page into an engine invalidation plus a dirty mark.
//! Pushes are a bounded scan with one compare-and-swap per slot. When every slot is taken
//! the page is dropped and the overflow flag set, which the core answers with a full
//! translation flush.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::common::PhysAddr;
use crate::protect::PageAccessSink;

/// Slot value for "no page"; page bases are aligned, so this is never a valid page.
const EMPTY: u64 = u64::MAX;

/// Fixed-capacity, multi-producer single-consumer set of faulted guest pages.
#[derive(Debug)]
pub struct PageQueue {
    slots: Box<[AtomicU64]>,
    cursor: AtomicUsize,
    overflowed: AtomicBool,
}

/// Pages drained from a [`PageQueue`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageBatch {
    /// Pages in slot order.
    pub pages: Vec<PhysAddr>,
    /// Some pages were dropped since the last drain.
    pub overflowed: bool,
}

impl PageQueue {
    /// Creates a queue with room for `capacity` pages (at least one).
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| AtomicU64::new(EMPTY)).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            cursor: AtomicUsize::new(0),
            overflowed: AtomicBool::new(false),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Adds `page`. Signal-safe.
    ///
    /// Returns `false` (and sets the overflow flag) when the queue is full.
    pub fn push(&self, page: PhysAddr) -> bool {
        let len = self.slots.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for i in 0..len {
            let slot = &self.slots[(start + i) % len];
            if slot
                .compare_exchange(EMPTY, page.val(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
        self.overflowed.store(true, Ordering::Release);
        false
    }

    /// Removes every queued page.
    pub fn drain(&self) -> PageBatch {
        let overflowed = self.overflowed.swap(false, Ordering::AcqRel);
        let pages = self
            .slots
            .iter()
            .filter_map(|slot| match slot.swap(EMPTY, Ordering::AcqRel) {
                EMPTY => None,
                raw => Some(PhysAddr(raw)),
            })
            .collect();
        PageBatch { pages, overflowed }
    }

    /// Returns `true` if nothing is queued and no overflow is pending.
    pub fn is_empty(&self) -> bool {
        !self.overflowed.load(Ordering::Acquire)
            && self.slots.iter().all(|s| s.load(Ordering::Acquire) == EMPTY)
    }
}

impl PageAccessSink for PageQueue {
    fn page_accessed(&self, guest_page: PhysAddr) {
        let _ = self.push(guest_page);
    }
}
