//! Lock-free protected-page table.
//!
//! A fixed-capacity, open-addressed array of atomic slots keyed by host page base. The
//! fault handler reads it from signal context, so every operation is a bounded scan over
//! atomics with no allocation and no lock.
//!
//! # Slot lifecycle
//!
//! * `page` goes from `EMPTY_KEY` to a host page base exactly once and never changes
//!   afterwards. Readers therefore never race against key removal, and an `EMPTY_KEY`
//!   met while probing proves the page was never registered.
//! * `mapping` cycles between `NO_MAPPING`, an encoded [`Mapping`], and `BUSY` while a
//!   fault (or teardown) is restoring host access to the page.

use std::hint;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::common::PhysAddr;
use crate::common::constants::GUEST_PAGE_SHIFT;

use super::OwnerId;

/// Key of a slot that was never claimed. Host page 0 is never mapped.
const EMPTY_KEY: usize = 0;

/// Mapping value of a slot with no live registration.
pub const NO_MAPPING: u64 = 0;

/// Mapping value of a slot whose page is being unprotected.
pub const BUSY: u64 = u64::MAX;

const PRESENT: u64 = 1 << 63;
const OWNER_SHIFT: u32 = 48;
const FRAME_MASK: u64 = (1 << OWNER_SHIFT) - 1;
const OWNER_MASK: u64 = (1 << 15) - 1;

/// Number of distinct owners a mapping can encode.
///
/// The all-ones owner id is never handed out: with the all-ones frame it would encode to
/// [`BUSY`].
pub const MAX_OWNERS: usize = OWNER_MASK as usize;

/// Largest guest page frame number a mapping can encode.
pub const MAX_GUEST_FRAME: u64 = FRAME_MASK;

/// Owner and guest page recorded for a protected host page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mapping {
    /// Environment that registered the page.
    pub owner: OwnerId,
    /// Guest physical page backed by the host page.
    pub guest_page: PhysAddr,
}

impl Mapping {
    /// Packs the mapping into one atomic word: present bit, 15-bit owner, 48-bit guest frame.
    ///
    /// Owners below [`MAX_OWNERS`] never produce [`BUSY`] or [`NO_MAPPING`].
    pub const fn encode(self) -> u64 {
        let frame = (self.guest_page.val() >> GUEST_PAGE_SHIFT) & FRAME_MASK;
        PRESENT | ((self.owner.0 as u64) << OWNER_SHIFT) | frame
    }

    /// Unpacks a word produced by [`Mapping::encode`]; `None` for empty or busy slots.
    pub const fn decode(raw: u64) -> Option<Self> {
        if raw == BUSY || raw & PRESENT == 0 {
            return None;
        }
        Some(Self {
            owner: OwnerId(((raw >> OWNER_SHIFT) & OWNER_MASK) as u16),
            guest_page: PhysAddr((raw & FRAME_MASK) << GUEST_PAGE_SHIFT),
        })
    }
}

/// One table entry.
#[derive(Debug)]
pub struct Slot {
    page: AtomicUsize,
    mapping: AtomicU64,
}

impl Slot {
    const fn new() -> Self {
        Self {
            page: AtomicUsize::new(EMPTY_KEY),
            mapping: AtomicU64::new(NO_MAPPING),
        }
    }

    /// Host page base this slot is bound to.
    pub fn page(&self) -> usize {
        self.page.load(Ordering::Acquire)
    }

    /// Installs `mapping`, returning the one it superseded.
    ///
    /// Waits out a concurrent unprotect so that the new protection is applied after the
    /// old one was lifted.
    pub fn publish(&self, mapping: Mapping) -> Option<Mapping> {
        let new = mapping.encode();
        loop {
            let cur = self.mapping.load(Ordering::Acquire);
            if cur == BUSY {
                hint::spin_loop();
                continue;
            }
            if self
                .mapping
                .compare_exchange_weak(cur, new, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Mapping::decode(cur);
            }
        }
    }

    /// Claims the live mapping for unprotecting, leaving the slot `BUSY`.
    ///
    /// Returns `None` when the slot holds no mapping. Spins while another thread holds
    /// the slot busy; that thread is inside a single `mprotect` call and never faults.
    pub fn begin_release(&self) -> Option<Mapping> {
        loop {
            let cur = self.mapping.load(Ordering::Acquire);
            if cur == BUSY {
                hint::spin_loop();
                continue;
            }
            let mapping = Mapping::decode(cur)?;
            if self
                .mapping
                .compare_exchange_weak(cur, BUSY, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(mapping);
            }
        }
    }

    /// Finishes a release started with [`Slot::begin_release`].
    ///
    /// `restored == false` puts the mapping back so the page stays tracked.
    pub fn finish_release(&self, mapping: Mapping, restored: bool) {
        let value = if restored { NO_MAPPING } else { mapping.encode() };
        self.mapping.store(value, Ordering::Release);
    }

    /// Withdraws a mapping that was published but could not be protected.
    pub fn withdraw(&self, mapping: Mapping) {
        let _ = self.mapping.compare_exchange(
            mapping.encode(),
            NO_MAPPING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Returns the live mapping without claiming it.
    pub fn current(&self) -> Option<Mapping> {
        Mapping::decode(self.mapping.load(Ordering::Acquire))
    }
}

/// Fixed-capacity open-addressed table of [`Slot`]s.
#[derive(Debug)]
pub struct PageTable {
    slots: Box<[Slot]>,
    mask: usize,
    page_shift: u32,
}

impl PageTable {
    /// Creates a table with `capacity` slots.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Slot count; rounded up to a power of two.
    /// * `page_size` - Host page size in bytes (power of two).
    pub fn new(capacity: usize, page_size: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let slots = (0..capacity).map(|_| Slot::new()).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            page_shift: page_size.trailing_zeros(),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn home(&self, page: usize) -> usize {
        let frame = (page >> self.page_shift) as u64;
        (frame.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize & self.mask
    }

    /// Finds the slot bound to `page`. Signal-safe.
    pub fn find(&self, page: usize) -> Option<&Slot> {
        if page == EMPTY_KEY {
            return None;
        }
        let home = self.home(page);
        for i in 0..self.slots.len() {
            let slot = &self.slots[(home + i) & self.mask];
            match slot.page() {
                p if p == page => return Some(slot),
                EMPTY_KEY => return None,
                _ => {}
            }
        }
        None
    }

    /// Finds or claims the slot for `page`; `None` when the table is full.
    pub fn claim(&self, page: usize) -> Option<&Slot> {
        if page == EMPTY_KEY {
            return None;
        }
        let home = self.home(page);
        for i in 0..self.slots.len() {
            let slot = &self.slots[(home + i) & self.mask];
            match slot.page.compare_exchange(
                EMPTY_KEY,
                page,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(slot),
                Err(existing) if existing == page => return Some(slot),
                Err(_) => {}
            }
        }
        None
    }

    /// Iterates over every slot bound to a host page.
    pub fn bound(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.page() != EMPTY_KEY)
    }
}
