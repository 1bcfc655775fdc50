use std::sync::{Arc, Barrier};
use std::thread;

use cpu_bridge::common::{Error, HostAddr, PhysAddr};
use cpu_bridge::config::{Protection, ProtectorConfig};
use cpu_bridge::protect::table::MAX_OWNERS;
use cpu_bridge::protect::{FaultResolution, MemoryProtector, OwnerId, PageAccess, PageAccessSink};
use cpu_bridge::soc::memory::buffer::DramBuffer;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::common::mocks::sink::RecordingSink;

// ══════════════════════════════════════════════════════════
// Fixture
// ══════════════════════════════════════════════════════════

struct Fixture {
    protector: MemoryProtector,
    buffer: DramBuffer,
    sinks: Vec<Arc<RecordingSink>>,
    owners: Vec<OwnerId>,
}

impl Fixture {
    fn new(capacity: usize, pages: usize, owners: usize) -> Self {
        Self::with_protection(capacity, pages, owners, Protection::ReadOnly)
    }

    fn with_protection(capacity: usize, pages: usize, owners: usize, protection: Protection) -> Self {
        let protector = MemoryProtector::new(&ProtectorConfig {
            capacity,
            protection,
        });
        let buffer = DramBuffer::new(pages * protector.page_size()).unwrap();
        let sinks: Vec<Arc<RecordingSink>> =
            (0..owners).map(|_| Arc::new(RecordingSink::default())).collect();
        let owners = sinks
            .iter()
            .map(|s| protector.attach(Arc::clone(s) as Arc<dyn PageAccessSink>).unwrap())
            .collect();
        Self {
            protector,
            buffer,
            sinks,
            owners,
        }
    }

    /// Host address of byte `offset` inside host page `index`.
    fn host(&self, index: usize, offset: usize) -> HostAddr {
        let ptr = self.buffer.ptr_at(index * self.protector.page_size() + offset).unwrap();
        HostAddr::from_ptr(ptr.as_ptr())
    }

    fn register(&self, owner: usize, guest: u64, index: usize) {
        unsafe {
            self.protector
                .register_page(self.owners[owner], PhysAddr(guest), self.host(index, 0))
                .unwrap();
        }
    }

    /// Writes through the buffer; only valid once the page is unprotected.
    fn write(&self, index: usize, value: u8) -> bool {
        self.buffer.write(index * self.protector.page_size() + 16, &[value])
    }
}

// ══════════════════════════════════════════════════════════
// Registration and notification
// ══════════════════════════════════════════════════════════

#[test]
fn notify_inside_registered_page_is_one_shot() {
    let fx = Fixture::new(16, 1, 1);
    fx.register(0, 0x1000, 0);
    assert_eq!(fx.protector.protected_pages(), 1);

    let access = fx.protector.notify_page(fx.host(0, 4).val()).unwrap();
    assert_eq!(access.owner, fx.owners[0]);
    assert_eq!(access.guest_page, PhysAddr(0x1000));
    assert_eq!(access.host_page, fx.host(0, 0));
    assert_eq!(fx.sinks[0].pages(), vec![PhysAddr(0x1000)]);

    // Access is restored: this write would fault otherwise.
    assert!(fx.write(0, 0x5A));

    assert!(fx.protector.notify_page(fx.host(0, 4).val()).is_none());
    assert_eq!(fx.protector.lookup(fx.host(0, 0)), None);
    assert_eq!(fx.sinks[0].pages().len(), 1);
    assert_eq!(fx.protector.faults_handled(), 1);
}

#[test]
fn notify_on_unregistered_page_leaves_mappings_untouched() {
    let fx = Fixture::new(16, 3, 2);
    fx.register(0, 0x1000, 0);
    fx.register(1, 0x2000, 1);

    assert!(fx.protector.notify_page(fx.host(2, 0).val()).is_none());

    assert_eq!(fx.protector.lookup(fx.host(0, 8)), Some((fx.owners[0], PhysAddr(0x1000))));
    assert_eq!(fx.protector.lookup(fx.host(1, 8)), Some((fx.owners[1], PhysAddr(0x2000))));
    assert_eq!(fx.protector.protected_pages(), 2);
    assert!(fx.sinks.iter().all(|s| s.pages().is_empty()));
    assert_eq!(fx.protector.unprotect_all(), 2);
}

#[test]
fn guest_address_is_recorded_as_its_page_base() {
    let fx = Fixture::new(16, 1, 1);
    fx.register(0, 0x4321, 0);
    assert_eq!(fx.protector.lookup(fx.host(0, 0)), Some((fx.owners[0], PhysAddr(0x4000))));
    assert_eq!(fx.protector.unprotect_all(), 1);
}

#[test]
fn resolve_distinguishes_retry_from_foreign_faults() {
    let fx = Fixture::new(16, 2, 1);
    fx.register(0, 0x1000, 0);
    let addr = fx.host(0, 0).val();

    assert!(matches!(fx.protector.resolve_fault(addr, true), FaultResolution::Handled(_)));
    // Known page, already released: a racing fault just retries the access.
    assert_eq!(fx.protector.resolve_fault(addr, true), FaultResolution::Retry);
    assert_eq!(fx.protector.resolve_fault(addr, false), FaultResolution::Unhandled);
    // Never registered.
    assert_eq!(fx.protector.resolve_fault(fx.host(1, 0).val(), true), FaultResolution::Unhandled);
}

#[test]
fn no_access_protection_is_lifted_on_notify() {
    let fx = Fixture::with_protection(16, 1, 1, Protection::NoAccess);
    fx.register(0, 0x1000, 0);
    assert!(fx.protector.notify_page(fx.host(0, 0).val()).is_some());
    let mut out = [0u8; 4];
    assert!(fx.buffer.read(0, &mut out));
    assert!(fx.write(0, 1));
}

#[test]
fn unprotect_all_restores_every_page_without_notifying() {
    let fx = Fixture::new(16, 3, 1);
    for i in 0..3 {
        fx.register(0, 0x1000 * (i as u64 + 1), i);
    }
    assert_eq!(fx.protector.unprotect_all(), 3);
    assert_eq!(fx.protector.protected_pages(), 0);
    assert!(fx.sinks[0].pages().is_empty());
    assert!((0..3).all(|i| fx.write(i, 7)));
    assert_eq!(fx.protector.registrations(), 3);
}

// ══════════════════════════════════════════════════════════
// Concurrency
// ══════════════════════════════════════════════════════════

const THREADS: usize = 4;
const SHARED: usize = 4;

fn guest_of(owner: usize, index: usize) -> u64 {
    0x10_0000 * (owner as u64 + 1) + 0x1000 * index as u64
}

/// Per-owner guest pages, sorted, for comparing sink logs.
fn by_owner(fx: &Fixture, accesses: &[PageAccess]) -> Vec<Vec<PhysAddr>> {
    (0..THREADS)
        .map(|t| {
            let mut pages: Vec<PhysAddr> = accesses
                .iter()
                .filter(|a| a.owner == fx.owners[t])
                .map(|a| a.guest_page)
                .collect();
            pages.sort();
            pages
        })
        .collect()
}

#[test]
fn concurrent_registration_and_release_keep_the_table_consistent() {
    for _ in 0..16 {
        // Pages 2t and 2t+1 belong to thread t; the last SHARED pages are registered by all.
        let fx = Fixture::new(64, 2 * THREADS + SHARED, THREADS);
        let shared = 2 * THREADS..2 * THREADS + SHARED;
        let barrier = Barrier::new(THREADS);

        let mut accesses: Vec<PageAccess> = thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    let (fx, barrier, shared) = (&fx, &barrier, shared.clone());
                    scope.spawn(move || {
                        fx.register(t, guest_of(t, 2 * t), 2 * t);
                        fx.register(t, guest_of(t, 2 * t + 1), 2 * t + 1);
                        for index in shared.clone() {
                            fx.register(t, guest_of(t, index), index);
                        }
                        let _ = barrier.wait();

                        let own = fx.protector.notify_page(fx.host(2 * t, 8).val());
                        let first_shared = fx.protector.notify_page(fx.host(shared.start, 8).val());
                        own.into_iter().chain(first_shared).collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        // Every thread released its own page; exactly one of them won the shared page.
        assert_eq!(accesses.len(), THREADS + 1);
        assert_eq!(fx.protector.protected_pages(), THREADS + SHARED - 1);

        // The remaining shared pages belong to whichever registration came last.
        for index in shared.clone().skip(1) {
            let (owner, guest) = fx.protector.lookup(fx.host(index, 0)).unwrap();
            let access = fx.protector.notify_page(fx.host(index, 0).val()).unwrap();
            assert_eq!((access.owner, access.guest_page), (owner, guest));
            accesses.push(access);
        }
        assert_eq!(fx.protector.protected_pages(), THREADS);

        let expected = by_owner(&fx, &accesses);
        for (sink, pages) in fx.sinks.iter().zip(expected) {
            let mut seen = sink.pages();
            seen.sort();
            assert_eq!(seen, pages);
        }
        assert_eq!(fx.protector.unprotect_all(), THREADS);
    }
}

// ══════════════════════════════════════════════════════════
// Failures
// ══════════════════════════════════════════════════════════

#[test]
fn full_table_rejects_new_pages_without_protecting_them() {
    let fx = Fixture::new(2, 3, 1);
    fx.register(0, 0x1000, 0);
    fx.register(0, 0x2000, 1);
    let err = unsafe {
        fx.protector
            .register_page(fx.owners[0], PhysAddr(0x3000), fx.host(2, 0))
            .unwrap_err()
    };
    assert!(matches!(err, Error::ProtectorFull { capacity: 2, .. }));
    assert!(fx.write(2, 1), "rejected page must stay writable");
    // Re-registering a page that already owns a slot still works.
    fx.register(0, 0x5000, 0);
    assert_eq!(fx.protector.unprotect_all(), 2);
}

#[test]
fn unknown_owner_and_oversized_guest_address_are_rejected() {
    let fx = Fixture::new(16, 1, 1);
    let foreign = {
        let other = MemoryProtector::new(&ProtectorConfig::default());
        let _ = other.attach(Arc::new(RecordingSink::default())).unwrap();
        other.attach(Arc::new(RecordingSink::default())).unwrap()
    };
    let err = unsafe {
        fx.protector
            .register_page(foreign, PhysAddr(0x1000), fx.host(0, 0))
            .unwrap_err()
    };
    assert!(matches!(err, Error::UnknownOwner(1)));

    let err = unsafe {
        fx.protector
            .register_page(fx.owners[0], PhysAddr(1 << 62), fx.host(0, 0))
            .unwrap_err()
    };
    assert!(matches!(err, Error::GuestAddress(_)));
    assert_eq!(fx.protector.protected_pages(), 0);
}

#[test]
fn attach_stops_below_the_reserved_owner_id() {
    let protector = MemoryProtector::new(&ProtectorConfig::default());
    let sink: Arc<dyn PageAccessSink> = Arc::new(RecordingSink::default());
    for expected in 0..MAX_OWNERS {
        assert_eq!(protector.attach(Arc::clone(&sink)).unwrap().index(), expected);
    }
    let err = protector.attach(sink).unwrap_err();
    assert!(matches!(err, Error::TooManyOwners { limit: MAX_OWNERS }));
}

#[test]
fn owners_are_numbered_in_attach_order() {
    let fx = Fixture::new(16, 1, 3);
    let indices: Vec<usize> = fx.owners.iter().map(|o| o.index()).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

// ══════════════════════════════════════════════════════════
// Properties
// ══════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn latest_registration_of_a_page_wins(
        regs in prop::collection::vec((0usize..3, 0u64..1 << 20), 1..12),
        offset in 0usize..4096,
    ) {
        let fx = Fixture::new(8, 1, 3);
        for &(owner, frame) in &regs {
            fx.register(owner, frame << 12, 0);
        }
        let (last_owner, last_frame) = *regs.last().unwrap();
        let expected = PhysAddr(last_frame << 12);

        prop_assert_eq!(fx.protector.lookup(fx.host(0, 0)), Some((fx.owners[last_owner], expected)));
        let access = fx.protector.notify_page(fx.host(0, offset).val()).unwrap();
        prop_assert_eq!(access.owner, fx.owners[last_owner]);
        prop_assert_eq!(access.guest_page, expected);

        for (i, sink) in fx.sinks.iter().enumerate() {
            let want = if i == last_owner { vec![expected] } else { Vec::new() };
            prop_assert_eq!(sink.pages(), want);
        }
        prop_assert!(fx.protector.notify_page(fx.host(0, offset).val()).is_none());
    }
}
