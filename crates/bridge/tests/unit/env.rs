use std::ptr::NonNull;

use cpu_bridge::common::{PhysAddr, VirtAddr};
use cpu_bridge::core::TimerChannel;
use cpu_bridge::engine::{Environment, Hint, WatchKind};
use cpu_bridge::env::StopReason;
use cpu_bridge::soc::{BusStatus, Transaction};
use pretty_assertions::assert_eq;

use crate::common::harness::{RAM_BASE, RAM_SIZE, TestPlatform, test_config};
use crate::common::mocks::engine::ScriptedEngine;

// ══════════════════════════════════════════════════════════
// Page pointers and protection
// ══════════════════════════════════════════════════════════

#[test]
fn page_pointers_resolve_ram_and_reject_mmio() {
    let platform = TestPlatform::new();
    let core = platform.core(0, ScriptedEngine::busy());
    let env = core.env();

    let base = env.get_page_ptr_r(PhysAddr(RAM_BASE)).unwrap();
    let third = env.get_page_ptr_w(PhysAddr(RAM_BASE + 0x3000)).unwrap();
    assert_eq!(third.as_ptr() as usize - base.as_ptr() as usize, 0x3000);

    // Unaligned requests resolve to the containing page.
    assert_eq!(env.get_page_ptr_r(PhysAddr(RAM_BASE + 0x3123)), Some(third));

    let last = RAM_BASE + RAM_SIZE as u64 - 0x1000;
    assert!(env.get_page_ptr_r(PhysAddr(last)).is_some());
    assert!(env.get_page_ptr_r(PhysAddr(last + 0x1000)).is_none());
    assert!(env.get_page_ptr_w(PhysAddr(0x1000)).is_none());
}

#[test]
fn transport_write_releases_protection_and_marks_page_dirty() {
    let platform = TestPlatform::new();
    let engine = ScriptedEngine::busy();
    let log = engine.log();
    let mut core = platform.core(0, engine);
    let env = core.env();
    let page = PhysAddr(RAM_BASE + 0x2000);

    let host = env.get_page_ptr_w(page).unwrap();
    env.protect_page(host, page);
    assert_eq!(platform.ctx.protector.protected_pages(), 1);

    let mut data = 0xDEAD_BEEF_u32.to_le_bytes();
    let resp = env.transport(&mut Transaction::write(PhysAddr(page.val() + 0x10), &mut data));
    assert!(resp.status.is_ok());
    assert_eq!(platform.ctx.protector.protected_pages(), 0);

    let mut back = [0u8; 4];
    let _ = env.transport(&mut Transaction::read(PhysAddr(page.val() + 0x10), &mut back));
    assert_eq!(u32::from_le_bytes(back), 0xDEAD_BEEF);

    let dirty = core.take_dirty_pages();
    assert_eq!(dirty.pages, vec![page]);
    assert!(!dirty.overflowed);
    assert_eq!(log.lock().unwrap().invalidated, vec![page]);
    assert!(core.take_dirty_pages().pages.is_empty());
}

#[test]
fn every_ram_page_can_be_protected_again_after_release() {
    let platform = TestPlatform::new();
    let core = platform.core(0, ScriptedEngine::busy());
    let env = core.env();
    let pages = (RAM_SIZE / 0x1000) as u64;

    for round in 0..2u8 {
        for index in 0..pages {
            let page = PhysAddr(RAM_BASE + index * 0x1000);
            env.protect_page(env.get_page_ptr_w(page).unwrap(), page);
            let mut byte = [round];
            assert!(env.transport(&mut Transaction::write(page, &mut byte)).status.is_ok());
        }
    }

    assert_eq!(platform.ctx.protector.registrations(), 2 * pages);
    assert_eq!(platform.ctx.protector.protected_pages(), 0);
}

#[test]
fn protect_page_refuses_pointers_that_do_not_back_the_page() {
    let platform = TestPlatform::new();
    let core = platform.core(0, ScriptedEngine::busy());
    let env = core.env();

    let mut outside = [0u8; 64];
    env.protect_page(NonNull::new(outside.as_mut_ptr()).unwrap(), PhysAddr(RAM_BASE));
    let other_page = env.get_page_ptr_w(PhysAddr(RAM_BASE + 0x5000)).unwrap();
    env.protect_page(other_page, PhysAddr(RAM_BASE));

    assert_eq!(platform.ctx.protector.protected_pages(), 0);
    assert_eq!(platform.ctx.protector.registrations(), 0);
}

// ══════════════════════════════════════════════════════════
// Transport
// ══════════════════════════════════════════════════════════

#[test]
fn transport_reports_bus_errors_as_status() {
    let platform = TestPlatform::new();
    let core = platform.core(0, ScriptedEngine::busy());
    let env = core.env();

    let mut buf = [0u8; 8];
    let resp = env.transport(&mut Transaction::read(PhysAddr(0x10), &mut buf));
    assert_eq!(resp.status, BusStatus::AddressError);
    assert_eq!(resp.cycles, 0);

    let end = RAM_BASE + RAM_SIZE as u64 - 4;
    let resp = env.transport(&mut Transaction::write(PhysAddr(end), &mut buf));
    assert_eq!(resp.status, BusStatus::AddressError);
}

#[test]
fn transport_timing_follows_bus_width() {
    let platform = TestPlatform::new();
    let core = platform.core(0, ScriptedEngine::busy());
    let env = core.env();

    let mut buf = [0u8; 16];
    let resp = env.transport(&mut Transaction::read(PhysAddr(RAM_BASE), &mut buf));
    // Default bus: 8 bytes wide, 1 cycle latency.
    assert_eq!(resp.cycles, 1 + 2);

    let resp = env.transport(&mut Transaction::read(PhysAddr(RAM_BASE), &mut buf).debug());
    assert_eq!(resp.cycles, 0);
}

// ══════════════════════════════════════════════════════════
// Lines, time, parameters
// ══════════════════════════════════════════════════════════

#[test]
fn signal_drives_only_known_output_lines() {
    let platform = TestPlatform::new();
    let core = platform.core(0, ScriptedEngine::busy());
    let env = core.env();

    env.signal(1, true);
    env.signal(9, true);
    assert!(env.output_raised(1));
    assert!(!env.output_raised(0));
    assert!(!env.output_raised(9));
    env.signal(1, false);
    assert!(!env.output_raised(1));
}

#[test]
fn time_includes_progress_within_the_quantum() {
    let platform = TestPlatform::new();
    let mut core = platform.core(0, ScriptedEngine::busy());
    platform.clock.set(1_000);

    assert_eq!(core.simulate(10), 10);
    // 1 GHz: one cycle is 1000 ps.
    assert_eq!(core.env().get_time_ps(), 1_000 + 10 * 1_000);
    assert_eq!(core.local_time_ps(), 10_000);

    platform.clock.set(11_000);
    core.sync_local_time();
    assert_eq!(core.env().get_time_ps(), 11_000);
}

#[test]
fn engine_parameters_come_from_configuration() {
    let mut config = test_config();
    let _ = config.core.params.insert("gic_base".to_owned(), "0x2c000000".to_owned());
    let platform = TestPlatform::with_config(config);
    let core = platform.core(0, ScriptedEngine::busy());

    assert_eq!(core.env().get_param("gic_base").as_deref(), Some("0x2c000000"));
    assert_eq!(core.env().get_param("missing"), None);
}

// ══════════════════════════════════════════════════════════
// Timers
// ══════════════════════════════════════════════════════════

#[test]
fn notify_replaces_and_cancel_clears_a_deadline() {
    let platform = TestPlatform::new();
    let core = platform.core(0, ScriptedEngine::busy());
    let env = core.env();

    env.notify(TimerChannel::Virtual.event_id(), 5_000);
    env.notify(TimerChannel::Virtual.event_id(), 7_000);
    assert_eq!(env.timer_deadline(TimerChannel::Virtual), Some(7_000));

    env.cancel(TimerChannel::Virtual.event_id());
    assert_eq!(env.timer_deadline(TimerChannel::Virtual), None);
    // Nothing pending: a no-op.
    env.cancel(TimerChannel::Virtual.event_id());

    env.notify(17, 1_000);
    assert_eq!(core.next_timer_deadline(), None);
}

// ══════════════════════════════════════════════════════════
// Hints and debug hooks
// ══════════════════════════════════════════════════════════

#[test]
fn flush_hint_is_delivered_at_the_next_quantum() {
    let platform = TestPlatform::new();
    let engine = ScriptedEngine::new(|env, cycles| {
        env.hint(Hint::FlushTranslations);
        cycles
    });
    let log = engine.log();
    let mut core = platform.core(0, engine);

    let _ = core.simulate(5);
    assert_eq!(log.lock().unwrap().flushes, 1);
    assert_eq!(core.stats().translation_flushes, 1);
}

#[test]
fn breakpoint_hook_halts_only_on_inserted_addresses() {
    let platform = TestPlatform::new();
    let mut core = platform.core(0, ScriptedEngine::busy());
    let addr = VirtAddr(0x8000_1000);

    assert!(!core.env().handle_breakpoint(addr));
    assert!(core.gdb_insert_breakpoint(addr));
    assert!(core.env().handle_breakpoint(addr));
    assert_eq!(core.take_stop_reason(), Some(StopReason::Breakpoint(addr)));
    assert_eq!(core.take_stop_reason(), None);

    assert!(core.gdb_remove_breakpoint(addr));
    assert!(!core.env().handle_breakpoint(addr));
}

#[test]
fn watchpoint_hook_matches_direction_and_overlap() {
    let platform = TestPlatform::new();
    let mut core = platform.core(0, ScriptedEngine::busy());
    assert!(core.gdb_insert_watchpoint(VirtAddr(0x100), 8, WatchKind::Write));

    let env = core.env();
    assert!(!env.handle_watchpoint(VirtAddr(0x104), 4, 0, false));
    assert!(!env.handle_watchpoint(VirtAddr(0x108), 4, 0, true));
    assert!(env.handle_watchpoint(VirtAddr(0x0FC), 8, 0x55, true));
    assert_eq!(
        core.take_stop_reason(),
        Some(StopReason::Watchpoint {
            addr: VirtAddr(0x0FC),
            size: 8,
            data: 0x55,
            is_write: true,
        })
    );
}

#[test]
fn basic_block_hook_halts_while_single_stepping() {
    let platform = TestPlatform::new();
    let engine = ScriptedEngine::busy();
    let log = engine.log();
    let mut core = platform.core(0, engine);

    assert!(!core.env().handle_begin_basic_block(VirtAddr(0x40)));
    core.gdb_single_step(true);
    assert_eq!(log.lock().unwrap().trace_blocks, Some(true));
    assert!(core.env().handle_begin_basic_block(VirtAddr(0x44)));
    assert_eq!(core.take_stop_reason(), Some(StopReason::Step(VirtAddr(0x44))));

    core.gdb_single_step(false);
    assert!(!core.env().handle_begin_basic_block(VirtAddr(0x48)));
    assert_eq!(core.stats().blocks_executed, 3);
}
