use std::sync::Arc;

use cpu_bridge::common::PhysAddr;
use cpu_bridge::soc::memory::buffer::DramBuffer;
use cpu_bridge::soc::{Bus, BusStatus, Transaction};
use pretty_assertions::assert_eq;
use rstest::rstest;

use crate::common::mocks::device::RegisterBlock;

const RAM: u64 = 0x8000_0000;
const RAM_LEN: usize = 64 * 1024;
const REGS: u64 = 0x1000_0000;

fn bus() -> Bus {
    let mut bus = Bus::new(8, 2);
    bus.add_ram(RAM, Arc::new(DramBuffer::new(RAM_LEN).unwrap()));
    bus.add_device(Box::new(RegisterBlock::new(REGS, 4)));
    bus
}

#[rstest]
#[case(1, 3)]
#[case(8, 3)]
#[case(9, 4)]
#[case(64, 10)]
fn ram_access_is_timed_by_width_and_latency(#[case] len: usize, #[case] cycles: u64) {
    let bus = bus();
    let mut data = vec![0xA5; len];
    let resp = bus.transport(&mut Transaction::write(PhysAddr(RAM + 0x100), &mut data));
    assert_eq!((resp.status, resp.cycles), (BusStatus::Ok, cycles));

    let mut back = vec![0; len];
    assert!(bus.transport(&mut Transaction::read(PhysAddr(RAM + 0x100), &mut back)).status.is_ok());
    assert_eq!(back, data);
}

#[test]
fn debug_access_takes_no_time() {
    let bus = bus();
    let mut data = [0u8; 16];
    let resp = bus.transport(&mut Transaction::read(PhysAddr(RAM), &mut data).debug());
    assert_eq!((resp.status, resp.cycles), (BusStatus::Ok, 0));
}

#[test]
fn device_registers_round_trip_through_the_bus() {
    let bus = bus();
    let mut value = 0xCAFE_F00D_u32.to_le_bytes();
    assert!(bus.transport(&mut Transaction::write(PhysAddr(REGS + 8), &mut value)).status.is_ok());

    let mut back = [0u8; 4];
    let resp = bus.transport(&mut Transaction::read(PhysAddr(REGS + 8), &mut back));
    assert_eq!(resp.status, BusStatus::Ok);
    assert_eq!(u32::from_le_bytes(back), 0xCAFE_F00D);
}

#[rstest]
#[case::misaligned_register(REGS + 2, 4, BusStatus::DeviceError)]
#[case::short_register(REGS, 2, BusStatus::DeviceError)]
#[case::past_device_end(REGS + 12, 8, BusStatus::AddressError)]
#[case::past_ram_end(RAM + RAM_LEN as u64 - 4, 8, BusStatus::AddressError)]
#[case::unmapped(0x10, 4, BusStatus::AddressError)]
fn invalid_accesses_report_status(#[case] addr: u64, #[case] len: usize, #[case] status: BusStatus) {
    let bus = bus();
    let mut data = vec![0; len];
    let resp = bus.transport(&mut Transaction::read(PhysAddr(addr), &mut data));
    assert_eq!(resp.status, status);
    assert!(!resp.status.is_ok());
}

#[test]
fn page_pointers_cover_only_whole_ram_pages() {
    let bus = bus();
    let first = bus.page_ptr(PhysAddr(RAM), 4096).unwrap();
    let second = bus.page_ptr(PhysAddr(RAM + 4096), 4096).unwrap();
    assert_eq!(second.as_ptr() as usize - first.as_ptr() as usize, 4096);

    assert!(bus.page_ptr(PhysAddr(RAM + RAM_LEN as u64), 4096).is_none());
    assert!(bus.page_ptr(PhysAddr(REGS), 4096).is_none());

    assert!(bus.owns_host_range(first, RAM_LEN));
    assert!(!bus.owns_host_range(first, RAM_LEN + 1));
    assert!(bus.is_valid_address(PhysAddr(REGS + 15)));
    assert!(!bus.is_valid_address(PhysAddr(REGS + 16)));
    assert_eq!(bus.ram_regions().collect::<Vec<_>>(), vec![(RAM, RAM_LEN as u64)]);
}
