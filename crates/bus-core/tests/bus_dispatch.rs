//! Dispatch integration coverage: layered resolution, permission and
//! alignment enforcement, and fault-record fidelity through the public API.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

use std::cell::RefCell;
use std::rc::Rc;

use bus_core::{
    share, AccessIntent, AccessWidth, Addr, BusAccess, BusAccessMode, BusDevice, DebugPrivilege,
    DeviceError, FaultKind, MappingLayer, MemoryRegion, PhysicalMemory, RegionManager, RegionTag,
    SharedMemory, TargetCaps, ADDR_MAX, NO_DEVICE,
};

use bitflags as _;
use proptest::prelude::*;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

struct OffsetDevice;

impl BusDevice for OffsetDevice {
    fn read(&mut self, offset: Addr, _cycle: u64) -> Result<u8, DeviceError> {
        Ok((offset & 0xFF) as u8)
    }

    fn write(&mut self, _offset: Addr, _value: u8, _cycle: u64) -> Result<(), DeviceError> {
        Ok(())
    }
}

struct RejectingDevice {
    device_id: i32,
}

impl BusDevice for RejectingDevice {
    fn read(&mut self, offset: Addr, _cycle: u64) -> Result<u8, DeviceError> {
        Err(DeviceError {
            device_id: self.device_id,
            offset,
            reason: "register locked".to_owned(),
        })
    }

    fn write(&mut self, offset: Addr, _value: u8, _cycle: u64) -> Result<(), DeviceError> {
        Err(DeviceError {
            device_id: self.device_id,
            offset,
            reason: "register locked".to_owned(),
        })
    }
}

fn pool(size: usize, label: &str) -> SharedMemory {
    share(PhysicalMemory::new(size, label).expect("non-zero size"))
}

fn base_ram_manager(base: Addr, size: usize) -> (RegionManager, SharedMemory) {
    let memory = pool(size, "ram");
    let mut manager = RegionManager::new();
    manager
        .add_layer(MappingLayer::new("base", 0, true))
        .expect("fresh layer");
    let ram = MemoryRegion::create_ram("ram0", "RAM", base, &memory).expect("valid region");
    manager
        .map_region_at_preferred("base", ram)
        .expect("maps cleanly");
    (manager, memory)
}

#[test]
fn bank_switch_via_layer_toggle_swaps_what_a_read_sees() {
    let (mut manager, memory) = base_ram_manager(0, 256);
    memory
        .borrow_mut()
        .write_physical(DebugPrivilege::acquire_for_tooling(), 0, &[0x11])
        .expect("fits");

    let rom_pool = pool(256, "shadow");
    rom_pool
        .borrow_mut()
        .write_physical(DebugPrivilege::acquire_for_tooling(), 0, &[0x22])
        .expect("fits");
    manager
        .add_layer(MappingLayer::new("shadow", 5, false))
        .expect("fresh layer");
    let rom = MemoryRegion::create_rom("shadow_rom", "Shadow ROM", 0, &rom_pool)
        .expect("valid region")
        .with_tag(RegionTag::Shadow);
    manager
        .map_region_at_preferred("shadow", rom)
        .expect("maps cleanly");

    let probe = BusAccess::read(0, AccessWidth::Bits8);
    let (value, fault) = manager.dispatch(&probe);
    assert!(fault.is_success());
    assert_eq!(value, 0x11);

    manager.set_layer_active("shadow", true).expect("known layer");
    let (value, fault) = manager.dispatch(&probe);
    assert!(fault.is_success());
    assert_eq!(value, 0x22);
    assert_eq!(fault.region_tag, RegionTag::Shadow);

    // Shadow ROM is read/execute only; the write faults without touching RAM.
    let (_, fault) = manager.dispatch(&BusAccess::write(0, 0x99, AccessWidth::Bits8));
    assert_eq!(fault.kind, FaultKind::Permission);
    assert_eq!(memory.borrow().as_read_only_view()[0], 0x11);

    manager.set_layer_active("shadow", false).expect("known layer");
    let (value, fault) = manager.dispatch(&probe);
    assert!(fault.is_success());
    assert_eq!(value, 0x11);
}

#[test]
fn fault_records_carry_the_full_access_context() {
    let (mut manager, _memory) = base_ram_manager(0, 256);
    let access = BusAccess::read(0x80_0000, AccessWidth::Bits16)
        .with_source(7)
        .at_cycle(99);
    let (value, fault) = manager.dispatch(&access);
    assert_eq!(value, 0);
    assert_eq!(fault.kind, FaultKind::Unmapped);
    assert_eq!(fault.addr, 0x80_0000);
    assert_eq!(fault.width, AccessWidth::Bits16);
    assert_eq!(fault.intent, AccessIntent::DataRead);
    assert_eq!(fault.source_id, 7);
    assert_eq!(fault.cycle, 99);
    assert_eq!(fault.device_id, NO_DEVICE);
    assert_eq!(fault.region_tag, RegionTag::Unmapped);
}

#[test]
fn taxonomy_codes_are_stable_and_round_trip() {
    let expected: [(FaultKind, u8); 6] = [
        (FaultKind::None, 0),
        (FaultKind::Unmapped, 1),
        (FaultKind::Permission, 2),
        (FaultKind::Misaligned, 3),
        (FaultKind::NoExecute, 4),
        (FaultKind::Device, 5),
    ];
    for (kind, code) in expected {
        assert_eq!(kind.as_u8(), code);
        assert_eq!(FaultKind::from_u8(code), Some(kind));
    }
    assert_eq!(FaultKind::from_u8(6), None);
}

#[test]
fn device_rejection_surfaces_as_a_device_fault_with_identity() {
    let mut manager = RegionManager::new();
    manager
        .add_layer(MappingLayer::new("io", 0, true))
        .expect("fresh layer");
    let device = Rc::new(RefCell::new(RejectingDevice { device_id: 42 }));
    let region = MemoryRegion::create_device(
        "uart",
        "UART",
        0xC000,
        0x10,
        42,
        device,
        TargetCaps::empty(),
    )
    .expect("valid region");
    manager
        .map_region_at_preferred("io", region)
        .expect("maps cleanly");

    let (_, fault) = manager.dispatch(&BusAccess::read(0xC004, AccessWidth::Bits8));
    assert_eq!(fault.kind, FaultKind::Device);
    assert_eq!(fault.device_id, 42);
    assert_eq!(fault.region_tag, RegionTag::Io);
}

#[test]
fn decomposed_device_read_assembles_little_endian() {
    let mut manager = RegionManager::new();
    manager
        .add_layer(MappingLayer::new("io", 0, true))
        .expect("fresh layer");
    let device = Rc::new(RefCell::new(OffsetDevice));
    // No SUPPORTS_WIDE, so every multi-byte access decomposes.
    let region = MemoryRegion::create_device(
        "counter",
        "Counter",
        0x100,
        0x10,
        3,
        device,
        TargetCaps::empty(),
    )
    .expect("valid region");
    manager
        .map_region_at_preferred("io", region)
        .expect("maps cleanly");

    let (value, fault) = manager.dispatch(&BusAccess::read(0x100, AccessWidth::Bits32));
    assert!(fault.is_success());
    assert_eq!(value, 0x0302_0100);

    let (value, fault) = manager.dispatch(
        &BusAccess::read(0x104, AccessWidth::Bits16).with_mode(BusAccessMode::Decomposed),
    );
    assert!(fault.is_success());
    assert_eq!(value, 0x0504);
}

fn width_strategy() -> impl Strategy<Value = AccessWidth> {
    prop_oneof![
        Just(AccessWidth::Bits8),
        Just(AccessWidth::Bits16),
        Just(AccessWidth::Bits32),
    ]
}

proptest! {
    #[test]
    fn property_dispatch_is_total_over_the_address_space(
        addr in 0_u32..=ADDR_MAX,
        width in width_strategy(),
    ) {
        let (mut manager, _memory) = base_ram_manager(0x1000, 0x1000);
        let (value, fault) = manager.dispatch(&BusAccess::read(addr, width));
        let end = u64::from(addr) + u64::from(width.bytes());
        if addr >= 0x1000 && end <= 0x2000 {
            prop_assert!(fault.is_success());
        } else {
            prop_assert_eq!(fault.kind, FaultKind::Unmapped);
            prop_assert_eq!(value, 0);
        }
    }

    #[test]
    fn property_resolution_is_deterministic(addr in 0_u32..=ADDR_MAX) {
        let (manager, _memory) = base_ram_manager(0x4000, 0x2000);
        let first = manager.resolve(addr).map(|(region, offset)| (region.id.clone(), offset));
        let second = manager.resolve(addr).map(|(region, offset)| (region.id.clone(), offset));
        prop_assert_eq!(first, second);
    }
}
