//! End-to-end bring-up coverage: configuration, the initial map, slot
//! cards, and scheduled device activity observed through one machine.

#![allow(
    clippy::pedantic,
    clippy::nursery,
    clippy::cast_possible_truncation,
    clippy::too_many_lines
)]

use bus_core::{
    share, AccessWidth, BusAccess, DebugPrivilege, EventKind, FaultKind, Machine, MachineConfig,
    PhysicalMemory, SignalLine, SlotCard, SlotManager, BOOT_ROM_BASE, EXPANSION_ROM_BASE,
    IO_LAYER, MAIN_RAM_POOL, RAM_BASE, SLOT_IO_BASE,
};
use rstest::rstest;

use bitflags as _;
use proptest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

#[rstest]
#[case(64 * 1024)]
#[case(1024 * 1024)]
#[case(8 * 1024 * 1024)]
fn accepted_ram_sizes_produce_a_matching_pool(#[case] ram_size: u32) {
    let config = MachineConfig {
        ram_size,
        ..MachineConfig::default()
    };
    let machine = Machine::bring_up(&config).expect("valid config");
    assert_eq!(machine.report.ram_size, ram_size);
    let pool = machine.pool(MAIN_RAM_POOL).expect("pool exists");
    assert_eq!(pool.borrow().size(), ram_size as usize);
}

#[test]
fn ram_round_trips_and_rom_rejects_writes_through_one_machine() {
    let config = MachineConfig {
        ram_size: 0,
        boot_rom_image: Some(vec![0xA9, 0x00]),
    };
    let mut machine = Machine::bring_up(&config).expect("valid config");

    let (_, fault) =
        machine.dispatch(&BusAccess::write(RAM_BASE + 0x10, 0xCAFE, AccessWidth::Bits16));
    assert!(fault.is_success());
    let (value, fault) = machine.dispatch(&BusAccess::read(RAM_BASE + 0x10, AccessWidth::Bits16));
    assert!(fault.is_success());
    assert_eq!(value, 0xCAFE);

    let (_, fault) = machine.dispatch(&BusAccess::write(BOOT_ROM_BASE, 0x00, AccessWidth::Bits8));
    assert_eq!(fault.kind, FaultKind::Permission);
    assert_eq!(machine.fault_log.count(FaultKind::Permission), 1);

    // The image is untouched and inspection does not disturb it.
    assert_eq!(machine.bus.peek(BOOT_ROM_BASE), Some(0xA9));
}

#[test]
fn slot_card_soft_switches_and_expansion_rom_work_end_to_end() {
    let mut machine = Machine::bring_up(&MachineConfig::default()).expect("valid config");
    let mut slots = SlotManager::new();

    let rom = share(PhysicalMemory::new(2048, "card_rom").expect("non-zero size"));
    rom.borrow_mut()
        .write_physical(DebugPrivilege::acquire_for_tooling(), 0, &[0x60])
        .expect("fits");
    let mut card = SlotCard::new("Disk Controller").with_expansion_rom(rom);
    card.handlers
        .set_read(0x0, Box::new(|_cycle| 0x80))
        .expect("in range");

    slots
        .install(6, card, IO_LAYER, &mut machine.bus)
        .expect("slot free");

    let switch_addr = SLOT_IO_BASE + 6 * 16;
    let (value, fault) = machine.dispatch(&BusAccess::read(switch_addr, AccessWidth::Bits8));
    assert!(fault.is_success());
    assert_eq!(value, 0x80);

    let (_, fault) = machine.dispatch(&BusAccess::read(EXPANSION_ROM_BASE, AccessWidth::Bits8));
    assert_eq!(fault.kind, FaultKind::Unmapped);

    slots
        .select_expansion(6, &mut machine.bus)
        .expect("has rom");
    let (value, fault) = machine.dispatch(&BusAccess::read(EXPANSION_ROM_BASE, AccessWidth::Bits8));
    assert!(fault.is_success());
    assert_eq!(value, 0x60);

    slots.remove(6, IO_LAYER, &mut machine.bus).expect("occupied");
    let (_, fault) = machine.dispatch(&BusAccess::read(switch_addr, AccessWidth::Bits8));
    assert_eq!(fault.kind, FaultKind::Unmapped);
}

#[test]
fn scheduled_device_activity_lands_in_machine_state() {
    let mut machine = Machine::bring_up(&MachineConfig::default()).expect("valid config");
    machine.scheduler.schedule_at(
        40,
        EventKind::Timer,
        3,
        Box::new(|ctx| {
            let cycle = ctx.due_cycle();
            ctx.signals.assert_line(SignalLine::Irq, 3, cycle);
            let access = BusAccess::write(0x100, 0x7F, AccessWidth::Bits8).at_cycle(cycle);
            let (_, fault) = ctx.bus.dispatch(&access);
            assert!(fault.is_success());
        }),
        "vbl-timer",
    );

    assert!(!machine.signals.is_asserted(SignalLine::Irq));
    let executed = machine.advance(64).expect("non-negative delta");
    assert_eq!(executed, 1);
    assert!(machine.signals.is_asserted(SignalLine::Irq));
    assert_eq!(machine.signals.last_change_cycle(SignalLine::Irq), 40);

    let (value, fault) = machine.dispatch(&BusAccess::read(0x100, AccessWidth::Bits8));
    assert!(fault.is_success());
    assert_eq!(value, 0x7F);
}
