//! Deterministic replay fingerprint generator used for cross-host comparison.

use std::cell::RefCell;
use std::rc::Rc;

use bus_core::{
    AccessWidth, BusAccess, EventKind, Machine, MachineConfig, SignalLine,
};

use bitflags as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn fingerprint() -> String {
    let config = MachineConfig {
        ram_size: 64 * 1024,
        boot_rom_image: Some(vec![0xEA; 16]),
    };
    let mut machine = Machine::bring_up(&config).expect("valid config");

    let order: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    for (label, cycle) in [(0x01_u8, 30_u64), (0x02, 10), (0x03, 10), (0x04, 55)] {
        let trace = Rc::clone(&order);
        machine.scheduler.schedule_at(
            cycle,
            EventKind::Device,
            u32::from(label),
            Box::new(move |ctx| {
                trace.borrow_mut().push(label);
                let due = ctx.due_cycle();
                let addr = 0x200 + u32::from(label);
                let access =
                    BusAccess::write(addr, u32::from(label) * 3, AccessWidth::Bits8).at_cycle(due);
                let (_, fault) = ctx.bus.dispatch(&access);
                assert!(fault.is_success());
                if label == 0x03 {
                    ctx.signals.assert_line(SignalLine::Irq, u32::from(label), due);
                }
            }),
            "fingerprint-event",
        );
    }

    let executed = machine.advance(64).expect("non-negative delta");

    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    hash_bytes(&mut hash, &executed.to_le_bytes());
    hash_bytes(&mut hash, &order.borrow());
    for label in 1..=4_u8 {
        let (value, fault) = machine.dispatch(&BusAccess::read(
            0x200 + u32::from(label),
            AccessWidth::Bits8,
        ));
        assert!(fault.is_success());
        hash_bytes(&mut hash, &value.to_le_bytes());
    }
    hash_bytes(&mut hash, &[u8::from(machine.signals.is_asserted(SignalLine::Irq))]);
    hash_bytes(
        &mut hash,
        &machine.signals.last_change_cycle(SignalLine::Irq).to_le_bytes(),
    );
    hash_bytes(&mut hash, &machine.scheduler.now().to_le_bytes());

    format!("{hash:016x}")
}

fn main() {
    println!("{}", fingerprint());
}
