//! Expansion-slot bookkeeping layered on top of the bus.
//!
//! Each installed card exposes a 16-entry soft-switch table routed through
//! an I/O-tagged device region, plus an optional expansion-ROM image. All
//! expansion ROMs share one window; at most one slot's window is selected
//! at a time, modeled by toggling per-slot mapping layers rather than
//! remapping regions.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::access::Addr;
use crate::bus::{MappingLayer, RegionManager};
use crate::fault::RegionTag;
use crate::phys::SharedMemory;
use crate::region::{BusDevice, DeviceError, MapError, MemoryRegion, TargetCaps};

/// Soft-switch offsets per card: `0x0..=0xF`.
pub const SOFT_SWITCHES_PER_CARD: usize = 16;

/// Bytes covered by each slot's soft-switch window.
pub const SLOT_IO_WINDOW_SIZE: u32 = 16;

/// Value read from a soft-switch offset with no installed read handler.
pub const OPEN_BUS_VALUE: u8 = 0xFF;

/// Number of usable expansion slots (1 through 7).
pub const SLOT_COUNT: u8 = 7;

/// Base address of the per-slot soft-switch windows; slot `n` occupies
/// `SLOT_IO_BASE + n * 16`.
pub const SLOT_IO_BASE: Addr = 0x00_C080;

/// Shared expansion-ROM window base.
pub const EXPANSION_ROM_BASE: Addr = 0x00_C800;

/// Shared expansion-ROM window size (2 KiB).
pub const EXPANSION_ROM_SIZE: u32 = 2048;

/// Device ids for slot cards start here; slot `n` reports `base + n`.
pub const SLOT_DEVICE_ID_BASE: i32 = 0x10;

/// Resolution priority of per-slot expansion-ROM layers.
pub const EXPANSION_LAYER_PRIORITY: i32 = 20;

/// Errors from slot bookkeeping.
#[derive(Debug, Error)]
pub enum SlotError {
    /// Soft-switch offset outside `0x0..=0xF`.
    #[error("soft-switch offset {offset:#x} out of range")]
    OutOfRange {
        /// Offending offset.
        offset: usize,
    },
    /// Slot number outside `1..=7`.
    #[error("slot {0} is not a valid expansion slot")]
    InvalidSlot(u8),
    /// Target slot already holds a card.
    #[error("slot {0} is already occupied")]
    SlotOccupied(u8),
    /// Target slot holds no card.
    #[error("slot {0} is empty")]
    SlotEmpty(u8),
    /// Card in the slot carries no expansion ROM.
    #[error("slot {0} has no expansion rom")]
    NoExpansionRom(u8),
    /// Card's expansion ROM image exceeds the shared window.
    #[error("expansion rom of {len} bytes exceeds window of {window} bytes")]
    ExpansionRomTooLarge {
        /// Image length in bytes.
        len: usize,
        /// Window size in bytes.
        window: u32,
    },
    /// Underlying mapping mutation failed.
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Read handler for one soft-switch offset; receives the access cycle.
pub type SwitchReadHandler = Box<dyn FnMut(u64) -> u8>;

/// Write handler for one soft-switch offset; receives value and cycle.
pub type SwitchWriteHandler = Box<dyn FnMut(u8, u64)>;

/// Per-card soft-switch dispatch table, offsets `0x0..=0xF`.
///
/// Each offset's read and write slots are independent and independently
/// overwritable.
#[derive(Default)]
pub struct SlotIoHandlers {
    reads: [Option<SwitchReadHandler>; SOFT_SWITCHES_PER_CARD],
    writes: [Option<SwitchWriteHandler>; SOFT_SWITCHES_PER_CARD],
}

impl std::fmt::Debug for SlotIoHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let installed_reads = self.reads.iter().filter(|slot| slot.is_some()).count();
        let installed_writes = self.writes.iter().filter(|slot| slot.is_some()).count();
        f.debug_struct("SlotIoHandlers")
            .field("reads", &installed_reads)
            .field("writes", &installed_writes)
            .finish()
    }
}

impl SlotIoHandlers {
    /// Creates an empty table; every offset reads open-bus and drops writes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check(offset: usize) -> Result<(), SlotError> {
        if offset < SOFT_SWITCHES_PER_CARD {
            Ok(())
        } else {
            Err(SlotError::OutOfRange { offset })
        }
    }

    /// Replaces both handler slots at `offset`; `None` clears a slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::OutOfRange`] for offsets at or above `0x10`.
    pub fn set(
        &mut self,
        offset: usize,
        read: Option<SwitchReadHandler>,
        write: Option<SwitchWriteHandler>,
    ) -> Result<(), SlotError> {
        Self::check(offset)?;
        self.reads[offset] = read;
        self.writes[offset] = write;
        Ok(())
    }

    /// Replaces only the read handler at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::OutOfRange`] for offsets at or above `0x10`.
    pub fn set_read(&mut self, offset: usize, handler: SwitchReadHandler) -> Result<(), SlotError> {
        Self::check(offset)?;
        self.reads[offset] = Some(handler);
        Ok(())
    }

    /// Replaces only the write handler at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::OutOfRange`] for offsets at or above `0x10`.
    pub fn set_write(
        &mut self,
        offset: usize,
        handler: SwitchWriteHandler,
    ) -> Result<(), SlotError> {
        Self::check(offset)?;
        self.writes[offset] = Some(handler);
        Ok(())
    }

    /// Reports whether read and write handlers are installed at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::OutOfRange`] for offsets at or above `0x10`.
    pub fn installed(&self, offset: usize) -> Result<(bool, bool), SlotError> {
        Self::check(offset)?;
        Ok((self.reads[offset].is_some(), self.writes[offset].is_some()))
    }

    /// Routes a read; missing handlers return [`OPEN_BUS_VALUE`].
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::OutOfRange`] for offsets at or above `0x10`.
    pub fn read(&mut self, offset: usize, cycle: u64) -> Result<u8, SlotError> {
        Self::check(offset)?;
        Ok(self.reads[offset]
            .as_mut()
            .map_or(OPEN_BUS_VALUE, |handler| handler(cycle)))
    }

    /// Routes a write; missing handlers drop the value.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::OutOfRange`] for offsets at or above `0x10`.
    pub fn write(&mut self, offset: usize, value: u8, cycle: u64) -> Result<(), SlotError> {
        Self::check(offset)?;
        if let Some(handler) = self.writes[offset].as_mut() {
            handler(value, cycle);
        }
        Ok(())
    }
}

/// One expansion card: its soft-switch table and optional expansion ROM.
#[derive(Debug)]
pub struct SlotCard {
    /// Card name for diagnostics.
    pub name: String,
    /// Soft-switch dispatch table.
    pub handlers: SlotIoHandlers,
    /// Expansion ROM image pool, at most [`EXPANSION_ROM_SIZE`] bytes.
    pub expansion_rom: Option<SharedMemory>,
    device_id: i32,
}

impl SlotCard {
    /// Creates a card with an empty soft-switch table and no ROM.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            handlers: SlotIoHandlers::new(),
            expansion_rom: None,
            device_id: SLOT_DEVICE_ID_BASE,
        }
    }

    /// Returns the card carrying an expansion ROM pool.
    #[must_use]
    pub fn with_expansion_rom(mut self, memory: SharedMemory) -> Self {
        self.expansion_rom = Some(memory);
        self
    }

    /// Device id reported in fault records once installed.
    #[must_use]
    pub const fn device_id(&self) -> i32 {
        self.device_id
    }
}

impl BusDevice for SlotCard {
    fn read(&mut self, offset: Addr, cycle: u64) -> Result<u8, DeviceError> {
        self.handlers
            .read(offset as usize, cycle)
            .map_err(|err| DeviceError {
                device_id: self.device_id,
                offset,
                reason: err.to_string(),
            })
    }

    fn write(&mut self, offset: Addr, value: u8, cycle: u64) -> Result<(), DeviceError> {
        self.handlers
            .write(offset as usize, value, cycle)
            .map_err(|err| DeviceError {
                device_id: self.device_id,
                offset,
                reason: err.to_string(),
            })
    }
}

#[derive(Debug)]
struct InstalledCard {
    card: Rc<RefCell<SlotCard>>,
    io_region_id: String,
    expansion_layer: Option<String>,
}

/// Install/remove/select bookkeeping for the seven expansion slots.
#[derive(Debug, Default)]
pub struct SlotManager {
    slots: [Option<InstalledCard>; SLOT_COUNT as usize + 1],
    selected_expansion: Option<u8>,
}

impl SlotManager {
    /// Creates a manager with every slot empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_slot(slot: u8) -> Result<(), SlotError> {
        if (1..=SLOT_COUNT).contains(&slot) {
            Ok(())
        } else {
            Err(SlotError::InvalidSlot(slot))
        }
    }

    /// Installs `card` into `slot`, mapping its soft-switch window into the
    /// I/O layer and its expansion ROM (if any) into a dedicated inactive
    /// layer.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::InvalidSlot`], [`SlotError::SlotOccupied`],
    /// [`SlotError::ExpansionRomTooLarge`], or a mapping failure.
    pub fn install(
        &mut self,
        slot: u8,
        mut card: SlotCard,
        io_layer: &str,
        bus: &mut RegionManager,
    ) -> Result<(), SlotError> {
        Self::check_slot(slot)?;
        if self.slots[usize::from(slot)].is_some() {
            return Err(SlotError::SlotOccupied(slot));
        }
        if let Some(rom) = &card.expansion_rom {
            let len = rom.borrow().size();
            if len > EXPANSION_ROM_SIZE as usize {
                return Err(SlotError::ExpansionRomTooLarge {
                    len,
                    window: EXPANSION_ROM_SIZE,
                });
            }
        }

        card.device_id = SLOT_DEVICE_ID_BASE + i32::from(slot);
        let expansion_rom = card.expansion_rom.clone();
        let card_name = card.name.clone();
        let shared = Rc::new(RefCell::new(card));

        let io_region_id = format!("slot{slot}_io");
        let io_base = SLOT_IO_BASE + Addr::from(slot) * 16;
        let io_region = MemoryRegion::create_device(
            &io_region_id,
            &format!("{card_name} switches"),
            io_base,
            SLOT_IO_WINDOW_SIZE,
            SLOT_DEVICE_ID_BASE + i32::from(slot),
            Rc::clone(&shared) as Rc<RefCell<dyn BusDevice>>,
            TargetCaps::empty(),
        )?
        .with_tag(RegionTag::Slot);
        bus.map_region_at_preferred(io_layer, io_region)?;

        let mut expansion_layer = None;
        if let Some(rom) = expansion_rom {
            let layer_name = format!("slot{slot}_exprom");
            bus.add_layer(MappingLayer::new(
                &layer_name,
                EXPANSION_LAYER_PRIORITY,
                false,
            ))?;
            let rom_region = MemoryRegion::create_rom(
                &layer_name,
                &format!("{card_name} expansion ROM"),
                EXPANSION_ROM_BASE,
                &rom,
            )?
            .with_tag(RegionTag::Slot);
            bus.map_region_at_preferred(&layer_name, rom_region)?;
            expansion_layer = Some(layer_name);
        }

        self.slots[usize::from(slot)] = Some(InstalledCard {
            card: shared,
            io_region_id,
            expansion_layer,
        });
        Ok(())
    }

    /// Removes the card in `slot`, unmapping its regions and layers.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::InvalidSlot`], [`SlotError::SlotEmpty`], or a
    /// mapping failure.
    pub fn remove(
        &mut self,
        slot: u8,
        io_layer: &str,
        bus: &mut RegionManager,
    ) -> Result<Rc<RefCell<SlotCard>>, SlotError> {
        Self::check_slot(slot)?;
        let installed = self.slots[usize::from(slot)]
            .take()
            .ok_or(SlotError::SlotEmpty(slot))?;
        bus.unmap(io_layer, &installed.io_region_id)?;
        if let Some(layer) = &installed.expansion_layer {
            bus.remove_layer(layer)?;
        }
        if self.selected_expansion == Some(slot) {
            self.selected_expansion = None;
        }
        Ok(installed.card)
    }

    /// Selects `slot`'s expansion-ROM window, implicitly deselecting any
    /// previously selected slot.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError::InvalidSlot`], [`SlotError::SlotEmpty`],
    /// [`SlotError::NoExpansionRom`], or a mapping failure.
    pub fn select_expansion(
        &mut self,
        slot: u8,
        bus: &mut RegionManager,
    ) -> Result<(), SlotError> {
        Self::check_slot(slot)?;
        let layer_name = {
            let installed = self.slots[usize::from(slot)]
                .as_ref()
                .ok_or(SlotError::SlotEmpty(slot))?;
            installed
                .expansion_layer
                .clone()
                .ok_or(SlotError::NoExpansionRom(slot))?
        };
        if let Some(previous) = self.selected_expansion {
            if previous != slot {
                self.deactivate_expansion(previous, bus)?;
            }
        }
        bus.set_layer_active(&layer_name, true)?;
        self.selected_expansion = Some(slot);
        Ok(())
    }

    /// Deselects any selected expansion-ROM window.
    ///
    /// # Errors
    ///
    /// Returns a mapping failure when the layer vanished underneath us.
    pub fn deselect_expansion(&mut self, bus: &mut RegionManager) -> Result<(), SlotError> {
        if let Some(slot) = self.selected_expansion.take() {
            self.deactivate_expansion(slot, bus)?;
        }
        Ok(())
    }

    fn deactivate_expansion(&self, slot: u8, bus: &mut RegionManager) -> Result<(), SlotError> {
        if let Some(installed) = self.slots[usize::from(slot)].as_ref() {
            if let Some(layer) = &installed.expansion_layer {
                bus.set_layer_active(layer, false)?;
            }
        }
        Ok(())
    }

    /// Slot whose expansion-ROM window is currently selected.
    #[must_use]
    pub const fn selected_expansion(&self) -> Option<u8> {
        self.selected_expansion
    }

    /// Shared handle to the card in `slot`, when occupied.
    #[must_use]
    pub fn card(&self, slot: u8) -> Option<Rc<RefCell<SlotCard>>> {
        self.slots
            .get(usize::from(slot))
            .and_then(|entry| entry.as_ref())
            .map(|installed| Rc::clone(&installed.card))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        SlotCard, SlotError, SlotIoHandlers, SlotManager, EXPANSION_ROM_BASE, OPEN_BUS_VALUE,
        SLOT_IO_BASE,
    };
    use crate::access::{AccessWidth, BusAccess};
    use crate::bus::{MappingLayer, RegionManager};
    use crate::fault::FaultKind;
    use crate::phys::{share, DebugPrivilege, PhysicalMemory};

    fn io_bus() -> RegionManager {
        let mut bus = RegionManager::new();
        bus.add_layer(MappingLayer::new("io", 10, true)).expect("fresh");
        bus
    }

    #[test]
    fn set_at_or_above_0x10_is_out_of_range() {
        let mut handlers = SlotIoHandlers::new();
        assert!(matches!(
            handlers.set_read(0x10, Box::new(|_| 0)),
            Err(SlotError::OutOfRange { offset: 0x10 })
        ));
        assert!(matches!(
            handlers.set(0x20, None, None),
            Err(SlotError::OutOfRange { offset: 0x20 })
        ));
        for offset in 0x0..=0xF {
            handlers
                .set_read(offset, Box::new(move |_| 0x40))
                .expect("in range");
        }
    }

    #[test]
    fn offsets_are_independently_overwritable() {
        let mut handlers = SlotIoHandlers::new();
        handlers.set_read(0x0, Box::new(|_| 0x11)).expect("in range");
        handlers.set_read(0x1, Box::new(|_| 0x22)).expect("in range");
        handlers.set_read(0x0, Box::new(|_| 0x33)).expect("in range");

        assert_eq!(handlers.read(0x0, 0).expect("in range"), 0x33);
        assert_eq!(handlers.read(0x1, 0).expect("in range"), 0x22);
        assert_eq!(handlers.read(0x2, 0).expect("in range"), OPEN_BUS_VALUE);

        assert_eq!(handlers.installed(0x0).expect("in range"), (true, false));
        assert_eq!(handlers.installed(0x2).expect("in range"), (false, false));
        assert!(matches!(
            handlers.installed(0x10),
            Err(SlotError::OutOfRange { offset: 0x10 })
        ));
    }

    #[test]
    fn unhandled_writes_are_dropped_quietly() {
        let mut handlers = SlotIoHandlers::new();
        handlers.write(0x5, 0xAB, 7).expect("in range");
        assert!(matches!(
            handlers.write(0x10, 0xAB, 7),
            Err(SlotError::OutOfRange { offset: 0x10 })
        ));
    }

    #[test]
    fn installed_card_switches_are_reachable_through_the_bus() {
        let mut bus = io_bus();
        let mut manager = SlotManager::new();
        let mut card = SlotCard::new("Serial");
        card.handlers
            .set_read(0x3, Box::new(|_| 0x5A))
            .expect("in range");
        manager.install(4, card, "io", &mut bus).expect("slot free");

        let addr = SLOT_IO_BASE + 4 * 16 + 3;
        let (value, fault) = bus.dispatch(&BusAccess::read(addr, AccessWidth::Bits8));
        assert!(fault.is_success());
        assert_eq!(value, 0x5A);
        assert_eq!(fault.device_id, super::SLOT_DEVICE_ID_BASE + 4);
    }

    #[test]
    fn slot_validation_rejects_bad_and_occupied_slots() {
        let mut bus = io_bus();
        let mut manager = SlotManager::new();
        assert!(matches!(
            manager.install(0, SlotCard::new("X"), "io", &mut bus),
            Err(SlotError::InvalidSlot(0))
        ));
        assert!(matches!(
            manager.install(8, SlotCard::new("X"), "io", &mut bus),
            Err(SlotError::InvalidSlot(8))
        ));
        manager
            .install(2, SlotCard::new("A"), "io", &mut bus)
            .expect("slot free");
        assert!(matches!(
            manager.install(2, SlotCard::new("B"), "io", &mut bus),
            Err(SlotError::SlotOccupied(2))
        ));
    }

    fn rom_card(name: &str, fill: u8) -> SlotCard {
        let rom = share(PhysicalMemory::new(2048, name).expect("non-zero"));
        rom.borrow_mut()
            .write_physical(
                DebugPrivilege::acquire_for_tooling(),
                0,
                &[fill],
            )
            .expect("fits");
        SlotCard::new(name).with_expansion_rom(rom)
    }

    #[test]
    fn expansion_selection_is_exclusive() {
        let mut bus = io_bus();
        let mut manager = SlotManager::new();
        manager
            .install(1, rom_card("CardOne", 0x11), "io", &mut bus)
            .expect("slot free");
        manager
            .install(2, rom_card("CardTwo", 0x22), "io", &mut bus)
            .expect("slot free");

        // Nothing selected: the shared window is unmapped.
        let (_, fault) = bus.dispatch(&BusAccess::read(EXPANSION_ROM_BASE, AccessWidth::Bits8));
        assert_eq!(fault.kind, FaultKind::Unmapped);

        manager.select_expansion(1, &mut bus).expect("has rom");
        let (value, fault) =
            bus.dispatch(&BusAccess::read(EXPANSION_ROM_BASE, AccessWidth::Bits8));
        assert!(fault.is_success());
        assert_eq!(value, 0x11);

        manager.select_expansion(2, &mut bus).expect("has rom");
        assert_eq!(manager.selected_expansion(), Some(2));
        let (value, fault) =
            bus.dispatch(&BusAccess::read(EXPANSION_ROM_BASE, AccessWidth::Bits8));
        assert!(fault.is_success());
        assert_eq!(value, 0x22);

        manager.deselect_expansion(&mut bus).expect("known layers");
        assert_eq!(manager.selected_expansion(), None);
        let (_, fault) = bus.dispatch(&BusAccess::read(EXPANSION_ROM_BASE, AccessWidth::Bits8));
        assert_eq!(fault.kind, FaultKind::Unmapped);
    }

    #[test]
    fn selecting_without_rom_or_card_fails() {
        let mut bus = io_bus();
        let mut manager = SlotManager::new();
        assert!(matches!(
            manager.select_expansion(3, &mut bus),
            Err(SlotError::SlotEmpty(3))
        ));
        manager
            .install(3, SlotCard::new("NoRom"), "io", &mut bus)
            .expect("slot free");
        assert!(matches!(
            manager.select_expansion(3, &mut bus),
            Err(SlotError::NoExpansionRom(3))
        ));
    }

    #[test]
    fn removal_unmaps_regions_and_clears_selection() {
        let mut bus = io_bus();
        let mut manager = SlotManager::new();
        manager
            .install(5, rom_card("Gone", 0x99), "io", &mut bus)
            .expect("slot free");
        manager.select_expansion(5, &mut bus).expect("has rom");

        manager.remove(5, "io", &mut bus).expect("occupied");
        assert_eq!(manager.selected_expansion(), None);
        let addr = SLOT_IO_BASE + 5 * 16;
        let (_, fault) = bus.dispatch(&BusAccess::read(addr, AccessWidth::Bits8));
        assert_eq!(fault.kind, FaultKind::Unmapped);
        let (_, fault) = bus.dispatch(&BusAccess::read(EXPANSION_ROM_BASE, AccessWidth::Bits8));
        assert_eq!(fault.kind, FaultKind::Unmapped);

        assert!(matches!(
            manager.remove(5, "io", &mut bus),
            Err(SlotError::SlotEmpty(5))
        ));
    }

    #[test]
    fn oversized_expansion_rom_is_rejected() {
        let mut bus = io_bus();
        let mut manager = SlotManager::new();
        let rom = share(PhysicalMemory::new(4096, "big").expect("non-zero"));
        let card = SlotCard::new("Big").with_expansion_rom(rom);
        assert!(matches!(
            manager.install(1, card, "io", &mut bus),
            Err(SlotError::ExpansionRomTooLarge { len: 4096, .. })
        ));
    }
}
