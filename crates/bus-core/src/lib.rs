//! Memory, bus, and timing core for the Solstice/16 machine.

/// Physical byte pools, aliasing views, and the privileged raw-write path.
pub mod phys;
pub use phys::{
    share, DebugPrivilege, MemError, MemView, PhysicalMemory, SharedMemory,
};

/// Access descriptors: widths, intents, modes, and the access record itself.
pub mod access;
pub use access::{
    AccessFlags, AccessIntent, AccessWidth, Addr, BusAccess, BusAccessMode, CpuMode,
    ADDRESS_SPACE_BYTES, ADDR_MAX,
};

/// Fault taxonomy, structured fault records, and the bounded fault log.
pub mod fault;
pub use fault::{
    BusFault, FaultKind, FaultLog, RegionTag, FAULT_KIND_COUNT, NO_DEVICE,
};

/// Region descriptions, backing targets, and the device handler contract.
pub mod region;
pub use region::{
    BusDevice, BusTarget, DeviceError, MapError, MemoryRegion, PagePerms, SharedDevice,
    TargetCaps,
};

/// Layered address resolution and access dispatch.
pub mod bus;
pub use bus::{MappingLayer, RegionManager};

/// Deterministic cycle-domain event scheduler.
pub mod sched;
pub use sched::{
    EventCallback, EventContext, EventHandle, EventKind, PeriodicActor, SchedError, Scheduler,
    SharedActor,
};

/// Wired-OR control lines shared between devices and the CPU core.
pub mod signal;
pub use signal::{SignalBus, SignalLine, SIGNAL_LINE_COUNT};

/// Machine bring-up: configuration validation and the initial region map.
pub mod bringup;
pub use bringup::{
    BringUpError, BringUpReport, Machine, MachineConfig, BASE_LAYER, BOOT_ROM_BASE,
    BOOT_ROM_POOL, BOOT_ROM_SIZE, DEFAULT_RAM_SIZE, FAULT_LOG_CAPACITY, IO_LAYER,
    IO_LAYER_PRIORITY, MAIN_RAM_POOL, MAX_RAM_SIZE, MIN_RAM_SIZE, PAGE_SIZE, RAM_BASE,
};

/// Expansion-slot soft switches, cards, and the shared expansion-ROM window.
pub mod slots;
pub use slots::{
    SlotCard, SlotError, SlotIoHandlers, SlotManager, SwitchReadHandler, SwitchWriteHandler,
    EXPANSION_LAYER_PRIORITY, EXPANSION_ROM_BASE, EXPANSION_ROM_SIZE, OPEN_BUS_VALUE,
    SLOT_COUNT, SLOT_DEVICE_ID_BASE, SLOT_IO_BASE, SLOT_IO_WINDOW_SIZE,
    SOFT_SWITCHES_PER_CARD,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
