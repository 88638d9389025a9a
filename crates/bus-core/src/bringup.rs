//! Machine bring-up: configuration validation and initial region map.
//!
//! A one-shot builder with simple range checks. It allocates the physical
//! pools, assembles the initial layer/region map, and hands the caller a
//! [`Machine`] bundle; everything after that happens through the bus,
//! scheduler, and signal APIs.

use std::collections::HashMap;

use thiserror::Error;

use crate::access::{Addr, BusAccess};
use crate::bus::{MappingLayer, RegionManager};
use crate::fault::{BusFault, FaultLog};
use crate::phys::{share, DebugPrivilege, MemError, PhysicalMemory, SharedMemory};
use crate::region::{MapError, MemoryRegion};
use crate::sched::{SchedError, Scheduler};
use crate::signal::SignalBus;

/// Permission granule; regions are sized in whole pages.
pub const PAGE_SIZE: u32 = 256;

/// Base address main RAM maps at.
pub const RAM_BASE: Addr = 0x00_0000;

/// Smallest accepted RAM configuration (64 KiB).
pub const MIN_RAM_SIZE: u32 = 64 * 1024;

/// Largest accepted RAM configuration (8 MiB).
pub const MAX_RAM_SIZE: u32 = 8 * 1024 * 1024;

/// RAM size used when a bring-up request passes 0 (1 MiB).
pub const DEFAULT_RAM_SIZE: u32 = 1024 * 1024;

/// Base address the boot ROM window maps at.
pub const BOOT_ROM_BASE: Addr = 0xFE_0000;

/// Boot ROM window size (128 KiB).
pub const BOOT_ROM_SIZE: u32 = 128 * 1024;

/// Pool-map key for main RAM.
pub const MAIN_RAM_POOL: &str = "main_ram";

/// Pool-map key for the boot ROM.
pub const BOOT_ROM_POOL: &str = "boot_rom";

/// Name of the always-active base mapping layer.
pub const BASE_LAYER: &str = "base";

/// Name of the I/O mapping layer, resolved above the base layer.
pub const IO_LAYER: &str = "io";

/// Resolution priority of the I/O layer.
pub const IO_LAYER_PRIORITY: i32 = 10;

/// How many fault records the machine's log retains.
pub const FAULT_LOG_CAPACITY: usize = 64;

/// Errors from a misconfigured bring-up request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BringUpError {
    /// Requested RAM size falls outside `[MIN_RAM_SIZE, MAX_RAM_SIZE]`.
    #[error("ram size {requested} outside [{min}, {max}]")]
    RamSizeOutOfRange {
        /// Size the request asked for.
        requested: u32,
        /// Smallest accepted size.
        min: u32,
        /// Largest accepted size.
        max: u32,
    },
    /// Supplied boot ROM image exceeds the ROM window.
    #[error("boot rom image of {len} bytes exceeds window of {window} bytes")]
    RomImageTooLarge {
        /// Image length in bytes.
        len: usize,
        /// ROM window size in bytes.
        window: u32,
    },
    /// Pool allocation failed.
    #[error(transparent)]
    Mem(#[from] MemError),
    /// Region construction or mapping failed.
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Bring-up request for one machine instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineConfig {
    /// Requested RAM size in bytes; 0 means [`DEFAULT_RAM_SIZE`].
    pub ram_size: u32,
    /// Boot ROM image; absence is a warning, not an error.
    pub boot_rom_image: Option<Vec<u8>>,
}

/// What bring-up actually produced, for logging by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BringUpReport {
    /// Effective RAM size after defaulting.
    pub ram_size: u32,
    /// Non-fatal conditions observed during bring-up.
    pub warnings: Vec<String>,
}

/// Assembled machine: bus, scheduler, signal lines, and physical pools.
#[derive(Debug)]
pub struct Machine {
    /// Region map and dispatch.
    pub bus: RegionManager,
    /// Deterministic event scheduler.
    pub scheduler: Scheduler,
    /// Wired-OR control lines.
    pub signals: SignalBus,
    /// Recent dispatch faults, for inspection tooling.
    pub fault_log: FaultLog,
    /// Conditions observed during bring-up.
    pub report: BringUpReport,
    pools: HashMap<String, SharedMemory>,
}

impl Machine {
    /// Validates `config` and assembles the initial machine.
    ///
    /// # Errors
    ///
    /// Returns [`BringUpError::RamSizeOutOfRange`] for a nonzero RAM size
    /// outside the accepted range, [`BringUpError::RomImageTooLarge`] for
    /// an oversized ROM image, and propagates pool/mapping failures.
    pub fn bring_up(config: &MachineConfig) -> Result<Self, BringUpError> {
        let ram_size = effective_ram_size(config.ram_size)?;
        let mut report = BringUpReport {
            ram_size,
            warnings: Vec::new(),
        };

        let main_ram = share(PhysicalMemory::new(ram_size as usize, MAIN_RAM_POOL)?);
        let boot_rom = share(PhysicalMemory::new(BOOT_ROM_SIZE as usize, BOOT_ROM_POOL)?);

        match &config.boot_rom_image {
            Some(image) => {
                if image.len() > BOOT_ROM_SIZE as usize {
                    return Err(BringUpError::RomImageTooLarge {
                        len: image.len(),
                        window: BOOT_ROM_SIZE,
                    });
                }
                boot_rom.borrow_mut().write_physical(
                    DebugPrivilege::acquire_for_tooling(),
                    0,
                    image,
                )?;
            }
            None => report
                .warnings
                .push("boot rom image absent; rom window reads as zeroes".to_owned()),
        }

        let mut bus = RegionManager::new();
        bus.add_layer(MappingLayer::new(BASE_LAYER, 0, true))?;
        bus.add_layer(MappingLayer::new(IO_LAYER, IO_LAYER_PRIORITY, true))?;
        bus.map_region_at_preferred(
            BASE_LAYER,
            MemoryRegion::create_ram(MAIN_RAM_POOL, "Main RAM", RAM_BASE, &main_ram)?,
        )?;
        bus.map_region_at_preferred(
            BASE_LAYER,
            MemoryRegion::create_rom(BOOT_ROM_POOL, "Boot ROM", BOOT_ROM_BASE, &boot_rom)?,
        )?;

        let mut pools = HashMap::new();
        pools.insert(MAIN_RAM_POOL.to_owned(), main_ram);
        pools.insert(BOOT_ROM_POOL.to_owned(), boot_rom);

        Ok(Self {
            bus,
            scheduler: Scheduler::new(),
            signals: SignalBus::new(),
            fault_log: FaultLog::new(FAULT_LOG_CAPACITY),
            report,
            pools,
        })
    }

    /// Looks up a physical pool by its conventional key.
    #[must_use]
    pub fn pool(&self, name: &str) -> Option<&SharedMemory> {
        self.pools.get(name)
    }

    /// Dispatches one access through the bus, recording any fault.
    pub fn dispatch(&mut self, access: &BusAccess) -> (u32, BusFault) {
        self.bus.dispatch_logged(access, &mut self.fault_log)
    }

    /// Advances the scheduler, giving callbacks the machine's bus and
    /// signal lines. Returns the number of events executed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidArgument`] for a negative delta.
    pub fn advance(&mut self, delta: i64) -> Result<u64, SchedError> {
        self.scheduler
            .advance(delta, &mut self.bus, &mut self.signals)
    }
}

fn effective_ram_size(requested: u32) -> Result<u32, BringUpError> {
    if requested == 0 {
        return Ok(DEFAULT_RAM_SIZE);
    }
    if (MIN_RAM_SIZE..=MAX_RAM_SIZE).contains(&requested) {
        Ok(requested)
    } else {
        Err(BringUpError::RamSizeOutOfRange {
            requested,
            min: MIN_RAM_SIZE,
            max: MAX_RAM_SIZE,
        })
    }
}
