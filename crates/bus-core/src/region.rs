//! Mapped-range descriptions and the targets that back them.
//!
//! A [`MemoryRegion`] is an immutable description; it executes no logic.
//! [`BusTarget`] is the closed set of capabilities a region can be backed
//! by, dispatched through a single exhaustive match so a missing case is a
//! compile error rather than a runtime surprise.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use thiserror::Error;

use crate::access::{AccessWidth, Addr};
use crate::fault::RegionTag;
use crate::phys::{MemError, MemView, SharedMemory};

bitflags! {
    /// Default access rights attached to a mapped region.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PagePerms: u8 {
        /// Data reads are allowed.
        const READ = 1 << 0;
        /// Data writes are allowed.
        const WRITE = 1 << 1;
        /// Instruction fetches are allowed.
        const EXECUTE = 1 << 2;
    }
}

bitflags! {
    /// Optional capabilities declared by a region's target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TargetCaps: u8 {
        /// Target can serve side-effect-free reads for inspection.
        const SUPPORTS_PEEK = 1 << 0;
        /// Target can serve multi-byte accesses atomically.
        const SUPPORTS_WIDE = 1 << 1;
        /// Wide accesses must be naturally aligned.
        const REQUIRES_ALIGNMENT = 1 << 2;
    }
}

/// Failure raised inside a device's own handler.
///
/// Surfaces through dispatch as a `Device` bus fault without crashing the
/// dispatch path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("device {device_id} rejected offset {offset:#x}: {reason}")]
pub struct DeviceError {
    /// Device that raised the failure.
    pub device_id: i32,
    /// Region-relative offset of the rejected access.
    pub offset: Addr,
    /// Device-supplied description.
    pub reason: String,
}

/// Handler contract for device-routed regions.
///
/// Offsets are region-relative. Byte handlers are mandatory; the wide
/// handlers are only called for targets declaring
/// [`TargetCaps::SUPPORTS_WIDE`] and default to little-endian byte loops.
pub trait BusDevice {
    /// Reads one byte.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] when the device rejects the access.
    fn read(&mut self, offset: Addr, cycle: u64) -> Result<u8, DeviceError>;

    /// Writes one byte.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] when the device rejects the access.
    fn write(&mut self, offset: Addr, value: u8, cycle: u64) -> Result<(), DeviceError>;

    /// Side-effect-free read for inspection tooling; `None` when the device
    /// cannot answer without side effects.
    fn peek(&self, offset: Addr) -> Option<u8> {
        let _ = offset;
        None
    }

    /// Atomic wide read in little-endian byte order.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] when the device rejects any byte.
    fn read_wide(&mut self, offset: Addr, width: AccessWidth, cycle: u64) -> Result<u32, DeviceError> {
        let mut value: u32 = 0;
        for index in 0..width.bytes() {
            let byte = self.read(offset + index, cycle)?;
            value |= u32::from(byte) << (8 * index);
        }
        Ok(value)
    }

    /// Atomic wide write in little-endian byte order.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] when the device rejects any byte.
    fn write_wide(
        &mut self,
        offset: Addr,
        value: u32,
        width: AccessWidth,
        cycle: u64,
    ) -> Result<(), DeviceError> {
        let bytes = value.to_le_bytes();
        for index in 0..width.bytes() {
            self.write(offset + index, bytes[index as usize], cycle)?;
        }
        Ok(())
    }
}

/// Shared handle to a device handler referenced by one or more regions.
pub type SharedDevice = Rc<RefCell<dyn BusDevice>>;

/// Closed set of capabilities backing a region.
pub enum BusTarget {
    /// Delegates to a RAM window of a physical pool.
    Ram(MemView),
    /// Read/execute window of a physical pool; the write path is fenced off.
    Rom(MemView),
    /// Routes to a device's read/write handler.
    Device {
        /// Identifier reported in fault records.
        device_id: i32,
        /// Handler invoked for each routed access.
        handler: SharedDevice,
    },
}

impl fmt::Debug for BusTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ram(view) => f.debug_tuple("Ram").field(&view.len()).finish(),
            Self::Rom(view) => f.debug_tuple("Rom").field(&view.len()).finish(),
            Self::Device { device_id, .. } => {
                f.debug_struct("Device").field("device_id", device_id).finish()
            }
        }
    }
}

/// Target-level failure, mapped onto the fault taxonomy by dispatch.
#[derive(Debug)]
pub(crate) enum TargetError {
    /// Access ran past the target's backing window.
    OutOfRange,
    /// Write attempted against a read-only target.
    ReadOnly,
    /// Device handler rejected the access.
    Device(DeviceError),
}

impl From<MemError> for TargetError {
    fn from(_: MemError) -> Self {
        Self::OutOfRange
    }
}

impl BusTarget {
    /// Device id reported in fault records; [`crate::fault::NO_DEVICE`] for
    /// memory-backed targets.
    #[must_use]
    pub const fn device_id(&self) -> i32 {
        match self {
            Self::Ram(_) | Self::Rom(_) => crate::fault::NO_DEVICE,
            Self::Device { device_id, .. } => *device_id,
        }
    }

    pub(crate) fn read_byte(&mut self, offset: Addr, cycle: u64) -> Result<u8, TargetError> {
        match self {
            Self::Ram(view) | Self::Rom(view) => Ok(view.read_byte(offset as usize)?),
            Self::Device { handler, .. } => handler
                .borrow_mut()
                .read(offset, cycle)
                .map_err(TargetError::Device),
        }
    }

    pub(crate) fn write_byte(&mut self, offset: Addr, value: u8, cycle: u64) -> Result<(), TargetError> {
        match self {
            Self::Ram(view) => Ok(view.write_byte(offset as usize, value)?),
            Self::Rom(_) => Err(TargetError::ReadOnly),
            Self::Device { handler, .. } => handler
                .borrow_mut()
                .write(offset, value, cycle)
                .map_err(TargetError::Device),
        }
    }

    pub(crate) fn read_wide(
        &mut self,
        offset: Addr,
        width: AccessWidth,
        cycle: u64,
    ) -> Result<u32, TargetError> {
        match self {
            Self::Ram(view) | Self::Rom(view) => {
                let mut buf = [0_u8; 4];
                view.read(offset as usize, &mut buf[..width.byte_len()])?;
                Ok(u32::from_le_bytes(buf))
            }
            Self::Device { handler, .. } => handler
                .borrow_mut()
                .read_wide(offset, width, cycle)
                .map_err(TargetError::Device),
        }
    }

    pub(crate) fn write_wide(
        &mut self,
        offset: Addr,
        value: u32,
        width: AccessWidth,
        cycle: u64,
    ) -> Result<(), TargetError> {
        match self {
            Self::Ram(view) => {
                let bytes = value.to_le_bytes();
                Ok(view.write(offset as usize, &bytes[..width.byte_len()])?)
            }
            Self::Rom(_) => Err(TargetError::ReadOnly),
            Self::Device { handler, .. } => handler
                .borrow_mut()
                .write_wide(offset, value, width, cycle)
                .map_err(TargetError::Device),
        }
    }

    pub(crate) fn peek_byte(&self, offset: Addr) -> Option<u8> {
        match self {
            Self::Ram(view) | Self::Rom(view) => view.read_byte(offset as usize).ok(),
            Self::Device { handler, .. } => handler.borrow().peek(offset),
        }
    }
}

/// Errors from region construction and mapping-table mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    /// A structural argument (id, name, size, base) was invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A region with the same id already exists in the target layer.
    #[error("region id {id:?} already mapped in layer {layer:?}")]
    DuplicateId {
        /// Layer the duplicate was found in.
        layer: String,
        /// Offending region id.
        id: String,
    },
    /// The named layer is not registered.
    #[error("unknown mapping layer {0:?}")]
    UnknownLayer(String),
    /// A layer with the same name is already registered.
    #[error("mapping layer {0:?} already registered")]
    DuplicateLayer(String),
    /// No mapped region carries the given id.
    #[error("unknown region id {0:?}")]
    UnknownRegion(String),
}

/// Immutable description of one mappable range of address space.
#[derive(Debug)]
pub struct MemoryRegion {
    /// Unique id within its layer.
    pub id: String,
    /// Human-readable name for diagnostics.
    pub name: String,
    /// Base address the region asks to be mapped at.
    pub preferred_base: Addr,
    /// Range length in bytes.
    pub size: u32,
    /// Classification carried into fault records.
    pub tag: RegionTag,
    /// Backing capability; owned by the region.
    pub target: BusTarget,
    /// Default access rights enforced by dispatch.
    pub default_perms: PagePerms,
    /// Declared target capabilities.
    pub capabilities: TargetCaps,
    /// True when the region may be mapped away from its preferred base.
    pub is_relocatable: bool,
    /// True when overlay layers may shadow this region.
    pub supports_overlay: bool,
    /// Tie-break priority among regions of one layer; higher wins.
    pub priority: i32,
}

impl MemoryRegion {
    /// Builds a region after validating its structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidArgument`] for an empty id or name, or a
    /// zero size.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: &str,
        name: &str,
        preferred_base: Addr,
        size: u32,
        tag: RegionTag,
        target: BusTarget,
        default_perms: PagePerms,
        capabilities: TargetCaps,
    ) -> Result<Self, MapError> {
        if id.is_empty() {
            return Err(MapError::InvalidArgument("region id must be non-empty"));
        }
        if name.is_empty() {
            return Err(MapError::InvalidArgument("region name must be non-empty"));
        }
        if size == 0 {
            return Err(MapError::InvalidArgument("region size must be non-zero"));
        }
        Ok(Self {
            id: id.to_owned(),
            name: name.to_owned(),
            preferred_base,
            size,
            tag,
            target,
            default_perms,
            capabilities,
            is_relocatable: true,
            supports_overlay: true,
            priority: 0,
        })
    }

    /// RAM-backed region over the whole of `memory`: read/write/execute,
    /// peekable, wide-capable.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidArgument`] for an empty id/name or an
    /// empty pool.
    pub fn create_ram(
        id: &str,
        name: &str,
        base: Addr,
        memory: &SharedMemory,
    ) -> Result<Self, MapError> {
        let size = pool_size(memory)?;
        Self::new(
            id,
            name,
            base,
            size,
            RegionTag::Ram,
            BusTarget::Ram(MemView::whole(memory)),
            PagePerms::READ | PagePerms::WRITE | PagePerms::EXECUTE,
            TargetCaps::SUPPORTS_PEEK | TargetCaps::SUPPORTS_WIDE,
        )
    }

    /// ROM-backed region over the whole of `memory`: read/execute only, not
    /// relocatable.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidArgument`] for an empty id/name or an
    /// empty pool.
    pub fn create_rom(
        id: &str,
        name: &str,
        base: Addr,
        memory: &SharedMemory,
    ) -> Result<Self, MapError> {
        let size = pool_size(memory)?;
        let mut region = Self::new(
            id,
            name,
            base,
            size,
            RegionTag::Rom,
            BusTarget::Rom(MemView::whole(memory)),
            PagePerms::READ | PagePerms::EXECUTE,
            TargetCaps::SUPPORTS_PEEK | TargetCaps::SUPPORTS_WIDE,
        )?;
        region.is_relocatable = false;
        Ok(region)
    }

    /// Device-routed region with declared capabilities, tagged `Io`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidArgument`] for an empty id/name or a zero
    /// size.
    pub fn create_device(
        id: &str,
        name: &str,
        base: Addr,
        size: u32,
        device_id: i32,
        handler: SharedDevice,
        capabilities: TargetCaps,
    ) -> Result<Self, MapError> {
        Self::new(
            id,
            name,
            base,
            size,
            RegionTag::Io,
            BusTarget::Device { device_id, handler },
            PagePerms::READ | PagePerms::WRITE,
            capabilities,
        )
    }

    /// Returns the region with a different classification tag.
    #[must_use]
    pub const fn with_tag(mut self, tag: RegionTag) -> Self {
        self.tag = tag;
        self
    }

    /// Returns the region with different default permissions.
    #[must_use]
    pub const fn with_perms(mut self, perms: PagePerms) -> Self {
        self.default_perms = perms;
        self
    }

    /// Returns the region with a different tie-break priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// True when `addr` falls inside the region mapped at `base`.
    #[must_use]
    pub fn contains_at(&self, base: Addr, addr: Addr) -> bool {
        addr >= base && u64::from(addr) < u64::from(base) + u64::from(self.size)
    }
}

fn pool_size(memory: &SharedMemory) -> Result<u32, MapError> {
    u32::try_from(memory.borrow().size())
        .map_err(|_| MapError::InvalidArgument("pool size exceeds the address space"))
}
