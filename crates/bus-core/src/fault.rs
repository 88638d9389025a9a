//! Fault taxonomy and structured dispatch outcomes.
//!
//! A [`BusFault`] is never a hard failure: every dispatch call returns one,
//! with [`FaultKind::None`] meaning success. Per-kind policy (machine
//! exception, NMI, retry) belongs to the CPU core, outside this crate.

use std::collections::VecDeque;

use thiserror::Error;

use crate::access::{AccessIntent, AccessWidth, Addr, BusAccess, CpuMode};

/// Outcome classification for one dispatched access.
///
/// Numeric values are stable for wire/debug compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum FaultKind {
    /// Successful access.
    #[default]
    #[error("no fault")]
    None = 0,
    /// No region in any active layer covers the address.
    #[error("address is not mapped by any active region")]
    Unmapped = 1,
    /// Region permissions exclude the requested data access.
    #[error("region permissions deny the access")]
    Permission = 2,
    /// Wide access to an alignment-requiring region at an unaligned address.
    #[error("unaligned wide access to an alignment-requiring region")]
    Misaligned = 3,
    /// Instruction fetch from a region without execute rights.
    #[error("instruction fetch from a non-executable region")]
    NoExecute = 4,
    /// Failure surfaced from a device's own handler.
    #[error("device handler reported a fault")]
    Device = 5,
}

/// Number of defined fault kinds, including `None`.
pub const FAULT_KIND_COUNT: usize = 6;

impl FaultKind {
    /// All defined kinds in stable numeric order.
    pub const ALL: [Self; FAULT_KIND_COUNT] = [
        Self::None,
        Self::Unmapped,
        Self::Permission,
        Self::Misaligned,
        Self::NoExecute,
        Self::Device,
    ];

    /// Stable numeric encoding.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a stable numeric value back into a kind.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Unmapped),
            2 => Some(Self::Permission),
            3 => Some(Self::Misaligned),
            4 => Some(Self::NoExecute),
            5 => Some(Self::Device),
            _ => None,
        }
    }
}

/// Region classification carried by mappings and fault records.
///
/// Numeric values are stable for wire/debug compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum RegionTag {
    /// Classification unknown or not yet assigned.
    #[default]
    Unknown = 0,
    /// General-purpose RAM.
    Ram = 1,
    /// Read/execute-only ROM.
    Rom = 2,
    /// Device I/O window.
    Io = 3,
    /// Expansion-slot window.
    Slot = 4,
    /// Shadow/overlay alias of another region.
    Shadow = 5,
    /// Placeholder for unmapped space in fault records.
    Unmapped = 6,
    /// Video memory.
    Video = 7,
    /// Zero page.
    ZeroPage = 8,
    /// Hardware stack.
    Stack = 9,
}

impl RegionTag {
    /// Stable numeric encoding.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a stable numeric value back into a tag.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Ram),
            2 => Some(Self::Rom),
            3 => Some(Self::Io),
            4 => Some(Self::Slot),
            5 => Some(Self::Shadow),
            6 => Some(Self::Unmapped),
            7 => Some(Self::Video),
            8 => Some(Self::ZeroPage),
            9 => Some(Self::Stack),
            _ => None,
        }
    }
}

/// Sentinel device id meaning "no device involved".
pub const NO_DEVICE: i32 = -1;

/// Structured outcome of one bus dispatch.
///
/// Transient value type; produced per access, never stored by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusFault {
    /// Outcome classification; [`FaultKind::None`] means success.
    pub kind: FaultKind,
    /// Address the access targeted.
    pub addr: Addr,
    /// Width of the access.
    pub width: AccessWidth,
    /// Purpose of the access.
    pub intent: AccessIntent,
    /// Processor mode at access time.
    pub cpu_mode: CpuMode,
    /// Initiating CPU/DMA source.
    pub source_id: u32,
    /// Device involved, or [`NO_DEVICE`].
    pub device_id: i32,
    /// Classification of the resolved region.
    pub region_tag: RegionTag,
    /// Cycle at which the access was issued.
    pub cycle: u64,
}

impl BusFault {
    /// Builds an outcome of `kind` for `access` against the resolved region.
    #[must_use]
    pub const fn with_kind(
        kind: FaultKind,
        access: &BusAccess,
        device_id: i32,
        region_tag: RegionTag,
    ) -> Self {
        Self {
            kind,
            addr: access.addr,
            width: access.width,
            intent: access.intent,
            cpu_mode: access.cpu_mode,
            source_id: access.source_id,
            device_id,
            region_tag,
            cycle: access.cycle,
        }
    }

    /// Builds the success outcome for `access`.
    #[must_use]
    pub const fn success(access: &BusAccess, device_id: i32, region_tag: RegionTag) -> Self {
        Self::with_kind(FaultKind::None, access, device_id, region_tag)
    }

    /// Builds the unmapped-address outcome for `access`.
    #[must_use]
    pub const fn unmapped(access: &BusAccess) -> Self {
        Self::with_kind(FaultKind::Unmapped, access, NO_DEVICE, RegionTag::Unmapped)
    }

    /// True when the access succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.kind, FaultKind::None)
    }

    /// True when the access faulted; always the inverse of success.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        !self.is_success()
    }

    /// True for the no-execute fault specifically.
    #[must_use]
    pub const fn is_nx_fault(&self) -> bool {
        matches!(self.kind, FaultKind::NoExecute)
    }
}

/// Bounded ring of the most recent non-success faults plus per-kind counters.
///
/// Fills the role of a diagnostics window: inspection tooling reads it,
/// nothing in the dispatch path depends on it.
#[derive(Debug, Clone)]
pub struct FaultLog {
    capacity: usize,
    entries: VecDeque<BusFault>,
    counts: [u64; FAULT_KIND_COUNT],
}

impl FaultLog {
    /// Creates a log retaining at most `capacity` fault records.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
            counts: [0; FAULT_KIND_COUNT],
        }
    }

    /// Records `fault` if it is not a success outcome; oldest entry drops
    /// first once capacity is reached.
    pub fn record(&mut self, fault: &BusFault) {
        if fault.is_success() {
            return;
        }
        self.counts[usize::from(fault.kind.as_u8())] += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        if self.capacity > 0 {
            self.entries.push_back(*fault);
        }
    }

    /// Retained fault records, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &BusFault> {
        self.entries.iter()
    }

    /// Number of retained records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no fault has been retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of recorded faults of `kind`, independent of retention.
    #[must_use]
    pub fn count(&self, kind: FaultKind) -> u64 {
        self.counts[usize::from(kind.as_u8())]
    }

    /// Clears retained records and counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.counts = [0; FAULT_KIND_COUNT];
    }
}
