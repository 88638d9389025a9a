//! Access-description value types exchanged between bus callers and dispatch.

use bitflags::bitflags;

/// Machine address within the flat 24-bit space.
pub type Addr = u32;

/// Size in bytes of the flat machine address space (16 MiB).
pub const ADDRESS_SPACE_BYTES: usize = 1 << 24;

/// Highest valid machine address.
pub const ADDR_MAX: Addr = 0x00FF_FFFF;

/// Width of one bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// Single-byte access.
    Bits8,
    /// Two-byte access.
    Bits16,
    /// Four-byte access.
    Bits32,
}

impl AccessWidth {
    /// Width in bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::Bits8 => 8,
            Self::Bits16 => 16,
            Self::Bits32 => 32,
        }
    }

    /// Width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
            Self::Bits32 => 4,
        }
    }

    /// Width in bytes as a buffer index bound.
    #[must_use]
    pub const fn byte_len(self) -> usize {
        match self {
            Self::Bits8 => 1,
            Self::Bits16 => 2,
            Self::Bits32 => 4,
        }
    }
}

/// Purpose of an access; exactly one applies per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessIntent {
    /// Operand read.
    DataRead,
    /// Operand write.
    DataWrite,
    /// Opcode/operand fetch on behalf of the instruction stream.
    InstructionFetch,
}

/// Processor privilege context at access time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CpuMode {
    /// Full-width native mode.
    #[default]
    Native,
    /// Legacy compatibility mode.
    Compat,
}

/// Whether a multi-byte access is one transaction or byte-sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BusAccessMode {
    /// Served by a single wide target call when the target allows it.
    #[default]
    Atomic,
    /// Forced byte-sequenced service in ascending address order.
    Decomposed,
}

bitflags! {
    /// Auxiliary access qualifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u8 {
        /// Access originates from debug tooling, not the running machine.
        const DEBUG_ORIGIN = 1 << 0;
    }
}

/// One attempted bus access, built by the CPU or a DMA engine.
///
/// Immutable once built; the wither methods return an updated copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusAccess {
    /// Target machine address.
    pub addr: Addr,
    /// Outgoing value for writes; ignored for reads and fetches.
    pub value: u32,
    /// Transaction width.
    pub width: AccessWidth,
    /// Atomic or decomposed service.
    pub mode: BusAccessMode,
    /// Processor privilege context.
    pub cpu_mode: CpuMode,
    /// Access purpose.
    pub intent: AccessIntent,
    /// Identifier of the initiating CPU/DMA source.
    pub source_id: u32,
    /// Cycle at which the access is issued.
    pub cycle: u64,
    /// Auxiliary qualifiers.
    pub flags: AccessFlags,
}

impl BusAccess {
    const fn base(addr: Addr, intent: AccessIntent, width: AccessWidth) -> Self {
        Self {
            addr,
            value: 0,
            width,
            mode: BusAccessMode::Atomic,
            cpu_mode: CpuMode::Native,
            intent,
            source_id: 0,
            cycle: 0,
            flags: AccessFlags::empty(),
        }
    }

    /// Builds a data read at `addr`.
    #[must_use]
    pub const fn read(addr: Addr, width: AccessWidth) -> Self {
        Self::base(addr, AccessIntent::DataRead, width)
    }

    /// Builds a data write of `value` at `addr`.
    #[must_use]
    pub const fn write(addr: Addr, value: u32, width: AccessWidth) -> Self {
        let mut access = Self::base(addr, AccessIntent::DataWrite, width);
        access.value = value;
        access
    }

    /// Builds an instruction fetch at `addr`.
    #[must_use]
    pub const fn fetch(addr: Addr, width: AccessWidth) -> Self {
        Self::base(addr, AccessIntent::InstructionFetch, width)
    }

    /// Returns the access with a different service mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: BusAccessMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns the access with a different processor mode.
    #[must_use]
    pub const fn with_cpu_mode(mut self, cpu_mode: CpuMode) -> Self {
        self.cpu_mode = cpu_mode;
        self
    }

    /// Returns the access attributed to `source_id`.
    #[must_use]
    pub const fn with_source(mut self, source_id: u32) -> Self {
        self.source_id = source_id;
        self
    }

    /// Returns the access stamped with an issue cycle.
    #[must_use]
    pub const fn at_cycle(mut self, cycle: u64) -> Self {
        self.cycle = cycle;
        self
    }

    /// Returns the access with auxiliary qualifiers set.
    #[must_use]
    pub const fn with_flags(mut self, flags: AccessFlags) -> Self {
        self.flags = flags;
        self
    }
}
