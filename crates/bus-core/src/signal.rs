//! Wired-OR control lines shared between device callbacks and the CPU core.
//!
//! Single-writer discipline: lines are mutated only from inside scheduler
//! callbacks, and the CPU core reads between scheduler ticks. The core is
//! single-threaded, so no locking is involved; the discipline is about
//! ordering, not data races.

use std::collections::BTreeSet;

/// Discrete control lines polled by the CPU core between instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SignalLine {
    /// Maskable interrupt request.
    Irq,
    /// Non-maskable interrupt.
    Nmi,
    /// Machine reset.
    Reset,
    /// Ready/halt line.
    Rdy,
    /// DMA request.
    DmaReq,
    /// Bus enable.
    BusEnable,
}

/// Number of defined signal lines.
pub const SIGNAL_LINE_COUNT: usize = 6;

impl SignalLine {
    /// All defined lines in declaration order.
    pub const ALL: [Self; SIGNAL_LINE_COUNT] = [
        Self::Irq,
        Self::Nmi,
        Self::Reset,
        Self::Rdy,
        Self::DmaReq,
        Self::BusEnable,
    ];

    const fn index(self) -> usize {
        match self {
            Self::Irq => 0,
            Self::Nmi => 1,
            Self::Reset => 2,
            Self::Rdy => 3,
            Self::DmaReq => 4,
            Self::BusEnable => 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
struct LineState {
    sources: BTreeSet<u32>,
    last_change: u64,
}

/// Process-wide wired-OR signal lines.
///
/// A line reads asserted while at least one source asserts it and clears
/// only once every source has deasserted.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SignalBus {
    lines: [LineState; SIGNAL_LINE_COUNT],
}

impl SignalBus {
    /// Creates a bus with every line deasserted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `source_id` to the asserting set of `line`.
    ///
    /// The last-change cycle updates only when the line's membership
    /// actually changes; re-asserting is a no-op.
    pub fn assert_line(&mut self, line: SignalLine, source_id: u32, cycle: u64) {
        let state = &mut self.lines[line.index()];
        if state.sources.insert(source_id) {
            state.last_change = cycle;
        }
    }

    /// Removes `source_id` from the asserting set of `line`.
    ///
    /// Deasserting a source that is not asserting is a no-op.
    pub fn deassert_line(&mut self, line: SignalLine, source_id: u32, cycle: u64) {
        let state = &mut self.lines[line.index()];
        if state.sources.remove(&source_id) {
            state.last_change = cycle;
        }
    }

    /// True while at least one source asserts `line`.
    #[must_use]
    pub fn is_asserted(&self, line: SignalLine) -> bool {
        !self.lines[line.index()].sources.is_empty()
    }

    /// Sources currently asserting `line`, in ascending id order.
    pub fn asserting_sources(&self, line: SignalLine) -> impl Iterator<Item = u32> + '_ {
        self.lines[line.index()].sources.iter().copied()
    }

    /// Cycle of the most recent membership change on `line`.
    #[must_use]
    pub fn last_change_cycle(&self, line: SignalLine) -> u64 {
        self.lines[line.index()].last_change
    }
}
