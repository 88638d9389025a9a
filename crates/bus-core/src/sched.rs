//! Deterministic cycle-driven event scheduler.
//!
//! A single authoritative cycle counter and a queue ordered by
//! `(target cycle, insertion sequence)`. The total order is what makes
//! replay deterministic: given the same scheduling calls and the same
//! `advance` calls, callbacks execute in bit-for-bit identical order.
//!
//! Execution is single-threaded and cooperative. Re-entrant scheduling
//! during a callback goes through the same queue and is drained to
//! completion inside `advance`, so same-cycle chaining has bounded,
//! auditable depth instead of recursive calls.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;

use thiserror::Error;

use crate::bus::RegionManager;
use crate::signal::SignalBus;

/// Errors from scheduling API misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SchedError {
    /// `advance` was called with a negative delta.
    #[error("advance delta must be non-negative")]
    InvalidArgument,
}

/// Classification of a scheduled event for queue diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum EventKind {
    /// Device callback.
    Device,
    /// Free-running timer.
    Timer,
    /// DMA engine activity.
    Dma,
    /// Debug/tooling hook.
    Debug,
}

/// Handle identifying one pending event for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u64);

/// One-shot callback invoked with the event context.
pub type EventCallback = Box<dyn FnMut(&mut EventContext<'_>)>;

/// Periodic actor driven by the scheduler.
///
/// The scheduler re-enqueues the actor automatically when `execute` returns
/// a nonzero cycle count; returning 0 stops automatic rescheduling.
pub trait PeriodicActor {
    /// Runs the actor at `cycle`; returns cycles until the next run.
    fn execute(&mut self, cycle: u64, ctx: &mut EventContext<'_>) -> u64;
}

/// Shared handle to a periodic actor.
pub type SharedActor = Rc<RefCell<dyn PeriodicActor>>;

enum EventPayload {
    Callback(EventCallback),
    Actor(SharedActor),
}

struct Event {
    cycle: u64,
    seq: u64,
    id: u64,
    kind: EventKind,
    source_id: u32,
    tag: String,
    payload: EventPayload,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cycle == other.cycle && self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest (cycle, seq)
        // pops first.
        (other.cycle, other.seq).cmp(&(self.cycle, self.seq))
    }
}

/// Cycle-ordered event queue owning the authoritative "now".
pub struct Scheduler {
    now: u64,
    next_seq: u64,
    next_id: u64,
    queue: BinaryHeap<Event>,
    live: HashSet<u64>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now)
            .field("pending", &self.live.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates an empty scheduler at cycle 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            next_id: 0,
            queue: BinaryHeap::new(),
            live: HashSet::new(),
        }
    }

    /// Authoritative current cycle.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.now
    }

    /// Number of pending (not yet executed or cancelled) events.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.live.len()
    }

    fn push(
        &mut self,
        cycle: u64,
        kind: EventKind,
        source_id: u32,
        tag: String,
        payload: EventPayload,
    ) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        let id = self.next_id;
        self.next_id += 1;
        self.live.insert(id);
        self.queue.push(Event {
            cycle,
            seq,
            id,
            kind,
            source_id,
            tag,
            payload,
        });
        EventHandle(id)
    }

    /// Enqueues a one-shot callback at an absolute cycle.
    ///
    /// A cycle at or before `now` fires during the next `advance` call. The
    /// callback reschedules itself through its [`EventContext`] if periodic
    /// behavior is desired.
    pub fn schedule_at(
        &mut self,
        cycle: u64,
        kind: EventKind,
        source_id: u32,
        callback: EventCallback,
        tag: &str,
    ) -> EventHandle {
        self.push(
            cycle,
            kind,
            source_id,
            tag.to_owned(),
            EventPayload::Callback(callback),
        )
    }

    /// Enqueues a periodic actor to first run `delta` cycles from now.
    ///
    /// After each run the actor is re-enqueued its returned cycle count
    /// after its due cycle; a return of 0 stops automatic rescheduling.
    pub fn schedule_after(&mut self, actor: SharedActor, delta: u64) -> EventHandle {
        self.push(
            self.now + delta,
            EventKind::Timer,
            0,
            "periodic-actor".to_owned(),
            EventPayload::Actor(actor),
        )
    }

    /// Withdraws a pending event.
    ///
    /// Cancelling an already-executed or already-cancelled handle is a
    /// no-op, not an error.
    pub fn cancel(&mut self, handle: EventHandle) {
        self.live.remove(&handle.0);
    }

    /// Advances `now` by `delta`, then pops and executes every pending
    /// event due at or before the new cycle, in `(cycle, seq)` order.
    ///
    /// Callbacks run synchronously and may schedule new events, including
    /// at the current cycle; those are processed within this same call.
    /// Returns the number of events executed.
    ///
    /// # Errors
    ///
    /// Returns [`SchedError::InvalidArgument`] for a negative delta.
    pub fn advance(
        &mut self,
        delta: i64,
        bus: &mut RegionManager,
        signals: &mut SignalBus,
    ) -> Result<u64, SchedError> {
        let delta = u64::try_from(delta).map_err(|_| SchedError::InvalidArgument)?;
        self.now += delta;

        let mut executed = 0;
        loop {
            let due = self
                .queue
                .peek()
                .is_some_and(|event| event.cycle <= self.now);
            if !due {
                break;
            }
            let Some(event) = self.queue.pop() else {
                break;
            };
            if !self.live.remove(&event.id) {
                // Cancelled before becoming due.
                continue;
            }
            let Event {
                cycle,
                kind,
                source_id,
                tag,
                payload,
                ..
            } = event;
            executed += 1;
            match payload {
                EventPayload::Callback(mut callback) => {
                    let mut ctx = EventContext {
                        scheduler: self,
                        bus,
                        signals,
                        due_cycle: cycle,
                        kind,
                        source_id,
                        tag: &tag,
                    };
                    callback(&mut ctx);
                }
                EventPayload::Actor(actor) => {
                    let next = {
                        let mut ctx = EventContext {
                            scheduler: self,
                            bus,
                            signals,
                            due_cycle: cycle,
                            kind,
                            source_id,
                            tag: &tag,
                        };
                        actor.borrow_mut().execute(cycle, &mut ctx)
                    };
                    if next > 0 {
                        self.push(
                            cycle + next,
                            kind,
                            source_id,
                            tag,
                            EventPayload::Actor(actor),
                        );
                    }
                }
            }
        }
        Ok(executed)
    }
}

/// Callback-side view of the machine, valid only for one invocation.
///
/// Bundles the scheduler (for rescheduling), the signal bus (for interrupt
/// delivery), and the bus (for device-initiated memory access).
pub struct EventContext<'a> {
    scheduler: &'a mut Scheduler,
    /// Bus available for device-initiated memory access.
    pub bus: &'a mut RegionManager,
    /// Signal lines for asserting and deasserting control lines.
    pub signals: &'a mut SignalBus,
    due_cycle: u64,
    kind: EventKind,
    source_id: u32,
    tag: &'a str,
}

impl EventContext<'_> {
    /// Authoritative current cycle (post-advance).
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.scheduler.now
    }

    /// Cycle the running event was due at.
    #[must_use]
    pub const fn due_cycle(&self) -> u64 {
        self.due_cycle
    }

    /// Classification of the running event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Source id the running event was scheduled with.
    #[must_use]
    pub const fn source_id(&self) -> u32 {
        self.source_id
    }

    /// Diagnostic tag the running event was scheduled with.
    #[must_use]
    pub const fn tag(&self) -> &str {
        self.tag
    }

    /// Schedules a one-shot callback at an absolute cycle.
    pub fn schedule_at(
        &mut self,
        cycle: u64,
        kind: EventKind,
        source_id: u32,
        callback: EventCallback,
        tag: &str,
    ) -> EventHandle {
        self.scheduler.schedule_at(cycle, kind, source_id, callback, tag)
    }

    /// Schedules a periodic actor relative to now.
    pub fn schedule_after(&mut self, actor: SharedActor, delta: u64) -> EventHandle {
        self.scheduler.schedule_after(actor, delta)
    }

    /// Withdraws a pending event; no-op for spent handles.
    pub fn cancel(&mut self, handle: EventHandle) {
        self.scheduler.cancel(handle);
    }
}
