//! Marking cycle initiation.
//!
//! A request to start a concurrent marking cycle may be raised from any thread at any
//! time (for example by an allocating mutator that noticed old generation occupancy
//! crossing the threshold). The request is only ever consumed by the policy while the
//! world is stopped, at the start of the next pause that is allowed to do initial-mark
//! work.
//!
//! ```text
//!   Idle ──request()──> InitiationRequested ──schedule──> InitialMarkScheduled
//!    ^                        │                                  │
//!    └────── withdraw ────────┘                                  │
//!    └────────────────── initial mark finished / full GC ────────┘
//! ```
use atomic::{Atomic, Ordering};
use crossbeam_utils::CachePadded;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MarkingCycleFlag {
    Idle,
    InitiationRequested,
    InitialMarkScheduled,
}

/// Tri-state flag shared between the policy and any thread that wants marking to start.
pub struct MarkingInitiation {
    flag: CachePadded<Atomic<MarkingCycleFlag>>,
}

impl Default for MarkingInitiation {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkingInitiation {
    pub fn new() -> Self {
        Self {
            flag: CachePadded::new(Atomic::new(MarkingCycleFlag::Idle)),
        }
    }

    pub fn state(&self) -> MarkingCycleFlag {
        self.flag.load(Ordering::Acquire)
    }

    /// Requests that the next eligible pause starts a marking cycle. Returns `true` if this
    /// call raised the request; repeated requests before consumption and requests while
    /// an initial mark is already scheduled are absorbed.
    pub fn request(&self) -> bool {
        self.flag
            .compare_exchange(
                MarkingCycleFlag::Idle,
                MarkingCycleFlag::InitiationRequested,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn is_requested(&self) -> bool {
        self.state() == MarkingCycleFlag::InitiationRequested
    }

    pub fn is_initial_mark_scheduled(&self) -> bool {
        self.state() == MarkingCycleFlag::InitialMarkScheduled
    }

    /// Consumes a pending request and marks the current pause as doing initial-mark work.
    /// A no-op returning `false` when nothing was requested. Safepoint only.
    pub(crate) fn schedule_initial_mark(&self) -> bool {
        self.flag
            .compare_exchange(
                MarkingCycleFlag::InitiationRequested,
                MarkingCycleFlag::InitialMarkScheduled,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Ends the initial-mark work of the current pause. Leaves any other state, in
    /// particular a request raised since, untouched. Safepoint only.
    pub(crate) fn complete_initial_mark(&self) -> bool {
        self.flag
            .compare_exchange(
                MarkingCycleFlag::InitialMarkScheduled,
                MarkingCycleFlag::Idle,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Drops a pending request without scheduling anything. Safepoint only.
    pub(crate) fn withdraw_request(&self) -> bool {
        self.flag
            .compare_exchange(
                MarkingCycleFlag::InitiationRequested,
                MarkingCycleFlag::Idle,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
