use crate::collector_state::CollectorState;

/// The kind of a stop-the-world pause.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum PauseKind {
    Full,
    YoungOnly,
    Mixed,
    /// Young collection right before the first mixed collection of a cycle.
    LastYoung,
    /// Young collection that also starts a concurrent marking cycle.
    InitialMark,
    Cleanup,
    Remark,
}

impl PauseKind {
    pub const COUNT: usize = 7;

    pub const ALL: [PauseKind; PauseKind::COUNT] = [
        PauseKind::Full,
        PauseKind::YoungOnly,
        PauseKind::Mixed,
        PauseKind::LastYoung,
        PauseKind::InitialMark,
        PauseKind::Cleanup,
        PauseKind::Remark,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PauseKind::Full => "Pause Full",
            PauseKind::YoungOnly => "Pause Young (Normal)",
            PauseKind::Mixed => "Pause Young (Mixed)",
            PauseKind::LastYoung => "Pause Young (Prepare Mixed)",
            PauseKind::InitialMark => "Pause Young (Concurrent Start)",
            PauseKind::Cleanup => "Pause Cleanup",
            PauseKind::Remark => "Pause Remark",
        }
    }

    /// Classifies an evacuation pause from the collector state at its end.
    pub fn of_young_pause(state: &CollectorState) -> PauseKind {
        assert!(
            !state.in_full_gc(),
            "full collections are not evacuation pauses"
        );
        if state.in_initial_mark_gc() {
            debug_assert!(!state.in_young_gc_before_mixed());
            PauseKind::InitialMark
        } else if state.in_young_gc_before_mixed() {
            PauseKind::LastYoung
        } else if state.in_mixed_phase() {
            PauseKind::Mixed
        } else {
            PauseKind::YoungOnly
        }
    }
}

impl std::fmt::Display for PauseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single pause, folded into the analytics when the pause ends.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PauseRecord {
    pub kind: PauseKind,
    pub start_sec: f64,
    pub end_sec: f64,
}

impl PauseRecord {
    pub fn new(kind: PauseKind, start_sec: f64, end_sec: f64) -> Self {
        assert!(
            end_sec >= start_sec,
            "pause ends ({}) before it starts ({})",
            end_sec,
            start_sec
        );
        Self {
            kind,
            start_sec,
            end_sec,
        }
    }

    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    pub fn duration_ms(&self) -> f64 {
        self.duration_sec() * 1000.0
    }
}

/// Measures the mutator time between the end of an initial-mark pause and the start of the
/// first mixed pause. Pauses in between are subtracted so that the result approximates how
/// long concurrent marking took.
#[derive(Clone, Debug)]
pub struct InitialMarkToMixedTracker {
    active: bool,
    initial_mark_end_sec: f64,
    mixed_start_sec: f64,
    total_pause_sec: f64,
}

impl Default for InitialMarkToMixedTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InitialMarkToMixedTracker {
    pub fn new() -> Self {
        Self {
            active: false,
            initial_mark_end_sec: -1.0,
            mixed_start_sec: -1.0,
            total_pause_sec: 0.0,
        }
    }

    /// Forgets everything, including a finished measurement.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn record_initial_mark_end(&mut self, end_sec: f64) {
        assert!(!self.active, "initial mark recorded twice in a row");
        self.initial_mark_end_sec = end_sec;
        self.active = true;
    }

    pub fn record_mixed_gc_start(&mut self, start_sec: f64) {
        if self.active {
            self.mixed_start_sec = start_sec;
            self.active = false;
        }
    }

    pub fn add_pause(&mut self, duration_sec: f64) {
        if self.active {
            self.total_pause_sec += duration_sec;
        }
    }

    pub fn has_result(&self) -> bool {
        self.mixed_start_sec > 0.0 && self.initial_mark_end_sec > 0.0
    }

    /// Marking time in seconds. Only meaningful if [`has_result`](Self::has_result).
    pub fn last_marking_time(&self) -> f64 {
        assert!(self.has_result(), "no marking length measured yet");
        (self.mixed_start_sec - self.initial_mark_end_sec) - self.total_pause_sec
    }
}
