use std::sync::Arc;

use crate::marking::MarkingInitiation;

/// Phase flags of the collector as seen by the policy.
///
/// The young-only phase runs young collections until marking completes and finds enough
/// reclaimable old regions. One more young collection (the "last young" one) follows, then
/// mixed collections run until the candidates are exhausted, and the cycle starts over.
pub struct CollectorState {
    in_young_only_phase: bool,
    in_young_gc_before_mixed: bool,
    mark_or_rebuild_in_progress: bool,
    clearing_next_bitmap: bool,
    in_full_gc: bool,
    marking: Arc<MarkingInitiation>,
}

impl Default for CollectorState {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorState {
    pub fn new() -> Self {
        Self {
            in_young_only_phase: true,
            in_young_gc_before_mixed: false,
            mark_or_rebuild_in_progress: false,
            clearing_next_bitmap: false,
            in_full_gc: false,
            marking: Arc::new(MarkingInitiation::new()),
        }
    }

    pub fn in_young_only_phase(&self) -> bool {
        self.in_young_only_phase
    }

    pub fn set_in_young_only_phase(&mut self, value: bool) {
        self.in_young_only_phase = value;
    }

    pub fn in_young_gc_before_mixed(&self) -> bool {
        self.in_young_gc_before_mixed
    }

    pub fn set_in_young_gc_before_mixed(&mut self, value: bool) {
        self.in_young_gc_before_mixed = value;
    }

    pub fn in_mixed_phase(&self) -> bool {
        !self.in_young_only_phase && !self.in_young_gc_before_mixed
    }

    pub fn mark_or_rebuild_in_progress(&self) -> bool {
        self.mark_or_rebuild_in_progress
    }

    pub fn set_mark_or_rebuild_in_progress(&mut self, value: bool) {
        self.mark_or_rebuild_in_progress = value;
    }

    pub fn clearing_next_bitmap(&self) -> bool {
        self.clearing_next_bitmap
    }

    pub fn set_clearing_next_bitmap(&mut self, value: bool) {
        self.clearing_next_bitmap = value;
    }

    pub fn in_full_gc(&self) -> bool {
        self.in_full_gc
    }

    pub fn set_in_full_gc(&mut self, value: bool) {
        self.in_full_gc = value;
    }

    /// Whether the current pause performs initial-mark work.
    pub fn in_initial_mark_gc(&self) -> bool {
        self.marking.is_initial_mark_scheduled()
    }

    /// Whether a marking cycle has been requested but not yet started.
    pub fn initiate_conc_mark_if_possible(&self) -> bool {
        self.marking.is_requested()
    }

    pub fn marking(&self) -> &MarkingInitiation {
        &self.marking
    }

    /// Handle that other threads may use to request a marking cycle.
    pub fn marking_handle(&self) -> Arc<MarkingInitiation> {
        self.marking.clone()
    }
}
