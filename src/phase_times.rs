/// Measurements of the current pause, filled in by the collector while it runs.
///
/// Reset by [`Policy::note_gc_start`](crate::policy::Policy::note_gc_start) and consumed by
/// [`Policy::record_collection_pause_end`](crate::policy::Policy::record_collection_pause_end).
/// Times are averages over the parallel workers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhaseTimes {
    pub cur_collection_start_sec: f64,
    /// Time spent in parallel phases.
    pub par_time_ms: f64,

    pub eden_region_length: usize,
    pub survivor_region_length: usize,
    pub old_region_length: usize,

    /// Remembered set entries of the collection set when the pause started.
    pub rs_length: usize,
    /// What the collection set builder predicted for `rs_length`.
    pub recorded_rs_length: usize,

    pub merge_log_buffers_time_ms: f64,
    pub logged_dirty_cards: usize,
    pub merge_hcc_time_ms: f64,
    pub merge_remset_time_ms: f64,
    pub scan_heap_roots_time_ms: f64,
    /// Cards scanned while scanning heap roots, including those from log buffers.
    pub scanned_cards: usize,

    pub obj_copy_time_ms: f64,
    pub copied_bytes: usize,

    pub young_other_time_ms: f64,
    pub non_young_other_time_ms: f64,
}

impl PhaseTimes {
    pub fn note_gc_start(&mut self) {
        *self = Self::default();
    }

    pub fn young_region_length(&self) -> usize {
        self.eden_region_length + self.survivor_region_length
    }

    /// Part of the card scanning time caused by cards from log buffers, plus merging them.
    pub fn logged_cards_processing_time_ms(&self) -> f64 {
        if self.scanned_cards == 0 || self.logged_dirty_cards > self.scanned_cards {
            // Duplicates across buffers can make the logged count exceed the scanned one.
            return self.scan_heap_roots_time_ms + self.merge_log_buffers_time_ms;
        }
        self.scan_heap_roots_time_ms * self.logged_dirty_cards as f64 / self.scanned_cards as f64
            + self.merge_log_buffers_time_ms
    }

    /// Cards scanned because of remembered sets rather than log buffers.
    pub fn remset_cards_scanned(&self) -> usize {
        self.scanned_cards.saturating_sub(self.logged_dirty_cards)
    }

    /// Remembered set scanning and merging time attributable to remembered set cards.
    pub fn remset_scan_time_ms(&self) -> f64 {
        if self.scanned_cards == 0 {
            return self.merge_remset_time_ms;
        }
        self.scan_heap_roots_time_ms * self.remset_cards_scanned() as f64
            / self.scanned_cards as f64
            + self.merge_remset_time_ms
    }

    pub fn other_time_ms(&self, pause_time_ms: f64) -> f64 {
        (pause_time_ms - self.par_time_ms).max(0.0)
    }

    pub fn constant_other_time_ms(&self, pause_time_ms: f64) -> f64 {
        (self.other_time_ms(pause_time_ms) - self.young_other_time_ms - self.non_young_other_time_ms)
            .max(0.0)
    }

    pub fn print(&self, pause_time_ms: f64) {
        log::debug!(
            target: "gc::phases",
            "Pause {:.3}ms: parallel {:.3}ms, other {:.3}ms",
            pause_time_ms,
            self.par_time_ms,
            self.other_time_ms(pause_time_ms)
        );
        log::trace!(
            target: "gc::phases",
            "  Merge log buffers {:.3}ms ({} cards), merge HCC {:.3}ms, merge remembered sets {:.3}ms",
            self.merge_log_buffers_time_ms,
            self.logged_dirty_cards,
            self.merge_hcc_time_ms,
            self.merge_remset_time_ms
        );
        log::trace!(
            target: "gc::phases",
            "  Scan heap roots {:.3}ms ({} cards), object copy {:.3}ms ({} bytes)",
            self.scan_heap_roots_time_ms,
            self.scanned_cards,
            self.obj_copy_time_ms,
            self.copied_bytes
        );
        log::trace!(
            target: "gc::phases",
            "  Collection set: eden {}, survivor {}, old {}; young other {:.3}ms, non-young other {:.3}ms",
            self.eden_region_length,
            self.survivor_region_length,
            self.old_region_length,
            self.young_other_time_ms,
            self.non_young_other_time_ms
        );
    }
}
