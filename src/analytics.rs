//! Cumulative pause statistics and the cost model built from them.
//!
//! Everything the policy predicts is derived from recent history kept here; there is no
//! other source of truth.
use crate::{
    pause::{PauseKind, PauseRecord},
    predictor::Predictions,
    seq::{TruncatedSeq, DEFAULT_SEQ_LENGTH},
};

/// Number of previous pauses considered for pause time ratios.
pub const NUM_PREV_PAUSES_FOR_HEURISTICS: usize = 10;

// Initial estimates, indexed by `min(parallel_gc_threads - 1, 7)`.
const RS_LENGTH_DIFF_DEFAULTS: [f64; 8] = [0.0; 8];
const COST_PER_LOGGED_CARD_MS_DEFAULTS: [f64; 8] =
    [0.01, 0.005, 0.005, 0.003, 0.003, 0.002, 0.002, 0.0015];
const YOUNG_CARDS_PER_ENTRY_RATIO_DEFAULTS: [f64; 8] = [1.0; 8];
const YOUNG_ONLY_COST_PER_REMSET_CARD_MS_DEFAULTS: [f64; 8] =
    [0.015, 0.01, 0.01, 0.008, 0.008, 0.0055, 0.0055, 0.005];
const COST_PER_BYTE_MS_DEFAULTS: [f64; 8] = [
    0.00006, 0.00003, 0.00003, 0.000015, 0.000015, 0.00001, 0.00001, 0.000009,
];
const CONSTANT_OTHER_TIME_MS_DEFAULTS: [f64; 8] = [5.0; 8];
const YOUNG_OTHER_COST_PER_REGION_MS_DEFAULTS: [f64; 8] =
    [0.3, 0.2, 0.2, 0.15, 0.15, 0.12, 0.12, 0.1];
const NON_YOUNG_OTHER_COST_PER_REGION_MS_DEFAULTS: [f64; 8] =
    [1.0, 0.7, 0.7, 0.5, 0.5, 0.42, 0.42, 0.30];

/// Running totals for one [`PauseKind`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PauseTotals {
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
}

impl PauseTotals {
    pub fn avg_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

pub struct Analytics {
    predictions: Predictions,

    recent_gc_times_ms: TruncatedSeq,
    concurrent_mark_remark_times_ms: TruncatedSeq,
    concurrent_mark_cleanup_times_ms: TruncatedSeq,

    alloc_rate_ms_seq: TruncatedSeq,
    prev_collection_pause_end_ms: f64,

    rs_length_diff_seq: TruncatedSeq,
    concurrent_refine_rate_ms_seq: TruncatedSeq,
    logged_cards_rate_ms_seq: TruncatedSeq,
    cost_per_logged_card_ms_seq: TruncatedSeq,
    cost_scan_hcc_seq: TruncatedSeq,
    young_cards_per_entry_ratio_seq: TruncatedSeq,
    mixed_cards_per_entry_ratio_seq: TruncatedSeq,
    young_only_cost_per_remset_card_ms_seq: TruncatedSeq,
    mixed_cost_per_remset_card_ms_seq: TruncatedSeq,
    cost_per_byte_ms_seq: TruncatedSeq,
    cost_per_byte_ms_during_cm_seq: TruncatedSeq,
    constant_other_time_ms_seq: TruncatedSeq,
    young_other_cost_per_region_ms_seq: TruncatedSeq,
    non_young_other_cost_per_region_ms_seq: TruncatedSeq,

    pending_cards_seq: TruncatedSeq,
    rs_length_seq: TruncatedSeq,

    recent_prev_end_times_for_all_gcs_sec: TruncatedSeq,

    recent_avg_pause_time_ratio: f64,
    last_pause_time_ratio: f64,

    pause_totals: [PauseTotals; PauseKind::COUNT],
}

impl Analytics {
    pub fn new(predictions: Predictions, parallel_gc_threads: u32, now_sec: f64) -> Self {
        let seq = || TruncatedSeq::new(DEFAULT_SEQ_LENGTH);
        let pauses = || TruncatedSeq::new(NUM_PREV_PAUSES_FOR_HEURISTICS);
        let mut this = Self {
            predictions,
            recent_gc_times_ms: pauses(),
            concurrent_mark_remark_times_ms: pauses(),
            concurrent_mark_cleanup_times_ms: pauses(),
            alloc_rate_ms_seq: seq(),
            prev_collection_pause_end_ms: now_sec * 1000.0,
            rs_length_diff_seq: seq(),
            concurrent_refine_rate_ms_seq: seq(),
            logged_cards_rate_ms_seq: seq(),
            cost_per_logged_card_ms_seq: seq(),
            cost_scan_hcc_seq: seq(),
            young_cards_per_entry_ratio_seq: seq(),
            mixed_cards_per_entry_ratio_seq: seq(),
            young_only_cost_per_remset_card_ms_seq: seq(),
            mixed_cost_per_remset_card_ms_seq: seq(),
            cost_per_byte_ms_seq: seq(),
            cost_per_byte_ms_during_cm_seq: seq(),
            constant_other_time_ms_seq: seq(),
            young_other_cost_per_region_ms_seq: seq(),
            non_young_other_cost_per_region_ms_seq: seq(),
            pending_cards_seq: seq(),
            rs_length_seq: seq(),
            recent_prev_end_times_for_all_gcs_sec: pauses(),
            recent_avg_pause_time_ratio: 0.0,
            last_pause_time_ratio: 0.0,
            pause_totals: [PauseTotals::default(); PauseKind::COUNT],
        };

        this.recent_prev_end_times_for_all_gcs_sec.add(now_sec);

        let index = (parallel_gc_threads.max(1) - 1).min(7) as usize;
        this.rs_length_diff_seq.add(RS_LENGTH_DIFF_DEFAULTS[index]);
        // Start with the inverse of the maximum pause cost.
        this.concurrent_refine_rate_ms_seq
            .add(1.0 / COST_PER_LOGGED_CARD_MS_DEFAULTS[0]);
        this.logged_cards_rate_ms_seq.add(0.0);
        this.cost_per_logged_card_ms_seq
            .add(COST_PER_LOGGED_CARD_MS_DEFAULTS[index]);
        this.cost_scan_hcc_seq.add(0.0);
        this.young_cards_per_entry_ratio_seq
            .add(YOUNG_CARDS_PER_ENTRY_RATIO_DEFAULTS[index]);
        this.young_only_cost_per_remset_card_ms_seq
            .add(YOUNG_ONLY_COST_PER_REMSET_CARD_MS_DEFAULTS[index]);
        this.cost_per_byte_ms_seq.add(COST_PER_BYTE_MS_DEFAULTS[index]);
        this.constant_other_time_ms_seq
            .add(CONSTANT_OTHER_TIME_MS_DEFAULTS[index]);
        this.young_other_cost_per_region_ms_seq
            .add(YOUNG_OTHER_COST_PER_REGION_MS_DEFAULTS[index]);
        this.non_young_other_cost_per_region_ms_seq
            .add(NON_YOUNG_OTHER_COST_PER_REGION_MS_DEFAULTS[index]);

        // Start conservatively, around 50ms.
        this.concurrent_mark_remark_times_ms.add(0.05);
        this.concurrent_mark_cleanup_times_ms.add(0.20);
        this
    }

    pub fn predictions(&self) -> &Predictions {
        &self.predictions
    }

    fn predict(&self, seq: &TruncatedSeq) -> f64 {
        self.predictions.predict(seq)
    }

    fn predict_size(&self, seq: &TruncatedSeq) -> usize {
        self.predictions.predict_size(seq)
    }

    pub fn prev_collection_pause_end_ms(&self) -> f64 {
        self.prev_collection_pause_end_ms
    }

    pub fn recent_avg_pause_time_ratio(&self) -> f64 {
        self.recent_avg_pause_time_ratio
    }

    pub fn last_pause_time_ratio(&self) -> f64 {
        self.last_pause_time_ratio
    }

    pub fn num_alloc_rate_ms(&self) -> usize {
        self.alloc_rate_ms_seq.num()
    }

    pub fn last_known_gc_end_time_sec(&self) -> f64 {
        self.recent_prev_end_times_for_all_gcs_sec.oldest()
    }

    pub fn append_prev_collection_pause_end_ms(&mut self, ms: f64) {
        self.prev_collection_pause_end_ms += ms;
    }

    pub fn pause_totals(&self, kind: PauseKind) -> PauseTotals {
        self.pause_totals[kind.index()]
    }

    /// Folds a finished pause into the kind-keyed totals.
    pub fn record_pause(&mut self, record: &PauseRecord) {
        let duration_ms = record.duration_ms();
        let totals = &mut self.pause_totals[record.kind.index()];
        totals.count += 1;
        totals.total_ms += duration_ms;
        totals.max_ms = totals.max_ms.max(duration_ms);
    }

    pub fn update_recent_gc_times(&mut self, end_time_sec: f64, pause_time_ms: f64) {
        self.recent_gc_times_ms.add(pause_time_ms);
        self.recent_prev_end_times_for_all_gcs_sec.add(end_time_sec);
        self.prev_collection_pause_end_ms = end_time_sec * 1000.0;
    }

    pub fn compute_pause_time_ratio(&mut self, interval_ms: f64, pause_time_ms: f64) {
        if interval_ms <= 0.0 {
            return;
        }
        self.recent_avg_pause_time_ratio =
            (self.recent_gc_times_ms.sum() / interval_ms).max(0.0).min(1.0);
        // Compare this pause against the whole window rather than the last interval so
        // that a short burst of pauses does not look like a trend.
        self.last_pause_time_ratio =
            (pause_time_ms * self.recent_prev_end_times_for_all_gcs_sec.num() as f64) / interval_ms;
    }

    pub fn report_concurrent_mark_remark_times_ms(&mut self, ms: f64) {
        self.concurrent_mark_remark_times_ms.add(ms);
    }

    pub fn report_concurrent_mark_cleanup_times_ms(&mut self, ms: f64) {
        self.concurrent_mark_cleanup_times_ms.add(ms);
    }

    pub fn report_alloc_rate_ms(&mut self, alloc_rate: f64) {
        self.alloc_rate_ms_seq.add(alloc_rate);
    }

    pub fn report_concurrent_refine_rate_ms(&mut self, cards_per_ms: f64) {
        self.concurrent_refine_rate_ms_seq.add(cards_per_ms);
    }

    pub fn report_logged_cards_rate_ms(&mut self, cards_per_ms: f64) {
        self.logged_cards_rate_ms_seq.add(cards_per_ms);
    }

    pub fn report_cost_per_logged_card_ms(&mut self, cost_per_card_ms: f64) {
        self.cost_per_logged_card_ms_seq.add(cost_per_card_ms);
    }

    pub fn report_cost_scan_hcc(&mut self, cost: f64) {
        self.cost_scan_hcc_seq.add(cost);
    }

    pub fn report_cost_per_remset_card_ms(&mut self, cost_per_card_ms: f64, for_young_gc: bool) {
        if for_young_gc {
            self.young_only_cost_per_remset_card_ms_seq
                .add(cost_per_card_ms);
        } else {
            self.mixed_cost_per_remset_card_ms_seq.add(cost_per_card_ms);
        }
    }

    pub fn report_cards_per_entry_ratio(&mut self, ratio: f64, for_young_gc: bool) {
        if for_young_gc {
            self.young_cards_per_entry_ratio_seq.add(ratio);
        } else {
            self.mixed_cards_per_entry_ratio_seq.add(ratio);
        }
    }

    pub fn report_rs_length_diff(&mut self, diff: f64) {
        self.rs_length_diff_seq.add(diff);
    }

    pub fn report_cost_per_byte_ms(&mut self, cost_per_byte_ms: f64, mark_or_rebuild_in_progress: bool) {
        if mark_or_rebuild_in_progress {
            self.cost_per_byte_ms_during_cm_seq.add(cost_per_byte_ms);
        } else {
            self.cost_per_byte_ms_seq.add(cost_per_byte_ms);
        }
    }

    pub fn report_young_other_cost_per_region_ms(&mut self, cost_per_region_ms: f64) {
        self.young_other_cost_per_region_ms_seq
            .add(cost_per_region_ms);
    }

    pub fn report_non_young_other_cost_per_region_ms(&mut self, cost_per_region_ms: f64) {
        self.non_young_other_cost_per_region_ms_seq
            .add(cost_per_region_ms);
    }

    pub fn report_constant_other_time_ms(&mut self, constant_other_time_ms: f64) {
        self.constant_other_time_ms_seq.add(constant_other_time_ms);
    }

    pub fn report_pending_cards(&mut self, pending_cards: f64) {
        self.pending_cards_seq.add(pending_cards);
    }

    pub fn report_rs_length(&mut self, rs_length: f64) {
        self.rs_length_seq.add(rs_length);
    }

    pub fn predict_alloc_rate_ms(&self) -> f64 {
        if self.alloc_rate_ms_seq.is_empty() {
            0.0
        } else {
            self.predict(&self.alloc_rate_ms_seq)
        }
    }

    pub fn predict_concurrent_refine_rate_ms(&self) -> f64 {
        self.predict(&self.concurrent_refine_rate_ms_seq)
    }

    pub fn predict_logged_cards_rate_ms(&self) -> f64 {
        self.predict(&self.logged_cards_rate_ms_seq)
    }

    pub fn predict_cost_per_logged_card_ms(&self) -> f64 {
        self.predict(&self.cost_per_logged_card_ms_seq)
    }

    pub fn predict_scan_hcc_ms(&self) -> f64 {
        self.predict(&self.cost_scan_hcc_seq)
    }

    /// Time to process `pending_cards` logged cards at the start of a pause.
    pub fn predict_rs_update_time_ms(&self, pending_cards: usize) -> f64 {
        pending_cards as f64 * self.predict_cost_per_logged_card_ms() + self.predict_scan_hcc_ms()
    }

    fn predict_young_cards_per_entry_ratio(&self) -> f64 {
        self.predict(&self.young_cards_per_entry_ratio_seq)
    }

    fn predict_mixed_cards_per_entry_ratio(&self) -> f64 {
        if self.mixed_cards_per_entry_ratio_seq.num() < 2 {
            self.predict_young_cards_per_entry_ratio()
        } else {
            self.predict(&self.mixed_cards_per_entry_ratio_seq)
        }
    }

    /// Cards that have to be scanned for a remembered set of `rs_length` entries.
    pub fn predict_card_num(&self, rs_length: usize, for_young_gc: bool) -> usize {
        let ratio = if for_young_gc {
            self.predict_young_cards_per_entry_ratio()
        } else {
            self.predict_mixed_cards_per_entry_ratio()
        };
        (rs_length as f64 * ratio).max(0.0) as usize
    }

    pub fn predict_rs_scan_time_ms(&self, card_num: usize, for_young_gc: bool) -> f64 {
        if for_young_gc {
            card_num as f64 * self.predict(&self.young_only_cost_per_remset_card_ms_seq)
        } else {
            self.predict_mixed_rs_scan_time_ms(card_num)
        }
    }

    fn predict_mixed_rs_scan_time_ms(&self, card_num: usize) -> f64 {
        if self.mixed_cost_per_remset_card_ms_seq.num() < 3 {
            card_num as f64 * self.predict(&self.young_only_cost_per_remset_card_ms_seq)
        } else {
            card_num as f64 * self.predict(&self.mixed_cost_per_remset_card_ms_seq)
        }
    }

    fn predict_object_copy_time_ms_during_cm(&self, bytes_to_copy: usize) -> f64 {
        if self.cost_per_byte_ms_during_cm_seq.num() < 3 {
            // Copying is a bit slower while marking runs concurrently.
            1.1 * bytes_to_copy as f64 * self.predict(&self.cost_per_byte_ms_seq)
        } else {
            bytes_to_copy as f64 * self.predict(&self.cost_per_byte_ms_during_cm_seq)
        }
    }

    pub fn predict_object_copy_time_ms(&self, bytes_to_copy: usize, during_concurrent_mark: bool) -> f64 {
        if during_concurrent_mark {
            self.predict_object_copy_time_ms_during_cm(bytes_to_copy)
        } else {
            bytes_to_copy as f64 * self.predict(&self.cost_per_byte_ms_seq)
        }
    }

    pub fn predict_constant_other_time_ms(&self) -> f64 {
        self.predict(&self.constant_other_time_ms_seq)
    }

    pub fn predict_young_other_time_ms(&self, young_num: usize) -> f64 {
        young_num as f64 * self.predict(&self.young_other_cost_per_region_ms_seq)
    }

    pub fn predict_non_young_other_time_ms(&self, non_young_num: usize) -> f64 {
        non_young_num as f64 * self.predict(&self.non_young_other_cost_per_region_ms_seq)
    }

    pub fn predict_remark_time_ms(&self) -> f64 {
        self.predict(&self.concurrent_mark_remark_times_ms)
    }

    pub fn predict_cleanup_time_ms(&self) -> f64 {
        self.predict(&self.concurrent_mark_cleanup_times_ms)
    }

    pub fn predict_rs_length(&self) -> usize {
        let diff = self.predict(&self.rs_length_diff_seq).max(0.0);
        self.predict_size(&self.rs_length_seq) + diff as usize
    }

    pub fn predict_pending_cards(&self) -> usize {
        self.predict_size(&self.pending_cards_seq)
    }
}
