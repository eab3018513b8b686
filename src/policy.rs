//! The pause time goal policy.
//!
//! [`Policy`] is driven by the collector at fixed points of every pause:
//!
//! ```text
//! note_gc_start
//! decide_on_conc_mark_initiation
//! record_collection_pause_start
//!   (collection set is built with calculate_old_collection_set_regions)
//!   (evacuation; record_surviving_bytes, record_age_table)
//! transfer_survivors_to_cset
//! record_collection_pause_end
//! ```
//!
//! plus the remark/cleanup brackets of concurrent marking and the full collection brackets.
//! All of these run with the world stopped; the only state touched concurrently is the
//! marking request flag, see [`MarkingInitiation`].
use std::sync::Arc;

use crate::{
    age_table::AgeTable,
    analytics::{Analytics, PauseTotals},
    clock::{Clock, MonotonicClock},
    collector_state::CollectorState,
    config::PolicyConfig,
    cset::{self, CSetBudget, OldCSetLimits},
    error::ConfigResult,
    heap::{GcCause, HeapView, RegionInfo},
    ihop::{AdaptiveIhop, IhopControl, StaticIhop},
    marking::MarkingInitiation,
    mmu::MmuTracker,
    pause::{InitialMarkToMixedTracker, PauseKind, PauseRecord},
    phase_times::PhaseTimes,
    predictor::Predictions,
    statistics::{NoopSink, PolicyEvent, PolicySink, PolicyStatistics},
    surv_rate::{SurvRateGroup, SurvRateGroupKind, SurvRateTag},
    utils::{formatted_size, percent_of},
    young_gen::{YoungGenBounds, YoungGenSizer, YoungLengthPredictor, YoungTargetLengths},
};

/// Mutator phases below the timer granularity are clamped to 1ms.
const MIN_TIMER_GRANULARITY_MS: f64 = 0.000_000_1;
/// Shortest mutator phase or marking length fed to the IHOP controller.
const MIN_VALID_IHOP_TIME_S: f64 = 1e-6;

/// Decides whether a collection has to be a full collection regardless of what the
/// policy would do otherwise.
pub trait FullGcEscalation: Send {
    fn force_upgrade_to_full(&self, cause: GcCause) -> bool;
}

/// Never forces a full collection.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverUpgrade;

impl FullGcEscalation for NeverUpgrade {
    fn force_upgrade_to_full(&self, _cause: GcCause) -> bool {
        false
    }
}

/// Forces a full collection for the listed causes.
#[derive(Clone, Debug, Default)]
pub struct UpgradeFor {
    pub causes: Vec<GcCause>,
}

impl FullGcEscalation for UpgradeFor {
    fn force_upgrade_to_full(&self, cause: GcCause) -> bool {
        self.causes.contains(&cause)
    }
}

pub struct Policy {
    config: PolicyConfig,
    predictions: Predictions,
    analytics: Analytics,
    mmu: MmuTracker,
    ihop: Box<dyn IhopControl>,
    young_gen_sizer: YoungGenSizer,
    eden_surv_rate_group: SurvRateGroup,
    survivor_surv_rate_group: SurvRateGroup,
    state: CollectorState,
    phase_times: PhaseTimes,
    initial_mark_to_mixed: InitialMarkToMixedTracker,

    clock: Arc<dyn Clock>,
    sink: Arc<dyn PolicySink>,
    escalation: Box<dyn FullGcEscalation>,

    reserve_factor: f64,
    reserve_regions: usize,
    young_list_fixed_length: Option<usize>,
    young_list_target_length: usize,
    young_list_max_length: usize,
    free_regions_at_end_of_collection: usize,

    rs_length_prediction: usize,
    pending_cards_at_gc_start: usize,
    pending_cards_at_prev_gc_end: usize,
    total_concurrent_refined_cards: usize,
    total_concurrent_refinement_time_ms: f64,
    total_mutator_refined_cards: usize,
    refinement_time_goal_ms: f64,

    bytes_allocated_in_old_since_last_gc: usize,
    gc_cause: GcCause,

    tenuring_threshold: u32,
    max_survivor_regions: usize,
    survivors_age_table: AgeTable,

    full_collection_start_sec: f64,
    mark_remark_start_sec: f64,
    mark_cleanup_start_sec: f64,
}

impl Policy {
    pub fn new<H: HeapView>(config: PolicyConfig, heap: &H) -> ConfigResult<Self> {
        Self::with_collaborators(
            config,
            heap,
            Arc::new(MonotonicClock::new()),
            Arc::new(NoopSink),
            Box::new(NeverUpgrade),
        )
    }

    pub fn with_collaborators<H: HeapView>(
        config: PolicyConfig,
        heap: &H,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn PolicySink>,
        escalation: Box<dyn FullGcEscalation>,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let young_gen_sizer = YoungGenSizer::new(&config)?;

        let predictions = Predictions::new(config.prediction_sigma());
        let analytics = Analytics::new(predictions, config.parallel_gc_threads, clock.now_sec());
        let mmu = MmuTracker::new(config.pause_interval_sec(), config.max_gc_time_sec());
        let ihop: Box<dyn IhopControl> = if config.adaptive_ihop {
            Box::new(AdaptiveIhop::new(
                config.initiating_heap_occupancy_percent as f64,
                predictions,
                config.reserve_percent as usize,
                config.heap_waste_percent as usize,
                heap.max_capacity_bytes(),
                config.adaptive_ihop_initial_samples,
            ))
        } else {
            Box::new(StaticIhop::new(
                config.initiating_heap_occupancy_percent as f64,
            ))
        };

        let mut this = Self {
            predictions,
            analytics,
            mmu,
            ihop,
            young_gen_sizer,
            eden_surv_rate_group: SurvRateGroup::new(SurvRateGroupKind::Eden),
            survivor_surv_rate_group: SurvRateGroup::new(SurvRateGroupKind::Survivor),
            state: CollectorState::new(),
            phase_times: PhaseTimes::default(),
            initial_mark_to_mixed: InitialMarkToMixedTracker::new(),
            clock,
            sink,
            escalation,
            reserve_factor: config.reserve_percent as f64 / 100.0,
            reserve_regions: 0,
            young_list_fixed_length: None,
            young_list_target_length: 0,
            young_list_max_length: 0,
            free_regions_at_end_of_collection: heap.num_free_regions(),
            rs_length_prediction: 0,
            pending_cards_at_gc_start: 0,
            pending_cards_at_prev_gc_end: 0,
            total_concurrent_refined_cards: 0,
            total_concurrent_refinement_time_ms: 0.0,
            total_mutator_refined_cards: 0,
            refinement_time_goal_ms: 0.0,
            bytes_allocated_in_old_since_last_gc: 0,
            gc_cause: GcCause::Allocation,
            tenuring_threshold: config.max_tenuring_threshold,
            max_survivor_regions: 0,
            survivors_age_table: AgeTable::new(),
            full_collection_start_sec: 0.0,
            mark_remark_start_sec: 0.0,
            mark_cleanup_start_sec: 0.0,
            config,
        };

        this.record_new_heap_size(heap.num_regions());
        this.update_young_list_max_and_target_length(heap);
        Ok(this)
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    pub fn collector_state(&self) -> &CollectorState {
        &self.state
    }

    /// Handle other threads can use to request a marking cycle.
    pub fn marking_handle(&self) -> Arc<MarkingInitiation> {
        self.state.marking_handle()
    }

    pub fn phase_times(&self) -> &PhaseTimes {
        &self.phase_times
    }

    pub fn phase_times_mut(&mut self) -> &mut PhaseTimes {
        &mut self.phase_times
    }

    pub fn young_gen_sizer(&self) -> &YoungGenSizer {
        &self.young_gen_sizer
    }

    pub fn use_adaptive_young_list_length(&self) -> bool {
        self.young_gen_sizer.adaptive_young_list_length()
    }

    pub fn young_list_target_length(&self) -> usize {
        self.young_list_target_length
    }

    pub fn young_list_max_length(&self) -> usize {
        self.young_list_max_length
    }

    pub fn reserve_regions(&self) -> usize {
        self.reserve_regions
    }

    pub fn rs_length_prediction(&self) -> usize {
        self.rs_length_prediction
    }

    /// Survivors whose age is at or above this are promoted on their next copy, so an
    /// object stays young while `age < tenuring_threshold()`. Zero promotes everything.
    pub fn tenuring_threshold(&self) -> u32 {
        self.tenuring_threshold
    }

    pub fn max_survivor_regions(&self) -> usize {
        self.max_survivor_regions
    }

    /// Time the next pause should spend on logged cards, derived at the end of each pause.
    pub fn refinement_time_goal_ms(&self) -> f64 {
        self.refinement_time_goal_ms
    }

    pub fn pending_cards_at_prev_gc_end(&self) -> usize {
        self.pending_cards_at_prev_gc_end
    }

    pub fn ihop_threshold(&self) -> usize {
        self.ihop.conc_mark_start_threshold()
    }

    pub fn force_upgrade_to_full(&self, cause: GcCause) -> bool {
        self.escalation.force_upgrade_to_full(cause)
    }

    pub fn statistics<H: HeapView>(&self, heap: &H) -> PolicyStatistics {
        let mut pauses = [PauseTotals::default(); PauseKind::COUNT];
        for kind in PauseKind::ALL.iter() {
            pauses[kind.index()] = self.analytics.pause_totals(*kind);
        }
        PolicyStatistics {
            pauses,
            young_list_target_length: self.young_list_target_length,
            young_list_max_length: self.young_list_max_length,
            max_survivor_regions: self.max_survivor_regions,
            reserve_regions: self.reserve_regions,
            tenuring_threshold: self.tenuring_threshold,
            ihop_threshold: self.ihop.conc_mark_start_threshold(),
            heap_capacity: heap.capacity_bytes(),
            recent_avg_pause_time_ratio: self.analytics.recent_avg_pause_time_ratio(),
        }
    }

    /// Called whenever the number of committed regions changes.
    pub fn record_new_heap_size(&mut self, new_number_of_regions: usize) {
        // At least one region as soon as the factor is non-zero.
        self.reserve_regions = (new_number_of_regions as f64 * self.reserve_factor).ceil() as usize;
        self.young_gen_sizer.heap_size_changed(new_number_of_regions);
        self.young_list_fixed_length = if self.use_adaptive_young_list_length() {
            None
        } else {
            Some(self.young_gen_sizer.min_desired_young_length())
        };
        self.ihop
            .update_target_occupancy(new_number_of_regions * self.config.region_size_bytes);
    }

    // Young generation sizing.

    fn calculate_young_list_desired_min_length(&self, base_min_length: usize) -> usize {
        let mut desired_min_length = 0;
        if self.use_adaptive_young_list_length() && self.analytics.num_alloc_rate_ms() > 3 {
            let now_sec = self.clock.now_sec();
            let when_ms = self.mmu.when_max_gc_sec(now_sec) * 1000.0;
            let alloc_rate_ms = self.analytics.predict_alloc_rate_ms();
            desired_min_length = (alloc_rate_ms * when_ms).ceil() as usize;
        }
        desired_min_length += base_min_length;
        desired_min_length.max(self.young_gen_sizer.min_desired_young_length())
    }

    /// Predicted time of a young collection that does not depend on the eden length.
    pub fn predict_base_elapsed_time_ms(&self, pending_cards: usize, rs_length: usize) -> f64 {
        let young_only = self.state.in_young_only_phase();
        let card_num = self.analytics.predict_card_num(rs_length, young_only);
        self.analytics.predict_rs_update_time_ms(pending_cards)
            + self.analytics.predict_rs_scan_time_ms(card_num, young_only)
            + self.analytics.predict_constant_other_time_ms()
    }

    fn surv_rate_group(&self, kind: SurvRateGroupKind) -> &SurvRateGroup {
        match kind {
            SurvRateGroupKind::Eden => &self.eden_surv_rate_group,
            SurvRateGroupKind::Survivor => &self.survivor_surv_rate_group,
        }
    }

    fn surv_rate_group_mut(&mut self, kind: SurvRateGroupKind) -> &mut SurvRateGroup {
        match kind {
            SurvRateGroupKind::Eden => &mut self.eden_surv_rate_group,
            SurvRateGroupKind::Survivor => &mut self.survivor_surv_rate_group,
        }
    }

    pub fn predict_bytes_to_copy(&self, region: &RegionInfo) -> usize {
        match region.surv_rate_tag {
            None => region.live_bytes,
            Some(tag) => {
                let group = self.surv_rate_group(tag.group);
                let age = group.age_in_group(tag.age_index);
                let surv_rate = group.surv_rate_pred(&self.predictions, age);
                (region.used_bytes as f64 * surv_rate) as usize
            }
        }
    }

    pub fn predict_region_elapsed_time_ms(&self, region: &RegionInfo, for_young_gc: bool) -> f64 {
        let young_only = self.state.in_young_only_phase();
        let card_num = self.analytics.predict_card_num(region.rs_length, for_young_gc);
        let bytes_to_copy = self.predict_bytes_to_copy(region);
        let mut time_ms = self.analytics.predict_rs_scan_time_ms(card_num, young_only)
            + self.analytics.predict_object_copy_time_ms(
                bytes_to_copy,
                self.state.mark_or_rebuild_in_progress(),
            );
        // Other time depends on the region type, not the collection type.
        if region.is_young() {
            time_ms += self.analytics.predict_young_other_time_ms(1);
        } else {
            time_ms += self.analytics.predict_non_young_other_time_ms(1);
        }
        time_ms
    }

    pub fn predict_survivor_regions_evac_time<H: HeapView>(&self, heap: &H) -> f64 {
        let young_only = self.state.in_young_only_phase();
        heap.survivor_regions()
            .iter()
            .map(|region| self.predict_region_elapsed_time_ms(region, young_only))
            .sum()
    }

    fn young_list_target_lengths<H: HeapView>(&self, heap: &H, rs_length: usize) -> YoungTargetLengths {
        // The survivors are already part of the next young generation.
        let base_min_length = heap.survivor_regions_count();
        let desired_min_length = self.calculate_young_list_desired_min_length(base_min_length);
        // Leave room for at least one eden region, and never shrink below the current eden.
        let absolute_min_length = base_min_length + heap.eden_regions_count().max(1);

        let bounds = YoungGenBounds {
            fixed_length: self.young_list_fixed_length,
            min_desired: desired_min_length.max(absolute_min_length),
            max_desired: self.young_gen_sizer.max_desired_young_length(),
            max_allowed: self
                .free_regions_at_end_of_collection
                .saturating_sub(self.reserve_regions),
        };

        let pending_cards = self.analytics.predict_pending_cards();
        let base_time_ms = self.predict_base_elapsed_time_ms(pending_cards, rs_length)
            + self.predict_survivor_regions_evac_time(heap);
        let predictor = YoungLengthPredictor {
            analytics: &self.analytics,
            eden_surv_rate: &self.eden_surv_rate_group,
            base_time_ms,
            base_free_regions: bounds.max_allowed,
            target_pause_time_ms: self.config.pause_time_goal_ms,
            region_size_bytes: self.config.region_size_bytes,
            during_concurrent_mark: self.state.mark_or_rebuild_in_progress(),
            confidence_percent: self.config.confidence_percent as f64,
            target_plab_waste_percent: self.config.target_plab_waste_percent as f64,
        };

        let lengths = bounds.target_lengths(
            base_min_length,
            self.state.in_young_only_phase(),
            |young_length| predictor.will_fit(young_length),
        );
        log::trace!(
            target: "gc::ergo",
            "Young target lengths: {:?} for {:?}, base time {:.2}ms, rs length {}, pending cards {}",
            lengths,
            bounds,
            base_time_ms,
            rs_length,
            pending_cards
        );
        lengths
    }

    fn update_young_list_target_length<H: HeapView>(&mut self, heap: &H, rs_length: usize) -> usize {
        let lengths = self.young_list_target_lengths(heap, rs_length);
        self.young_list_target_length = lengths.bounded;
        lengths.unbounded
    }

    fn update_max_gc_locker_expansion(&mut self) {
        let percent = self.config.gc_locker_eden_expansion_percent as f64 / 100.0;
        // At least one region as soon as the percentage is non-zero.
        let expansion_regions = (percent * self.young_list_target_length as f64).ceil() as usize;
        self.young_list_max_length = self.young_list_target_length + expansion_regions;
    }

    fn update_young_list_max_and_target_length_for<H: HeapView>(
        &mut self,
        heap: &H,
        rs_length: usize,
    ) -> usize {
        let unbounded = self.update_young_list_target_length(heap, rs_length);
        self.update_max_gc_locker_expansion();
        self.sink.record(PolicyEvent::YoungTargetUpdated {
            target_length: self.young_list_target_length,
            unbounded_length: unbounded,
            max_length: self.young_list_max_length,
        });
        unbounded
    }

    /// Recomputes the young target and maximum lengths. Returns the target the pause time
    /// goal alone would have chosen.
    pub fn update_young_list_max_and_target_length<H: HeapView>(&mut self, heap: &H) -> usize {
        let rs_length = self.analytics.predict_rs_length();
        self.update_young_list_max_and_target_length_for(heap, rs_length)
    }

    fn update_rs_length_prediction_to(&mut self, prediction: usize) {
        if self.state.in_young_only_phase() && self.use_adaptive_young_list_length() {
            self.rs_length_prediction = prediction;
        }
    }

    fn update_rs_length_prediction(&mut self) {
        let prediction = self.analytics.predict_rs_length();
        self.update_rs_length_prediction_to(prediction);
    }

    /// Called while mutators run when the remembered sets of the young regions are found to
    /// be larger than predicted.
    pub fn revise_young_list_target_length_if_necessary<H: HeapView>(
        &mut self,
        heap: &H,
        rs_length: usize,
    ) {
        assert!(
            self.use_adaptive_young_list_length(),
            "young list length is fixed"
        );
        if rs_length > self.rs_length_prediction {
            // Overshoot by 10% so this does not happen on every sample.
            let rs_length_prediction = rs_length * 1100 / 1000;
            self.update_rs_length_prediction_to(rs_length_prediction);
            self.update_young_list_max_and_target_length_for(heap, rs_length_prediction);
        }
    }

    pub fn should_allocate_mutator_region<H: HeapView>(&self, heap: &H) -> bool {
        heap.young_regions_count() < self.young_list_target_length
    }

    pub fn can_expand_young_list<H: HeapView>(&self, heap: &H) -> bool {
        heap.young_regions_count() < self.young_list_max_length
    }

    // Survivors.

    /// Tags a newly allocated eden region.
    pub fn new_eden_region_tag(&mut self) -> SurvRateTag {
        self.eden_surv_rate_group.next_age_index()
    }

    /// Tags the survivor regions of the pause that is ending. Finalizes the survival rates
    /// of the previous survivors first.
    pub fn transfer_survivors_to_cset(&mut self, num_survivors: usize, update_predictors: bool) -> Vec<SurvRateTag> {
        let predictions = self.predictions;
        let group = &mut self.survivor_surv_rate_group;
        group.all_surviving_bytes_recorded(&predictions, update_predictors);
        group.start_adding_regions();
        let tags = (0..num_survivors).map(|_| group.next_age_index()).collect();
        group.stop_adding_regions();
        tags
    }

    /// Records how much of a collected young region survived.
    pub fn record_surviving_bytes(&mut self, tag: SurvRateTag, surviving_bytes: usize) {
        let region_size = self.config.region_size_bytes;
        let group = self.surv_rate_group_mut(tag.group);
        let age = group.age_in_group(tag.age_index);
        group.record_surviving_bytes(age, surviving_bytes, region_size);
    }

    /// Merges a worker's survivor ages into the pause's table.
    pub fn record_age_table(&mut self, table: &AgeTable) {
        self.survivors_age_table.merge(table);
    }

    /// Promotes everything for the rest of the pause.
    pub fn note_survivor_space_exhausted(&mut self) {
        log::debug!(target: "gc::age", "Survivor space exhausted, promoting all survivors");
        self.tenuring_threshold = 0;
    }

    fn desired_survivor_size(&self, max_regions: usize) -> usize {
        let survivor_capacity = max_regions * self.config.region_size_bytes;
        survivor_capacity / 100 * self.config.target_survivor_ratio as usize
            + survivor_capacity % 100 * self.config.target_survivor_ratio as usize / 100
    }

    fn update_survivors_policy<H: HeapView>(&mut self, heap: &H) {
        // The desired size ignores how much of the heap is left, so that being close to
        // the end of the heap does not cause premature promotion.
        let max_survivor_regions_d =
            self.young_list_target_length as f64 / self.config.survivor_ratio as f64;
        let desired_max_survivor_regions = max_survivor_regions_d.ceil() as usize;
        let survivor_size = self.desired_survivor_size(desired_max_survivor_regions);

        self.tenuring_threshold = self
            .survivors_age_table
            .compute_tenuring_threshold(survivor_size, self.config.max_tenuring_threshold);
        self.survivors_age_table.print(
            survivor_size,
            self.tenuring_threshold,
            self.config.max_tenuring_threshold,
        );

        self.max_survivor_regions =
            desired_max_survivor_regions.min(heap.num_free_or_available_regions());
        self.sink.record(PolicyEvent::Tenuring {
            threshold: self.tenuring_threshold,
            desired_survivor_size: survivor_size,
            max_survivor_regions: self.max_survivor_regions,
        });
    }

    // Concurrent refinement.

    pub fn record_concurrent_refinement_data<H: HeapView>(&mut self, heap: &H, is_full_collection: bool) {
        self.pending_cards_at_gc_start = heap.pending_cards();
        let stats = heap.refinement_stats();

        let cr_time_ms = stats.concurrent_refinement_time_ms - self.total_concurrent_refinement_time_ms;
        self.total_concurrent_refinement_time_ms = stats.concurrent_refinement_time_ms;
        let cr_cards = stats
            .concurrent_refined_cards
            .saturating_sub(self.total_concurrent_refined_cards);
        self.total_concurrent_refined_cards = stats.concurrent_refined_cards;

        // Rates sampled across a full collection or from no work at all are meaningless.
        if !is_full_collection && cr_cards > 0 && cr_time_ms > 0.0 {
            self.analytics
                .report_concurrent_refine_rate_ms(cr_cards as f64 / cr_time_ms);
        }

        let mut_cards = stats
            .mutator_refined_cards
            .saturating_sub(self.total_mutator_refined_cards);
        self.total_mutator_refined_cards = stats.mutator_refined_cards;

        if !is_full_collection {
            let total_cards = self.pending_cards_at_gc_start + cr_cards + mut_cards;
            let mut_start_ms = self.analytics.prev_collection_pause_end_ms();
            let mut_end_ms = self.phase_times.cur_collection_start_sec * 1000.0;
            let mut_time_ms = mut_end_ms - mut_start_ms;
            // Very short sample periods only pollute the prediction.
            if mut_time_ms > 1.0 {
                self.analytics
                    .report_logged_cards_rate_ms(total_cards as f64 / mut_time_ms);
            }
        }
        log::trace!(
            target: "gc::ergo::refine",
            "Refinement data: pending {} concurrent {} cards in {:.3}ms, mutator {} cards",
            self.pending_cards_at_gc_start,
            cr_cards,
            cr_time_ms,
            mut_cards
        );
    }

    // Marking initiation.

    pub fn add_bytes_allocated_in_old_since_last_gc(&mut self, bytes: usize) {
        self.bytes_allocated_in_old_since_last_gc += bytes;
    }

    pub fn about_to_start_mixed_phase<H: HeapView>(&self, heap: &H) -> bool {
        heap.concurrent_cycle_in_progress() || self.state.in_young_gc_before_mixed()
    }

    /// Whether old generation occupancy plus `alloc_bytes` crossed the marking threshold.
    pub fn need_to_start_conc_mark<H: HeapView>(&self, heap: &H, source: &str, alloc_bytes: usize) -> bool {
        if self.about_to_start_mixed_phase(heap) {
            return false;
        }

        let threshold = self.ihop.conc_mark_start_threshold();
        let cur_used_bytes = heap.non_young_capacity_bytes();
        let marking_request_bytes = cur_used_bytes + alloc_bytes;

        if marking_request_bytes <= threshold {
            return false;
        }
        let result = self.state.in_young_only_phase() && !self.state.in_young_gc_before_mixed();
        log::debug!(
            target: "gc::ergo::ihop",
            "{} occupancy: {}B allocation request: {}B threshold: {}B ({:.2}) source: {}",
            if result {
                "Request concurrent cycle initiation (occupancy higher than threshold)"
            } else {
                "Do not request concurrent cycle initiation (still doing mixed collections)"
            },
            cur_used_bytes,
            alloc_bytes,
            threshold,
            percent_of(threshold, heap.capacity_bytes()),
            source
        );
        result
    }

    fn maybe_start_marking<H: HeapView>(&mut self, heap: &H) {
        if self.need_to_start_conc_mark(heap, "end of GC", 0) {
            // A request postponed at the start of this pause may still be pending.
            self.state.marking().request();
        }
    }

    /// Requests a marking cycle for `cause` unless one is already running.
    pub fn force_initial_mark_if_outside_cycle<H: HeapView>(&self, heap: &H, cause: GcCause) -> bool {
        if heap.concurrent_cycle_in_progress() {
            log::debug!(
                target: "gc::ergo",
                "Do not request concurrent cycle initiation (concurrent cycle already in progress). GC cause: {}",
                cause
            );
            return false;
        }
        log::debug!(
            target: "gc::ergo",
            "Request concurrent cycle initiation (requested by GC cause). GC cause: {}",
            cause
        );
        self.state.marking().request();
        true
    }

    /// Turns a pending marking request into an initial mark for the pause about to start.
    /// Returns whether this pause does initial-mark work.
    pub fn decide_on_conc_mark_initiation<H: HeapView>(&mut self, heap: &mut H) -> bool {
        assert!(
            !self.state.in_initial_mark_gc(),
            "initial mark left scheduled by a previous pause"
        );
        if !self.state.initiate_conc_mark_if_possible() {
            return false;
        }

        let cause = heap.gc_cause();
        let (initiated, reason) = if !self.about_to_start_mixed_phase(heap)
            && self.state.in_young_only_phase()
        {
            self.initiate_conc_mark();
            (true, "concurrent cycle initiation requested")
        } else if cause.is_user_requested_concurrent() {
            // An initial mark has to be a young-only collection. Candidates from the last
            // marking would be stale after the new one anyway.
            self.state.set_in_young_only_phase(true);
            self.state.set_in_young_gc_before_mixed(false);
            heap.clear_candidates();
            self.abort_time_to_mixed_tracking();
            self.initiate_conc_mark();
            (true, "user requested concurrent cycle")
        } else {
            // Starting now would overlap with the cycle that is still finishing; try again
            // at the next pause.
            (false, "concurrent cycle already in progress")
        };

        log::debug!(
            target: "gc::ergo",
            "{} concurrent cycle ({})",
            if initiated { "Initiate" } else { "Do not initiate" },
            reason
        );
        self.sink
            .record(PolicyEvent::MarkingDecision { initiated, reason });
        initiated
    }

    fn initiate_conc_mark(&mut self) {
        let scheduled = self.state.marking().schedule_initial_mark();
        debug_assert!(scheduled, "marking request vanished at a safepoint");
    }

    /// The initial-mark work of the current pause is done. A request raised after the
    /// initial mark was consumed stays pending for the next pause.
    pub fn record_concurrent_mark_init_end(&mut self) {
        if !self.state.marking().complete_initial_mark() {
            log::debug!(target: "gc::ergo", "initial mark end without a scheduled initial mark");
        }
    }

    fn abort_time_to_mixed_tracking(&mut self) {
        self.initial_mark_to_mixed.reset();
    }

    // Pauses.

    pub fn note_gc_start(&mut self) {
        self.phase_times.note_gc_start();
    }

    pub fn record_collection_pause_start<H: HeapView>(&mut self, heap: &H, start_time_sec: f64) {
        self.gc_cause = heap.gc_cause();
        // Only the pause about to start uses the survivor bounds.
        self.update_survivors_policy(heap);

        self.phase_times.cur_collection_start_sec = start_time_sec;
        self.record_concurrent_refinement_data(heap, false);

        self.eden_surv_rate_group.stop_adding_regions();
        self.survivors_age_table.clear();
    }

    fn record_pause(&mut self, kind: PauseKind, start_sec: f64, end_sec: f64) {
        if kind != PauseKind::Full {
            self.mmu.add_pause(start_sec, end_sec);
        }
        match kind {
            PauseKind::Full => self.abort_time_to_mixed_tracking(),
            PauseKind::Cleanup | PauseKind::Remark | PauseKind::YoungOnly | PauseKind::LastYoung => {
                self.initial_mark_to_mixed.add_pause(end_sec - start_sec)
            }
            PauseKind::InitialMark => {
                if self.gc_cause != GcCause::PeriodicCollection {
                    self.initial_mark_to_mixed.record_initial_mark_end(end_sec);
                }
            }
            PauseKind::Mixed => self.initial_mark_to_mixed.record_mixed_gc_start(start_sec),
        }
        let record = PauseRecord::new(kind, start_sec, end_sec);
        self.analytics.record_pause(&record);
        self.sink.record(PolicyEvent::PauseRecorded {
            kind,
            start_sec,
            end_sec,
        });
    }

    fn report_pause_costs(&mut self, pause_time_ms: f64, this_pause_was_young_only: bool) {
        let times = &self.phase_times;
        let analytics = &mut self.analytics;

        let logged_cards = times.logged_dirty_cards;
        if logged_cards > 0 {
            analytics.report_cost_per_logged_card_ms(
                times.logged_cards_processing_time_ms() / logged_cards as f64,
            );
        }
        analytics.report_cost_scan_hcc(times.merge_hcc_time_ms);

        let remset_cards_scanned = times.remset_cards_scanned();
        if remset_cards_scanned > 10 {
            analytics.report_cost_per_remset_card_ms(
                times.remset_scan_time_ms() / remset_cards_scanned as f64,
                this_pause_was_young_only,
            );
        }
        if times.rs_length > 0 {
            analytics.report_cards_per_entry_ratio(
                remset_cards_scanned as f64 / times.rs_length as f64,
                this_pause_was_young_only,
            );
        }
        // The recorded length may lag behind; only grow the difference.
        if times.rs_length > times.recorded_rs_length {
            analytics.report_rs_length_diff((times.rs_length - times.recorded_rs_length) as f64);
        }
        if times.copied_bytes > 0 {
            analytics.report_cost_per_byte_ms(
                times.obj_copy_time_ms / times.copied_bytes as f64,
                self.state.mark_or_rebuild_in_progress(),
            );
        }
        if times.young_region_length() > 0 {
            analytics.report_young_other_cost_per_region_ms(
                times.young_other_time_ms / times.young_region_length() as f64,
            );
        }
        if times.old_region_length > 0 {
            analytics.report_non_young_other_cost_per_region_ms(
                times.non_young_other_time_ms / times.old_region_length as f64,
            );
        }
        analytics.report_constant_other_time_ms(times.constant_other_time_ms(pause_time_ms));

        // Mixed collections see very different remembered sets and pending cards; they
        // would skew young sizing right after the mixed phase.
        if this_pause_was_young_only {
            analytics.report_pending_cards(self.pending_cards_at_gc_start as f64);
            analytics.report_rs_length(times.rs_length as f64);
        }
    }

    pub fn record_collection_pause_end<H: HeapView>(&mut self, heap: &mut H, pause_time_ms: f64) {
        let end_time_sec = self.clock.now_sec();
        let this_pause_was_young_only = self.state.in_young_only_phase();
        let update_stats = !heap.evacuation_failed();
        let kind = PauseKind::of_young_pause(&self.state);

        self.record_pause(kind, end_time_sec - pause_time_ms / 1000.0, end_time_sec);

        let this_pause_included_initial_mark = self.state.in_initial_mark_gc();
        if this_pause_included_initial_mark {
            self.record_concurrent_mark_init_end();
        } else {
            self.maybe_start_marking(heap);
        }

        let mut app_time_ms = self.phase_times.cur_collection_start_sec * 1000.0
            - self.analytics.prev_collection_pause_end_ms();
        if app_time_ms < MIN_TIMER_GRANULARITY_MS {
            app_time_ms = 1.0;
        }

        if update_stats {
            // Mutators only allocate into eden, apart from large objects which neither
            // affect pause length nor pause frequency.
            let alloc_rate_ms = self.phase_times.eden_region_length as f64 / app_time_ms;
            self.analytics.report_alloc_rate_ms(alloc_rate_ms);

            let interval_ms = (end_time_sec - self.analytics.last_known_gc_end_time_sec()) * 1000.0;
            self.analytics
                .update_recent_gc_times(end_time_sec, pause_time_ms);
            self.analytics
                .compute_pause_time_ratio(interval_ms, pause_time_ms);
        }

        if self.state.in_young_gc_before_mixed() {
            assert!(
                !this_pause_included_initial_mark,
                "the last young collection before mixed ones cannot start marking"
            );
            self.state.set_in_young_only_phase(false);
            self.state.set_in_young_gc_before_mixed(false);
        } else if !this_pause_was_young_only
            && !self.next_gc_should_be_mixed(heap, "continue mixed GCs", "do not continue mixed GCs")
        {
            self.state.set_in_young_only_phase(true);
            heap.clear_candidates();
            self.maybe_start_marking(heap);
        }

        let predictions = self.predictions;
        self.eden_surv_rate_group
            .all_surviving_bytes_recorded(&predictions, update_stats);
        self.eden_surv_rate_group.start_adding_regions();

        let scan_hcc_time_ms = self.phase_times.merge_hcc_time_ms;
        if update_stats {
            self.report_pause_costs(pause_time_ms, this_pause_was_young_only);
        }

        assert!(
            !(this_pause_included_initial_mark && self.state.mark_or_rebuild_in_progress()),
            "an initial mark pause cannot happen while marking"
        );
        if this_pause_included_initial_mark {
            self.state.set_mark_or_rebuild_in_progress(true);
        }

        self.free_regions_at_end_of_collection = heap.num_free_regions();
        let last_unrestrained_young_length = self.update_young_list_max_and_target_length(heap);
        self.update_rs_length_prediction();

        if heap.gc_cause() != GcCause::PeriodicCollection {
            let young_gen_size = last_unrestrained_young_length * self.config.region_size_bytes;
            self.update_ihop_prediction(
                heap,
                app_time_ms / 1000.0,
                young_gen_size,
                this_pause_was_young_only,
                this_pause_included_initial_mark,
            );
            self.bytes_allocated_in_old_since_last_gc = 0;
        } else {
            // Periodic collections run while the application idles; their timing says
            // nothing about how long marking takes.
            self.initial_mark_to_mixed.reset();
        }

        self.update_refinement_goal(heap, scan_hcc_time_ms);
        self.phase_times.print(pause_time_ms);
        log::info!(
            target: "gc::phases",
            "{} ({}) {:.3}ms, young target {} regions, used {}",
            kind,
            heap.gc_cause(),
            pause_time_ms,
            self.young_list_target_length,
            formatted_size(heap.used_bytes())
        );
    }

    fn update_ihop_prediction<H: HeapView>(
        &mut self,
        heap: &H,
        mutator_time_s: f64,
        young_gen_size: usize,
        this_gc_was_young_only: bool,
        this_gc_included_initial_mark: bool,
    ) {
        let mut report = false;

        if !this_gc_was_young_only && self.initial_mark_to_mixed.has_result() {
            let marking_to_mixed_time = self.initial_mark_to_mixed.last_marking_time();
            if marking_to_mixed_time > MIN_VALID_IHOP_TIME_S {
                self.ihop.update_marking_length(marking_to_mixed_time);
                report = true;
            }
            // One sample per marking cycle.
            self.initial_mark_to_mixed.reset();
        }

        // Promotion during marking is approximated with all young-only collections.
        if this_gc_was_young_only
            && !this_gc_included_initial_mark
            && mutator_time_s > MIN_VALID_IHOP_TIME_S
        {
            self.ihop.update_allocation_info(
                mutator_time_s,
                self.bytes_allocated_in_old_since_last_gc,
                young_gen_size,
            );
            report = true;
        }

        if report {
            let occupancy = heap.non_young_capacity_bytes();
            self.ihop.print(occupancy);
            self.sink.record(PolicyEvent::Ihop(self.ihop.report(occupancy)));
        }
    }

    fn update_refinement_goal<H: HeapView>(&mut self, heap: &H, scan_hcc_time_ms: f64) {
        let mut goal_ms = self.mmu.max_gc_time_sec()
            * 1000.0
            * self.config.refinement_pause_time_percent as f64
            / 100.0;
        if goal_ms < scan_hcc_time_ms {
            log::debug!(
                target: "gc::ergo::refine",
                "Adjust concurrent refinement thresholds (scanning the HCC expected to take longer \
                 than Update RS time goal). Logged Cards Scan time goal: {:.2}ms Scan HCC time: {:.2}ms",
                goal_ms,
                scan_hcc_time_ms
            );
            goal_ms = 0.0;
        } else {
            goal_ms -= scan_hcc_time_ms;
        }
        self.refinement_time_goal_ms = goal_ms;
        self.pending_cards_at_prev_gc_end = heap.pending_cards();

        let logged_cards_time_ms = self.phase_times.logged_cards_processing_time_ms();
        log::debug!(
            target: "gc::ergo::refine",
            "Concurrent refinement times: Logged Cards Scan time goal: {:.2}ms Logged Cards Scan \
             time: {:.2}ms HCC time: {:.2}ms",
            goal_ms,
            logged_cards_time_ms,
            scan_hcc_time_ms
        );
        self.sink.record(PolicyEvent::RefinementGoal {
            goal_ms,
            logged_cards_time_ms,
            hcc_time_ms: scan_hcc_time_ms,
        });
    }

    pub fn record_full_collection_start<H: HeapView>(&mut self, heap: &mut H) {
        self.full_collection_start_sec = self.clock.now_sec();
        // The full collection compacts into everything, including future survivor space.
        self.state.set_in_young_only_phase(false);
        self.state.set_in_full_gc(true);
        heap.clear_candidates();
        self.record_concurrent_refinement_data(heap, true);
    }

    pub fn record_full_collection_end<H: HeapView>(&mut self, heap: &H) {
        let end_sec = self.clock.now_sec();
        let full_gc_time_ms = (end_sec - self.full_collection_start_sec) * 1000.0;
        self.analytics
            .update_recent_gc_times(end_sec, full_gc_time_ms);

        self.state.set_in_full_gc(false);
        // Start over with young collections.
        self.state.set_in_young_only_phase(true);
        self.state.set_in_young_gc_before_mixed(false);
        let start_marking = self.need_to_start_conc_mark(heap, "end of Full GC", 0);
        let marking = self.state.marking();
        // An initial mark scheduled for a pause that was upgraded to a full collection.
        marking.complete_initial_mark();
        if start_marking {
            marking.request();
        } else {
            marking.withdraw_request();
        }
        self.state.set_mark_or_rebuild_in_progress(false);
        self.state.set_clearing_next_bitmap(false);

        self.eden_surv_rate_group.start_adding_regions();
        self.free_regions_at_end_of_collection = heap.num_free_regions();
        self.survivor_surv_rate_group.reset();
        self.update_young_list_max_and_target_length(heap);
        self.update_rs_length_prediction();
        self.pending_cards_at_prev_gc_end = heap.pending_cards();
        self.bytes_allocated_in_old_since_last_gc = 0;

        self.record_pause(PauseKind::Full, self.full_collection_start_sec, end_sec);
        log::info!(
            target: "gc::phases",
            "{} {:.3}ms, young target {} regions",
            PauseKind::Full,
            full_gc_time_ms,
            self.young_list_target_length
        );
    }

    pub fn record_concurrent_mark_remark_start(&mut self) {
        self.mark_remark_start_sec = self.clock.now_sec();
    }

    pub fn record_concurrent_mark_remark_end(&mut self) {
        let end_time_sec = self.clock.now_sec();
        let elapsed_time_ms = (end_time_sec - self.mark_remark_start_sec) * 1000.0;
        self.analytics
            .report_concurrent_mark_remark_times_ms(elapsed_time_ms);
        self.analytics
            .append_prev_collection_pause_end_ms(elapsed_time_ms);
        self.record_pause(PauseKind::Remark, self.mark_remark_start_sec, end_time_sec);
    }

    pub fn record_concurrent_mark_cleanup_start(&mut self) {
        self.mark_cleanup_start_sec = self.clock.now_sec();
    }

    /// Marking finished; decides whether mixed collections follow.
    pub fn record_concurrent_mark_cleanup_end<H: HeapView>(&mut self, heap: &mut H) {
        let mixed_gc_pending =
            self.next_gc_should_be_mixed(heap, "request mixed gcs", "request young-only gcs");
        if !mixed_gc_pending {
            heap.clear_candidates();
            self.abort_time_to_mixed_tracking();
        }
        self.state.set_in_young_gc_before_mixed(mixed_gc_pending);
        self.state.set_mark_or_rebuild_in_progress(false);

        let end_sec = self.clock.now_sec();
        let elapsed_time_ms = (end_sec - self.mark_cleanup_start_sec) * 1000.0;
        self.analytics
            .report_concurrent_mark_cleanup_times_ms(elapsed_time_ms);
        self.analytics
            .append_prev_collection_pause_end_ms(elapsed_time_ms);
        self.record_pause(PauseKind::Cleanup, self.mark_cleanup_start_sec, end_sec);
    }

    // Mixed collections.

    pub fn reclaimable_bytes_percent<H: HeapView>(&self, heap: &H, reclaimable_bytes: usize) -> f64 {
        percent_of(reclaimable_bytes, heap.capacity_bytes())
    }

    /// Whether enough reclaimable space is left in the candidates for another mixed
    /// collection.
    pub fn next_gc_should_be_mixed<H: HeapView>(&self, heap: &H, true_action: &str, false_action: &str) -> bool {
        let candidates = match heap.candidates() {
            Some(candidates) if !candidates.is_empty() => candidates,
            _ => {
                log::debug!(
                    target: "gc::ergo",
                    "{} (candidate old regions not available)",
                    false_action
                );
                return false;
            }
        };

        let reclaimable_bytes = candidates.remaining_reclaimable_bytes();
        let reclaimable_percent = self.reclaimable_bytes_percent(heap, reclaimable_bytes);
        let threshold = self.config.heap_waste_percent as f64;
        let mixed = reclaimable_percent > threshold;
        log::debug!(
            target: "gc::ergo",
            "{} ({}). candidate old regions: {} reclaimable: {} ({:.2}) threshold: {}",
            if mixed { true_action } else { false_action },
            if mixed {
                "candidate old regions available"
            } else {
                "reclaimable percentage not over threshold"
            },
            candidates.num_remaining(),
            reclaimable_bytes,
            reclaimable_percent,
            self.config.heap_waste_percent
        );
        mixed
    }

    pub fn calc_min_old_cset_length<H: HeapView>(&self, heap: &H) -> usize {
        let num_candidates = heap.candidates().map_or(0, |c| c.num_regions());
        cset::calc_min_old_cset_length(num_candidates, self.config.mixed_gc_count_target as usize)
    }

    /// Never below [`Policy::calc_min_old_cset_length`].
    pub fn calc_max_old_cset_length<H: HeapView>(&self, heap: &H) -> usize {
        cset::calc_max_old_cset_length(
            heap.num_regions(),
            self.config.old_cset_region_threshold_percent as usize,
        )
        .max(self.calc_min_old_cset_length(heap))
    }

    /// Sizes the old part of a mixed collection given the pause time left after the
    /// young regions.
    pub fn calculate_old_collection_set_regions<H: HeapView>(
        &self,
        heap: &H,
        time_remaining_ms: f64,
    ) -> CSetBudget {
        let candidates = match heap.candidates() {
            Some(candidates) => candidates,
            None => panic!("sizing old regions of a collection set without candidates"),
        };
        let limits = OldCSetLimits::new(
            candidates,
            heap.num_regions(),
            heap.capacity_bytes(),
            self.config.mixed_gc_count_target as usize,
            self.config.old_cset_region_threshold_percent as usize,
            self.config.heap_waste_percent as usize,
            self.use_adaptive_young_list_length(),
        );
        let budget = cset::calculate_old_collection_set_regions(
            candidates,
            time_remaining_ms,
            &limits,
            |region| self.predict_region_elapsed_time_ms(region, false),
        );
        self.sink.record(PolicyEvent::CollectionSetChosen {
            eden_regions: heap.eden_regions_count(),
            survivor_regions: heap.survivor_regions_count(),
            old: budget,
        });
        budget
    }

    /// Sizes the next round of optional old regions inside a mixed pause.
    pub fn calculate_optional_collection_set_regions<H: HeapView>(
        &self,
        heap: &H,
        max_optional_regions: usize,
        time_remaining_ms: f64,
    ) -> usize {
        assert!(
            self.state.in_mixed_phase(),
            "optional regions only exist in mixed collections"
        );
        let candidates = match heap.candidates() {
            Some(candidates) => candidates,
            None => panic!("optional evacuation without candidates"),
        };
        cset::calculate_optional_collection_set_regions(
            candidates,
            max_optional_regions,
            time_remaining_ms,
            |region| self.predict_region_elapsed_time_ms(region, false),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalation_variants() {
        assert!(!NeverUpgrade.force_upgrade_to_full(GcCause::UserRequested));
        let upgrade = UpgradeFor {
            causes: vec![GcCause::UserRequested],
        };
        assert!(upgrade.force_upgrade_to_full(GcCause::UserRequested));
        assert!(!upgrade.force_upgrade_to_full(GcCause::Allocation));
    }
}
