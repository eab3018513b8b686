use std::sync::Arc;

use proptest::prelude::*;

use crate::{
    age_table::AgeTable,
    clock::{Clock, ManualClock},
    config::PolicyConfig,
    cset::CollectionSetCandidates,
    heap::{GcCause, HeapView, RefinementStats, RegionInfo},
    marking::MarkingCycleFlag,
    pause::PauseKind,
    policy::{NeverUpgrade, Policy},
    statistics::{MemorySink, PolicyEvent},
    surv_rate::SurvRateTag,
};

const REGION: usize = 1024 * 1024;
const HEAP_REGIONS: usize = 1000;
const SURVIVORS: usize = 2;

struct FakeHeap {
    free_regions: usize,
    eden: Vec<SurvRateTag>,
    survivors: Vec<RegionInfo>,
    non_young_bytes: usize,
    in_cycle: bool,
    pending_cards: usize,
    refinement: RefinementStats,
    cause: GcCause,
    evacuation_failed: bool,
    candidates: Option<CollectionSetCandidates>,
}

impl FakeHeap {
    fn new() -> Self {
        Self {
            free_regions: 800,
            eden: Vec::new(),
            survivors: Vec::new(),
            non_young_bytes: 0,
            in_cycle: false,
            pending_cards: 0,
            refinement: RefinementStats::default(),
            cause: GcCause::Allocation,
            evacuation_failed: false,
            candidates: None,
        }
    }
}

impl HeapView for FakeHeap {
    fn num_regions(&self) -> usize {
        HEAP_REGIONS
    }

    fn max_expandable_regions(&self) -> usize {
        0
    }

    fn num_free_regions(&self) -> usize {
        self.free_regions
    }

    fn capacity_bytes(&self) -> usize {
        HEAP_REGIONS * REGION
    }

    fn max_capacity_bytes(&self) -> usize {
        HEAP_REGIONS * REGION
    }

    fn non_young_capacity_bytes(&self) -> usize {
        self.non_young_bytes
    }

    fn used_bytes(&self) -> usize {
        self.non_young_bytes + self.young_regions_count() * REGION
    }

    fn eden_regions_count(&self) -> usize {
        self.eden.len()
    }

    fn survivor_regions(&self) -> &[RegionInfo] {
        &self.survivors
    }

    fn concurrent_cycle_in_progress(&self) -> bool {
        self.in_cycle
    }

    fn pending_cards(&self) -> usize {
        self.pending_cards
    }

    fn refinement_stats(&self) -> RefinementStats {
        self.refinement
    }

    fn gc_cause(&self) -> GcCause {
        self.cause
    }

    fn evacuation_failed(&self) -> bool {
        self.evacuation_failed
    }

    fn candidates(&self) -> Option<&CollectionSetCandidates> {
        self.candidates.as_ref()
    }

    fn clear_candidates(&mut self) {
        self.candidates = None;
    }
}

struct Harness {
    policy: Policy,
    heap: FakeHeap,
    clock: Arc<ManualClock>,
    sink: Arc<MemorySink>,
}

impl Harness {
    fn new(config: PolicyConfig) -> Self {
        let heap = FakeHeap::new();
        let clock = Arc::new(ManualClock::new(1.0));
        let sink = Arc::new(MemorySink::new());
        let policy = Policy::with_collaborators(
            config,
            &heap,
            clock.clone(),
            sink.clone(),
            Box::new(NeverUpgrade),
        )
        .unwrap();
        Self {
            policy,
            heap,
            clock,
            sink,
        }
    }

    fn static_ihop() -> Self {
        Self::new(PolicyConfig {
            adaptive_ihop: false,
            ..Default::default()
        })
    }

    /// Fills eden up to the target and lets the mutator run.
    fn mutate(&mut self, ms: f64) {
        let eden_length = self
            .policy
            .young_list_target_length()
            .saturating_sub(self.heap.survivors.len());
        while self.heap.eden.len() < eden_length {
            let tag = self.policy.new_eden_region_tag();
            self.heap.eden.push(tag);
        }
        self.heap.refinement.concurrent_refined_cards += 500;
        self.heap.refinement.concurrent_refinement_time_ms += 1.0;
        self.heap.pending_cards = 200;
        self.clock.advance_ms(ms);
    }

    /// Runs an evacuation pause with cheap, well-behaved costs. Returns how it was
    /// classified.
    fn pause(&mut self, pause_ms: f64) -> PauseKind {
        let h = self;
        h.policy.note_gc_start();
        h.policy.decide_on_conc_mark_initiation(&mut h.heap);
        let start = h.clock.now_sec();
        h.policy.record_collection_pause_start(&h.heap, start);

        let eden = std::mem::take(&mut h.heap.eden);
        let survivors = std::mem::take(&mut h.heap.survivors);
        for tag in eden.iter().copied() {
            h.policy.record_surviving_bytes(tag, REGION / 10);
        }
        for region in survivors.iter() {
            if let Some(tag) = region.surv_rate_tag {
                h.policy.record_surviving_bytes(tag, REGION / 20);
            }
        }

        let mut old_regions = 0;
        if h.policy.collector_state().in_mixed_phase() {
            let budget = h.policy.calculate_old_collection_set_regions(&h.heap, 100.0);
            assert!(budget.num_initial_regions >= h.policy.calc_min_old_cset_length(&h.heap));
            old_regions = budget.num_initial_regions;
            if let Some(candidates) = h.heap.candidates.as_mut() {
                candidates.remove_from_front(old_regions);
            }
        }

        let young_regions = eden.len() + survivors.len();
        {
            let times = h.policy.phase_times_mut();
            times.eden_region_length = eden.len();
            times.survivor_region_length = survivors.len();
            times.old_region_length = old_regions;
            times.par_time_ms = pause_ms * 0.9;
            times.rs_length = 100;
            times.recorded_rs_length = 90;
            times.scanned_cards = 1000;
            times.logged_dirty_cards = 100;
            times.scan_heap_roots_time_ms = 0.5;
            times.merge_log_buffers_time_ms = 0.1;
            times.copied_bytes = young_regions * REGION / 10;
            times.obj_copy_time_ms = 0.01;
            times.young_other_time_ms = 0.0;
        }

        let tags = h.policy.transfer_survivors_to_cset(SURVIVORS, true);
        h.heap.survivors = tags
            .into_iter()
            .enumerate()
            .map(|(i, tag)| RegionInfo::young(i, REGION / 10, 0, tag))
            .collect();

        h.clock.advance_ms(pause_ms);
        let kind = PauseKind::of_young_pause(h.policy.collector_state());
        h.policy.record_collection_pause_end(&mut h.heap, pause_ms);
        h.heap.pending_cards = 0;
        kind
    }

    fn cycle(&mut self) -> PauseKind {
        self.mutate(1000.0);
        self.pause(10.0)
    }

    fn remark_and_cleanup(&mut self, candidates: Option<CollectionSetCandidates>) {
        self.clock.advance_ms(500.0);
        self.policy.record_concurrent_mark_remark_start();
        self.clock.advance_ms(5.0);
        self.policy.record_concurrent_mark_remark_end();
        self.clock.advance_ms(100.0);
        self.heap.candidates = candidates;
        self.policy.record_concurrent_mark_cleanup_start();
        self.clock.advance_ms(2.0);
        self.policy.record_concurrent_mark_cleanup_end(&mut self.heap);
        self.heap.in_cycle = false;
    }

    fn pauses_of(&self, kind: PauseKind) -> usize {
        self.sink
            .count(|e| matches!(e, PolicyEvent::PauseRecorded { kind: k, .. } if *k == kind))
    }
}

/// 100 old regions with nothing live, 10% of the heap reclaimable.
fn reclaimable_candidates() -> CollectionSetCandidates {
    CollectionSetCandidates::new(
        (0..100)
            .map(|i| RegionInfo::old(200 + i, REGION, 0, 0))
            .collect(),
    )
}

fn static_threshold() -> usize {
    HEAP_REGIONS * REGION / 100 * 45
}

#[test]
fn test_initial_targets() {
    let h = Harness::new(PolicyConfig::default());
    let target = h.policy.young_list_target_length();
    // 5% .. 60% of the heap, at most the free regions outside the 10% reserve.
    assert!(target >= 50 && target <= 600, "target {}", target);
    assert_eq!(h.policy.reserve_regions(), 100);
    let expansion = (target as f64 * 0.05).ceil() as usize;
    assert_eq!(h.policy.young_list_max_length(), target + expansion);
    assert_eq!(h.policy.tenuring_threshold(), 15);
    assert!(h
        .sink
        .count(|e| matches!(e, PolicyEvent::YoungTargetUpdated { .. }))
        >= 1);
}

#[test]
fn test_cheap_young_pauses_grow_the_young_generation() {
    let mut h = Harness::new(PolicyConfig::default());
    let initial = h.policy.young_list_target_length();
    for _ in 0..25 {
        assert_eq!(h.cycle(), PauseKind::YoungOnly);
    }
    let target = h.policy.young_list_target_length();
    assert!(target > initial, "target {} initial {}", target, initial);
    assert!(target <= 600);
    assert!(h.policy.should_allocate_mutator_region(&h.heap));
    assert!(h.policy.can_expand_young_list(&h.heap));
    assert!(h.policy.analytics().num_alloc_rate_ms() > 3);
    assert_eq!(h.pauses_of(PauseKind::YoungOnly), 25);

    let stats = h.policy.statistics(&h.heap);
    assert_eq!(stats.pause_totals(PauseKind::YoungOnly).count, 25);
    assert_eq!(stats.young_list_target_length, target);
    assert!(stats.to_string().contains("Pause Young (Normal): 25 pauses"));
}

#[test]
fn test_evacuation_failure_skips_cost_updates() {
    let mut h = Harness::new(PolicyConfig::default());
    h.heap.evacuation_failed = true;
    for _ in 0..5 {
        h.cycle();
    }
    assert_eq!(h.policy.analytics().num_alloc_rate_ms(), 0);
    assert_eq!(h.pauses_of(PauseKind::YoungOnly), 5);
}

#[test]
fn test_marking_cycle_through_mixed_phase() {
    let mut h = Harness::static_ihop();
    assert_eq!(h.policy.ihop_threshold(), static_threshold());
    h.heap.non_young_bytes = 500 * REGION;

    // Crossing the threshold raises a request at the end of the pause.
    assert_eq!(h.cycle(), PauseKind::YoungOnly);
    assert_eq!(
        h.policy.marking_handle().state(),
        MarkingCycleFlag::InitiationRequested
    );

    assert_eq!(h.cycle(), PauseKind::InitialMark);
    assert!(h.policy.collector_state().mark_or_rebuild_in_progress());
    assert_eq!(h.policy.marking_handle().state(), MarkingCycleFlag::Idle);
    assert_eq!(
        h.sink.count(|e| matches!(
            e,
            PolicyEvent::MarkingDecision {
                initiated: true,
                ..
            }
        )),
        1
    );

    // Young pauses while marking runs do not request another cycle.
    h.heap.in_cycle = true;
    assert_eq!(h.cycle(), PauseKind::YoungOnly);
    assert_eq!(h.policy.marking_handle().state(), MarkingCycleFlag::Idle);

    h.remark_and_cleanup(Some(reclaimable_candidates()));
    assert!(h.policy.collector_state().in_young_gc_before_mixed());
    assert!(!h.policy.collector_state().mark_or_rebuild_in_progress());
    assert_eq!(h.pauses_of(PauseKind::Remark), 1);
    assert_eq!(h.pauses_of(PauseKind::Cleanup), 1);

    assert_eq!(h.cycle(), PauseKind::LastYoung);
    assert!(h.policy.collector_state().in_mixed_phase());
    // Mixed collections keep eden at its minimum.
    assert_eq!(h.policy.young_list_target_length(), 50);

    let mut mixed = 0;
    while !h.policy.collector_state().in_young_only_phase() {
        assert_eq!(h.cycle(), PauseKind::Mixed);
        mixed += 1;
        assert!(mixed <= 8, "mixed phase did not end");
    }
    assert!(mixed >= 1);
    assert!(h.heap.candidates.is_none());
    assert!(h.sink.count(|e| matches!(e, PolicyEvent::CollectionSetChosen { .. })) >= 1);

    // Occupancy is still above the threshold, so the next cycle is requested right away.
    assert_eq!(
        h.policy.marking_handle().state(),
        MarkingCycleFlag::InitiationRequested
    );
}

#[test]
fn test_request_after_initial_mark_survives_init_end() {
    let mut h = Harness::static_ihop();
    h.policy.marking_handle().request();
    assert_eq!(h.cycle(), PauseKind::InitialMark);
    assert_eq!(h.policy.marking_handle().state(), MarkingCycleFlag::Idle);

    assert!(h.policy.marking_handle().request());
    h.policy.record_concurrent_mark_init_end();
    assert_eq!(
        h.policy.marking_handle().state(),
        MarkingCycleFlag::InitiationRequested
    );
}

#[test]
fn test_cleanup_without_enough_garbage_returns_to_young_only() {
    let mut h = Harness::static_ihop();
    h.policy.marking_handle().request();
    assert_eq!(h.cycle(), PauseKind::InitialMark);
    h.heap.in_cycle = true;

    // 2% reclaimable, below the 5% waste.
    let candidates = CollectionSetCandidates::new(
        (0..20)
            .map(|i| RegionInfo::old(300 + i, REGION, 0, 0))
            .collect(),
    );
    h.remark_and_cleanup(Some(candidates));
    assert!(!h.policy.collector_state().in_young_gc_before_mixed());
    assert!(h.heap.candidates.is_none());
    assert_eq!(h.cycle(), PauseKind::YoungOnly);
}

#[test]
fn test_requests_from_other_threads_start_one_cycle() {
    let mut h = Harness::static_ihop();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let marking = h.policy.marking_handle();
            std::thread::spawn(move || marking.request())
        })
        .collect();
    let raised = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .filter(|raised| *raised)
        .count();
    assert_eq!(raised, 1);

    assert_eq!(h.cycle(), PauseKind::InitialMark);
    assert_eq!(h.cycle(), PauseKind::YoungOnly);
    assert_eq!(h.pauses_of(PauseKind::InitialMark), 1);
}

#[test]
fn test_request_during_running_cycle_is_postponed() {
    let mut h = Harness::static_ihop();
    h.heap.in_cycle = true;
    h.policy.marking_handle().request();

    assert_eq!(h.cycle(), PauseKind::YoungOnly);
    assert!(h.policy.marking_handle().is_requested());
    assert_eq!(
        h.sink.count(|e| matches!(
            e,
            PolicyEvent::MarkingDecision {
                initiated: false,
                ..
            }
        )),
        1
    );

    h.heap.in_cycle = false;
    assert_eq!(h.cycle(), PauseKind::InitialMark);
}

#[test]
fn test_user_requested_cycle_abandons_pending_mixed_phase() {
    let mut h = Harness::static_ihop();
    h.policy.marking_handle().request();
    assert_eq!(h.cycle(), PauseKind::InitialMark);
    h.heap.in_cycle = true;
    h.remark_and_cleanup(Some(reclaimable_candidates()));
    assert!(h.policy.collector_state().in_young_gc_before_mixed());

    h.heap.cause = GcCause::UserRequestedConcurrent;
    assert!(h
        .policy
        .force_initial_mark_if_outside_cycle(&h.heap, GcCause::UserRequestedConcurrent));
    assert_eq!(h.cycle(), PauseKind::InitialMark);
    assert!(h.heap.candidates.is_none());
    assert!(h.policy.collector_state().in_young_only_phase());
    assert!(!h.policy.collector_state().in_young_gc_before_mixed());

    h.heap.in_cycle = true;
    assert!(!h
        .policy
        .force_initial_mark_if_outside_cycle(&h.heap, GcCause::UserRequestedConcurrent));
}

#[test]
fn test_full_collection_resets_the_cycle() {
    let mut h = Harness::static_ihop();
    h.policy.marking_handle().request();
    h.cycle();
    h.heap.in_cycle = true;
    h.remark_and_cleanup(Some(reclaimable_candidates()));
    h.mutate(1000.0);

    h.heap.in_cycle = false;
    h.policy.record_full_collection_start(&mut h.heap);
    assert!(h.policy.collector_state().in_full_gc());
    assert!(h.heap.candidates.is_none());
    h.clock.advance_ms(300.0);
    h.heap.eden.clear();
    h.heap.survivors.clear();
    h.heap.non_young_bytes = 100 * REGION;
    h.policy.record_full_collection_end(&h.heap);

    let state = h.policy.collector_state();
    assert!(!state.in_full_gc());
    assert!(state.in_young_only_phase());
    assert!(!state.in_young_gc_before_mixed());
    assert!(!state.mark_or_rebuild_in_progress());
    assert_eq!(h.policy.marking_handle().state(), MarkingCycleFlag::Idle);
    assert_eq!(h.pauses_of(PauseKind::Full), 1);
    let totals = h.policy.analytics().pause_totals(PauseKind::Full);
    assert!((totals.total_ms - 300.0).abs() < 1e-6);

    assert_eq!(h.cycle(), PauseKind::YoungOnly);
}

#[test]
fn test_full_collection_requests_marking_when_still_occupied() {
    let mut h = Harness::static_ihop();
    h.policy.record_full_collection_start(&mut h.heap);
    h.clock.advance_ms(100.0);
    h.heap.non_young_bytes = static_threshold() + REGION;
    h.policy.record_full_collection_end(&h.heap);
    assert!(h.policy.marking_handle().is_requested());
}

#[test]
fn test_periodic_collections_do_not_feed_ihop() {
    let mut h = Harness::new(PolicyConfig::default());
    let ihop_events = |h: &Harness| h.sink.count(|e| matches!(e, PolicyEvent::Ihop(_)));

    h.cycle();
    let after_normal = ihop_events(&h);
    assert_eq!(after_normal, 1);

    h.heap.cause = GcCause::PeriodicCollection;
    h.cycle();
    assert_eq!(ihop_events(&h), after_normal);

    // A periodic initial mark does not start measuring the marking length.
    h.policy.marking_handle().request();
    assert_eq!(h.cycle(), PauseKind::InitialMark);
    h.heap.cause = GcCause::Allocation;
    h.heap.in_cycle = true;
    h.remark_and_cleanup(Some(reclaimable_candidates()));
    assert_eq!(h.cycle(), PauseKind::LastYoung);
    let before_mixed = ihop_events(&h);
    assert_eq!(h.cycle(), PauseKind::Mixed);
    assert_eq!(ihop_events(&h), before_mixed);
}

#[test]
fn test_tenuring_threshold_follows_age_table() {
    let mut h = Harness::new(PolicyConfig::default());
    h.cycle();

    let mut table = AgeTable::new();
    table.add(1, REGION / 4);
    table.add(2, 1000 * REGION);
    h.policy.record_age_table(&table);
    h.cycle();
    assert_eq!(h.policy.tenuring_threshold(), 2);
    assert_eq!(
        h.sink
            .count(|e| matches!(e, PolicyEvent::Tenuring { threshold: 2, .. })),
        1
    );

    // Nothing recorded in the last pause: everything fits.
    h.cycle();
    assert_eq!(h.policy.tenuring_threshold(), 15);

    h.policy.note_survivor_space_exhausted();
    assert_eq!(h.policy.tenuring_threshold(), 0);
}

#[test]
fn test_no_survivor_space_promotes_everything() {
    let mut h = Harness::new(PolicyConfig {
        target_survivor_ratio: 0,
        ..Default::default()
    });
    h.cycle();
    assert_eq!(h.policy.tenuring_threshold(), 0);
    assert!(h.policy.max_survivor_regions() > 0);
}

#[test]
fn test_refinement_goal() {
    let mut h = Harness::new(PolicyConfig::default());
    h.cycle();
    // 10% of the 200ms goal, nothing spent on the hot card cache.
    assert!((h.policy.refinement_time_goal_ms() - 20.0).abs() < 1e-9);
    assert_eq!(
        h.sink.count(|e| matches!(e, PolicyEvent::RefinementGoal { .. })),
        1
    );
}

#[test]
fn test_revised_rs_length_shrinks_target() {
    let mut h = Harness::new(PolicyConfig::default());
    for _ in 0..10 {
        h.cycle();
    }
    let before = h.policy.young_list_target_length();
    h.policy
        .revise_young_list_target_length_if_necessary(&h.heap, 10_000_000);
    assert_eq!(h.policy.rs_length_prediction(), 11_000_000);
    assert!(h.policy.young_list_target_length() <= before);

    // Below the prediction nothing changes.
    h.policy
        .revise_young_list_target_length_if_necessary(&h.heap, 10);
    assert_eq!(h.policy.rs_length_prediction(), 11_000_000);
}

#[test]
fn test_fixed_young_length() {
    let h = Harness::new(PolicyConfig {
        new_size_bytes: Some(64 * REGION),
        max_new_size_bytes: Some(64 * REGION),
        ..Default::default()
    });
    assert!(!h.policy.use_adaptive_young_list_length());
    assert_eq!(h.policy.young_list_target_length(), 64);
}

#[test]
fn test_invalid_config_is_rejected() {
    let heap = FakeHeap::new();
    let config = PolicyConfig {
        pause_interval_ms: 100.0,
        ..Default::default()
    };
    assert!(Policy::new(config, &heap).is_err());
}

#[test]
fn test_predicted_copy_bytes() {
    let mut h = Harness::new(PolicyConfig::default());
    let old = RegionInfo::old(7, REGION, REGION / 2, 10);
    assert_eq!(h.policy.predict_bytes_to_copy(&old), REGION / 2);

    let tag = h.policy.new_eden_region_tag();
    let young = RegionInfo::young(8, REGION, 0, tag);
    let bytes = h.policy.predict_bytes_to_copy(&young);
    assert!(bytes > 0 && bytes <= REGION);
    assert!(h.policy.predict_region_elapsed_time_ms(&young, true) > 0.0);
}

fn old_candidates(count: usize) -> CollectionSetCandidates {
    CollectionSetCandidates::new(
        (0..count)
            .map(|i| RegionInfo::old(i, REGION, 0, 0))
            .collect(),
    )
}

#[test]
fn test_old_cset_maximum_covers_minimum() {
    let mut h = Harness::new(PolicyConfig::default());
    h.heap.candidates = Some(old_candidates(900));
    let min = h.policy.calc_min_old_cset_length(&h.heap);
    let max = h.policy.calc_max_old_cset_length(&h.heap);
    assert_eq!(min, 113);
    assert_eq!(max, 113);

    let budget = h.policy.calculate_old_collection_set_regions(&h.heap, 1000.0);
    assert!(budget.num_initial_regions >= min);
    assert!(budget.num_initial_regions <= max);
}

proptest! {
    #[test]
    fn prop_policy_old_cset_bounds_ordered(
        num_candidates in 0usize..=HEAP_REGIONS,
        count_target in 1u32..64,
        threshold in 0u32..=100,
    ) {
        let mut heap = FakeHeap::new();
        let config = PolicyConfig {
            mixed_gc_count_target: count_target,
            old_cset_region_threshold_percent: threshold,
            ..Default::default()
        };
        let policy = Policy::new(config, &heap).unwrap();
        heap.candidates = Some(old_candidates(num_candidates));
        let min = policy.calc_min_old_cset_length(&heap);
        let max = policy.calc_max_old_cset_length(&heap);
        prop_assert!(min <= max);

        let budget = policy.calculate_old_collection_set_regions(&heap, 50.0);
        prop_assert!(budget.num_initial_regions <= max);
    }
}
