//! Sizing of the old part of mixed collection sets.
//!
//! Marking produces a list of old regions ranked by how efficiently they can be
//! evacuated. Each mixed collection takes a prefix of what is left of it: an initial part
//! that is evacuated for sure, and an optional part that is only evacuated if the pause has
//! time left after the initial part.
use crate::{heap::RegionInfo, utils::ceil_percent};

/// Share of the remaining pause time the initial old regions may use.
pub const INITIAL_OLD_TIME_FRACTION: f64 = 0.8;
/// Share of the remaining pause time offered to optional old regions.
pub const OPTIONAL_OLD_TIME_FRACTION: f64 = 0.75;

/// Old regions left over from the last marking, most efficient first.
#[derive(Clone, Debug, Default)]
pub struct CollectionSetCandidates {
    regions: Vec<RegionInfo>,
    front: usize,
    remaining_reclaimable_bytes: usize,
}

impl CollectionSetCandidates {
    pub fn new(regions: Vec<RegionInfo>) -> Self {
        for region in regions.iter() {
            assert!(!region.is_young(), "young region {} is not a candidate", region.index);
        }
        let remaining_reclaimable_bytes = regions.iter().map(RegionInfo::reclaimable_bytes).sum();
        Self {
            regions,
            front: 0,
            remaining_reclaimable_bytes,
        }
    }

    /// Number of regions marking selected, including ones already collected.
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn num_remaining(&self) -> usize {
        self.regions.len() - self.front
    }

    pub fn is_empty(&self) -> bool {
        self.num_remaining() == 0
    }

    pub fn remaining(&self) -> &[RegionInfo] {
        &self.regions[self.front..]
    }

    pub fn remaining_reclaimable_bytes(&self) -> usize {
        self.remaining_reclaimable_bytes
    }

    /// Removes the first `count` remaining regions once they were added to a collection set.
    pub fn remove_from_front(&mut self, count: usize) {
        assert!(
            count <= self.num_remaining(),
            "removing {} of {} remaining candidates",
            count,
            self.num_remaining()
        );
        for region in &self.regions[self.front..self.front + count] {
            self.remaining_reclaimable_bytes -= region.reclaimable_bytes();
        }
        self.front += count;
    }
}

/// Minimum old regions per mixed collection: spreads the candidates over
/// `mixed_gc_count_target` collections.
pub fn calc_min_old_cset_length(num_candidates: usize, mixed_gc_count_target: usize) -> usize {
    let gc_num = mixed_gc_count_target.max(1);
    (num_candidates + gc_num - 1) / gc_num
}

/// Maximum old regions per mixed collection, as a share of the whole heap.
pub fn calc_max_old_cset_length(heap_regions: usize, threshold_percent: usize) -> usize {
    ceil_percent(heap_regions, threshold_percent)
}

/// Fixed inputs of one old region selection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OldCSetLimits {
    pub min_length: usize,
    pub max_length: usize,
    pub heap_waste_percent: f64,
    pub capacity_bytes: usize,
    /// Without adaptive young sizing only the minimum is taken.
    pub check_time_remaining: bool,
}

impl OldCSetLimits {
    pub fn new(
        candidates: &CollectionSetCandidates,
        heap_regions: usize,
        capacity_bytes: usize,
        mixed_gc_count_target: usize,
        old_cset_region_threshold_percent: usize,
        heap_waste_percent: usize,
        check_time_remaining: bool,
    ) -> Self {
        let min_length = calc_min_old_cset_length(candidates.num_regions(), mixed_gc_count_target);
        let max_length =
            calc_max_old_cset_length(heap_regions, old_cset_region_threshold_percent).max(min_length);
        Self {
            min_length,
            max_length,
            heap_waste_percent: heap_waste_percent as f64,
            capacity_bytes,
            check_time_remaining,
        }
    }
}

/// Outcome of sizing the old part of a collection set.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CSetBudget {
    /// Pause time left for old regions when sizing started.
    pub time_remaining_ms: f64,
    pub num_initial_regions: usize,
    pub num_optional_regions: usize,
    /// Optional regions that may still be evacuated in this pause.
    pub max_optional_regions: usize,
    pub predicted_initial_time_ms: f64,
    pub predicted_optional_time_ms: f64,
}

/// Splits the remaining candidates into initial and optional regions.
///
/// Regions are taken in order. The first `limits.min_length` are always initial. Past
/// that, regions are added to the initial part while they fit into
/// [`INITIAL_OLD_TIME_FRACTION`] of `time_remaining_ms` and the reclaimable space left
/// behind is still above the heap waste. The rest of the candidates, up to the maximum
/// length, are offered as optional regions within [`OPTIONAL_OLD_TIME_FRACTION`] of
/// `time_remaining_ms`.
pub fn calculate_old_collection_set_regions(
    candidates: &CollectionSetCandidates,
    time_remaining_ms: f64,
    limits: &OldCSetLimits,
    mut predict_time_ms: impl FnMut(&RegionInfo) -> f64,
) -> CSetBudget {
    let time_remaining_ms = time_remaining_ms.max(0.0);
    let mut budget = CSetBudget {
        time_remaining_ms,
        ..Default::default()
    };

    log::debug!(
        target: "gc::ergo::cset",
        "Start adding old regions to collection set. Min {} regions, max {} regions, \
         time remaining {:.2}ms",
        limits.min_length,
        limits.max_length,
        time_remaining_ms
    );

    let initial_budget_ms = time_remaining_ms * INITIAL_OLD_TIME_FRACTION;
    let mut reclaimable_bytes = candidates.remaining_reclaimable_bytes();
    let mut stopped_at_min = false;

    for region in candidates.remaining() {
        if budget.num_initial_regions >= limits.max_length {
            log::debug!(
                target: "gc::ergo::cset",
                "Finish adding old regions to collection set (Maximum number of regions)."
            );
            break;
        }

        let predicted_ms = predict_time_ms(region);
        if budget.num_initial_regions >= limits.min_length {
            if !limits.check_time_remaining {
                log::debug!(
                    target: "gc::ergo::cset",
                    "Finish adding old regions to collection set (Region amount reached min)."
                );
                stopped_at_min = true;
                break;
            }
            let reclaimable_percent =
                crate::utils::percent_of(reclaimable_bytes, limits.capacity_bytes);
            if reclaimable_percent <= limits.heap_waste_percent {
                log::debug!(
                    target: "gc::ergo::cset",
                    "Finish adding old regions to collection set (Reclaimable percentage below \
                     threshold). Reclaimable: {} ({:.2}) threshold: {}%",
                    reclaimable_bytes,
                    reclaimable_percent,
                    limits.heap_waste_percent
                );
                break;
            }
            if budget.predicted_initial_time_ms + predicted_ms > initial_budget_ms {
                log::debug!(
                    target: "gc::ergo::cset",
                    "Finish adding old regions to collection set (Predicted time too high)."
                );
                break;
            }
        }
        budget.predicted_initial_time_ms += predicted_ms;
        budget.num_initial_regions += 1;
        reclaimable_bytes -= region.reclaimable_bytes();
    }

    budget.max_optional_regions = limits.max_length - budget.num_initial_regions;
    if !stopped_at_min && limits.check_time_remaining {
        let rest = &candidates.remaining()[budget.num_initial_regions..];
        let (count, predicted_ms) = take_within_budget(
            rest,
            budget.max_optional_regions,
            time_remaining_ms * OPTIONAL_OLD_TIME_FRACTION,
            &mut predict_time_ms,
        );
        budget.num_optional_regions = count;
        budget.predicted_optional_time_ms = predicted_ms;
    }

    log::debug!(
        target: "gc::ergo::cset",
        "Finish choosing collection set old regions. Initial: {}, optional: {}. Predicted old \
         time: {:.2}ms, predicted optional time: {:.2}ms, time remaining: {:.2}",
        budget.num_initial_regions,
        budget.num_optional_regions,
        budget.predicted_initial_time_ms,
        budget.predicted_optional_time_ms,
        time_remaining_ms
    );
    budget
}

/// Number of remaining candidates to evacuate in the next optional round of a pause.
pub fn calculate_optional_collection_set_regions(
    candidates: &CollectionSetCandidates,
    max_optional_regions: usize,
    time_remaining_ms: f64,
    mut predict_time_ms: impl FnMut(&RegionInfo) -> f64,
) -> usize {
    let (count, predicted_ms) = take_within_budget(
        candidates.remaining(),
        max_optional_regions,
        time_remaining_ms.max(0.0),
        &mut predict_time_ms,
    );
    log::debug!(
        target: "gc::ergo::cset",
        "Prepared {} regions out of {} for optional evacuation. Predicted time: {:.3}ms",
        count,
        max_optional_regions,
        predicted_ms
    );
    count
}

/// Longest prefix of `regions`, at most `max_regions` long, whose cumulative predicted time
/// stays within `budget_ms`. Stops at the first region that does not fit.
fn take_within_budget(
    regions: &[RegionInfo],
    max_regions: usize,
    budget_ms: f64,
    predict_time_ms: &mut impl FnMut(&RegionInfo) -> f64,
) -> (usize, f64) {
    let mut count = 0;
    let mut predicted_ms = 0.0;
    for region in regions.iter().take(max_regions) {
        let region_ms = predict_time_ms(region);
        if predicted_ms + region_ms > budget_ms {
            log::trace!(
                target: "gc::ergo::cset",
                "Prediction {:.3}ms for region {} does not fit remaining time: {:.3}ms.",
                predicted_ms + region_ms,
                region.index,
                budget_ms
            );
            break;
        }
        predicted_ms += region_ms;
        count += 1;
    }
    (count, predicted_ms)
}
