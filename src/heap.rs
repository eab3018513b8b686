//! What the policy needs to know about the heap.
//!
//! The heap and its regions are owned by the collector. The policy reads them through
//! [`HeapView`] at the points where it makes decisions and never keeps references across
//! calls.
use crate::{cset::CollectionSetCandidates, surv_rate::SurvRateTag};

/// Reason a collection was started.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum GcCause {
    /// Eden is full.
    Allocation,
    /// A large allocation pushed old generation occupancy over the threshold.
    HumongousAllocation,
    /// Explicit request for a full collection.
    UserRequested,
    /// Explicit request that should be served by a concurrent cycle.
    UserRequestedConcurrent,
    /// Collection triggered by a timer while the application is idle.
    PeriodicCollection,
    /// Allocation stalled behind a thread in a critical region.
    GcLocker,
}

impl GcCause {
    pub fn name(self) -> &'static str {
        match self {
            GcCause::Allocation => "Allocation Failure",
            GcCause::HumongousAllocation => "Humongous Allocation",
            GcCause::UserRequested => "User Requested",
            GcCause::UserRequestedConcurrent => "User Requested Concurrent",
            GcCause::PeriodicCollection => "Periodic Collection",
            GcCause::GcLocker => "GCLocker Initiated GC",
        }
    }

    pub fn is_user_requested_concurrent(self) -> bool {
        self == GcCause::UserRequestedConcurrent
    }
}

impl std::fmt::Display for GcCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The parts of a region that feed its evacuation cost prediction.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RegionInfo {
    pub index: usize,
    pub used_bytes: usize,
    /// Live bytes as determined by the last marking. Only meaningful for old regions.
    pub live_bytes: usize,
    /// Remembered set entries.
    pub rs_length: usize,
    /// Set for young regions.
    pub surv_rate_tag: Option<SurvRateTag>,
}

impl RegionInfo {
    pub fn old(index: usize, used_bytes: usize, live_bytes: usize, rs_length: usize) -> Self {
        assert!(
            live_bytes <= used_bytes,
            "region {} has more live ({}) than used ({}) bytes",
            index,
            live_bytes,
            used_bytes
        );
        Self {
            index,
            used_bytes,
            live_bytes,
            rs_length,
            surv_rate_tag: None,
        }
    }

    pub fn young(index: usize, used_bytes: usize, rs_length: usize, tag: SurvRateTag) -> Self {
        Self {
            index,
            used_bytes,
            live_bytes: used_bytes,
            rs_length,
            surv_rate_tag: Some(tag),
        }
    }

    pub fn is_young(&self) -> bool {
        self.surv_rate_tag.is_some()
    }

    /// Bytes freed by evacuating this region.
    pub fn reclaimable_bytes(&self) -> usize {
        self.used_bytes - self.live_bytes
    }
}

/// Running totals of card refinement done outside pauses.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct RefinementStats {
    pub concurrent_refined_cards: usize,
    pub concurrent_refinement_time_ms: f64,
    pub mutator_refined_cards: usize,
}

pub trait HeapView {
    /// Committed regions.
    fn num_regions(&self) -> usize;

    /// Regions the heap may still commit.
    fn max_expandable_regions(&self) -> usize;

    fn num_free_regions(&self) -> usize;

    fn num_free_or_available_regions(&self) -> usize {
        self.num_free_regions() + self.max_expandable_regions()
    }

    fn capacity_bytes(&self) -> usize;

    fn max_capacity_bytes(&self) -> usize;

    /// Occupancy of everything outside the young generation.
    fn non_young_capacity_bytes(&self) -> usize;

    fn used_bytes(&self) -> usize;

    fn eden_regions_count(&self) -> usize;

    fn survivor_regions(&self) -> &[RegionInfo];

    fn survivor_regions_count(&self) -> usize {
        self.survivor_regions().len()
    }

    fn young_regions_count(&self) -> usize {
        self.eden_regions_count() + self.survivor_regions_count()
    }

    /// Whether a concurrent marking cycle is running, including its cleanup.
    fn concurrent_cycle_in_progress(&self) -> bool;

    /// Logged cards not yet refined.
    fn pending_cards(&self) -> usize;

    fn refinement_stats(&self) -> RefinementStats;

    fn gc_cause(&self) -> GcCause;

    fn evacuation_failed(&self) -> bool;

    /// Old regions chosen by the last marking, if any are left.
    fn candidates(&self) -> Option<&CollectionSetCandidates>;

    fn clear_candidates(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_info() {
        let region = RegionInfo::old(3, 1000, 400, 12);
        assert!(!region.is_young());
        assert_eq!(region.reclaimable_bytes(), 600);
    }

    #[test]
    #[should_panic]
    fn test_live_above_used_panics() {
        RegionInfo::old(0, 10, 11, 0);
    }

    #[test]
    fn test_cause_names() {
        assert_eq!(GcCause::PeriodicCollection.to_string(), "Periodic Collection");
        assert!(GcCause::UserRequestedConcurrent.is_user_requested_concurrent());
        assert!(!GcCause::UserRequested.is_user_requested_concurrent());
    }
}
