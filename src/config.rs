use crate::{
    age_table::TABLE_SIZE,
    error::{ConfigError, ConfigResult},
};

/// Configuration for [`Policy`](crate::policy::Policy). Read once at startup and never changed
/// afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyConfig {
    /// Size of a single heap region. Must be a power of two.
    pub region_size_bytes: usize,
    /// Soft upper bound on the duration of a single stop-the-world pause.
    pub pause_time_goal_ms: f64,
    /// Length of the sliding window the pause time goal is enforced over. Must be greater
    /// than `pause_time_goal_ms`.
    pub pause_interval_ms: f64,
    /// Minimum young generation size as a percentage of the heap.
    pub new_size_percent: u32,
    /// Maximum young generation size as a percentage of the heap.
    pub max_new_size_percent: u32,
    /// Explicit minimum young generation size. Overrides `new_size_percent`.
    pub new_size_bytes: Option<usize>,
    /// Explicit maximum young generation size. Overrides `max_new_size_percent`.
    pub max_new_size_bytes: Option<usize>,
    /// Fixed old/young ratio. Ignored when explicit sizes are given.
    pub new_ratio: Option<u32>,
    /// Percentage of the heap kept free to absorb evacuation failures.
    pub reserve_percent: u32,
    /// Percentage of the heap that may stay uncollected after mixed collections.
    pub heap_waste_percent: u32,
    /// Number of mixed collections candidate regions should be spread over.
    pub mixed_gc_count_target: u32,
    /// Upper bound on old regions per mixed collection, as a percentage of the heap.
    pub old_cset_region_threshold_percent: u32,
    /// Confidence in predictions. Lower values add more headroom.
    pub confidence_percent: u32,
    /// Expected waste in promotion buffers while copying.
    pub target_plab_waste_percent: u32,
    /// Young target length / survivor regions.
    pub survivor_ratio: u32,
    /// Desired survivor space utilisation after a pause.
    pub target_survivor_ratio: u32,
    pub max_tenuring_threshold: u32,
    /// Old generation occupancy, as percentage of capacity, that starts marking before the
    /// adaptive controller has enough samples (or always, when adaptive IHOP is off).
    pub initiating_heap_occupancy_percent: u32,
    pub adaptive_ihop: bool,
    /// Samples of both marking length and promotion rate needed before adaptive IHOP
    /// trusts its own prediction.
    pub adaptive_ihop_initial_samples: usize,
    /// Share of the pause time goal granted to processing logged cards during a pause.
    pub refinement_pause_time_percent: u32,
    /// How much eden may grow past the target while allocation is stalled by a GC locker.
    pub gc_locker_eden_expansion_percent: u32,
    /// Number of parallel workers used in pauses. Selects the initial cost estimates.
    pub parallel_gc_threads: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            region_size_bytes: 1024 * 1024,
            pause_time_goal_ms: 200.0,
            pause_interval_ms: 201.0,
            new_size_percent: 5,
            max_new_size_percent: 60,
            new_size_bytes: None,
            max_new_size_bytes: None,
            new_ratio: None,
            reserve_percent: 10,
            heap_waste_percent: 5,
            mixed_gc_count_target: 8,
            old_cset_region_threshold_percent: 10,
            confidence_percent: 50,
            target_plab_waste_percent: 10,
            survivor_ratio: 8,
            target_survivor_ratio: 50,
            max_tenuring_threshold: 15,
            initiating_heap_occupancy_percent: 45,
            adaptive_ihop: true,
            adaptive_ihop_initial_samples: 3,
            refinement_pause_time_percent: 10,
            gc_locker_eden_expansion_percent: 5,
            parallel_gc_threads: 4,
        }
    }
}

impl PolicyConfig {
    /// Checks that every option is within its valid range.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.region_size_bytes.is_power_of_two() {
            return Err(ConfigError::RegionSize(self.region_size_bytes));
        }
        if !(self.pause_time_goal_ms > 0.0) {
            return Err(ConfigError::PauseGoal(self.pause_time_goal_ms));
        }
        if self.pause_interval_ms <= self.pause_time_goal_ms {
            return Err(ConfigError::PauseInterval {
                goal_ms: self.pause_time_goal_ms,
                interval_ms: self.pause_interval_ms,
            });
        }

        let percents = [
            ("new_size_percent", self.new_size_percent),
            ("max_new_size_percent", self.max_new_size_percent),
            ("reserve_percent", self.reserve_percent),
            ("heap_waste_percent", self.heap_waste_percent),
            (
                "old_cset_region_threshold_percent",
                self.old_cset_region_threshold_percent,
            ),
            ("confidence_percent", self.confidence_percent),
            ("target_plab_waste_percent", self.target_plab_waste_percent),
            ("target_survivor_ratio", self.target_survivor_ratio),
            (
                "initiating_heap_occupancy_percent",
                self.initiating_heap_occupancy_percent,
            ),
            (
                "refinement_pause_time_percent",
                self.refinement_pause_time_percent,
            ),
            (
                "gc_locker_eden_expansion_percent",
                self.gc_locker_eden_expansion_percent,
            ),
        ];
        for &(name, value) in percents.iter() {
            if value > 100 {
                return Err(ConfigError::Percent {
                    name,
                    value: value as f64,
                });
            }
        }
        if self.confidence_percent == 0 {
            return Err(ConfigError::ZeroRatio("confidence_percent"));
        }
        if self.survivor_ratio == 0 {
            return Err(ConfigError::ZeroRatio("survivor_ratio"));
        }
        if self.parallel_gc_threads == 0 {
            return Err(ConfigError::ZeroRatio("parallel_gc_threads"));
        }
        if self.new_size_percent > self.max_new_size_percent {
            return Err(ConfigError::young_size(format!(
                "new_size_percent ({}) exceeds max_new_size_percent ({})",
                self.new_size_percent, self.max_new_size_percent
            )));
        }
        if let Some(0) = self.new_ratio {
            return Err(ConfigError::ZeroRatio("new_ratio"));
        }
        if self.mixed_gc_count_target == 0 {
            return Err(ConfigError::MixedGcCountTarget);
        }
        if self.max_tenuring_threshold as usize >= TABLE_SIZE {
            return Err(ConfigError::TenuringThreshold(
                self.max_tenuring_threshold,
                TABLE_SIZE,
            ));
        }
        Ok(())
    }

    /// Pause time goal in seconds.
    pub fn max_gc_time_sec(&self) -> f64 {
        self.pause_time_goal_ms / 1000.0
    }

    pub fn pause_interval_sec(&self) -> f64 {
        self.pause_interval_ms / 1000.0
    }

    /// Sigma applied to the standard deviation of every prediction.
    pub fn prediction_sigma(&self) -> f64 {
        self.confidence_percent as f64 / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(PolicyConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_interval_below_goal() {
        let config = PolicyConfig {
            pause_time_goal_ms: 50.0,
            pause_interval_ms: 50.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PauseInterval { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_percent_and_region_size() {
        let config = PolicyConfig {
            heap_waste_percent: 101,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Percent {
                name: "heap_waste_percent",
                ..
            })
        ));

        let config = PolicyConfig {
            region_size_bytes: 3000,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::RegionSize(3000)));
    }

    #[test]
    fn test_rejects_inverted_young_percents() {
        let config = PolicyConfig {
            new_size_percent: 70,
            max_new_size_percent: 60,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::YoungSize(_))));
    }

    #[test]
    fn test_rejects_tenuring_threshold_outside_table() {
        let config = PolicyConfig {
            max_tenuring_threshold: 16,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TenuringThreshold(16, TABLE_SIZE))
        );
    }
}
