//! Young generation sizing.
//!
//! [`YoungGenSizer`] turns the configured bounds into region counts for the current heap
//! size. [`YoungGenBounds`] combines them with survivor and free region counts at the end
//! of a pause, and [`YoungLengthPredictor`] decides which eden lengths fit the pause time
//! goal.
use crate::{
    analytics::Analytics,
    config::PolicyConfig,
    error::{ConfigError, ConfigResult},
    surv_rate::SurvRateGroup,
};

/// How the young generation bounds were configured.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum YoungGenSizerKind {
    /// Both bounds are percentages of the heap.
    Defaults,
    /// Explicit minimum, maximum is a percentage of the heap.
    NewSizeOnly,
    /// Explicit maximum, minimum is a percentage of the heap.
    MaxNewSizeOnly,
    MaxAndNewSize,
    /// Young generation is a fixed fraction `1 / (new_ratio + 1)` of the heap.
    NewRatio,
}

#[derive(Clone, Debug)]
pub struct YoungGenSizer {
    kind: YoungGenSizerKind,
    adaptive_size: bool,
    new_size_percent: usize,
    max_new_size_percent: usize,
    new_ratio: usize,
    min_desired_young_length: usize,
    max_desired_young_length: usize,
}

impl YoungGenSizer {
    pub fn new(config: &PolicyConfig) -> ConfigResult<Self> {
        let region = config.region_size_bytes;
        let mut sizer = Self {
            kind: YoungGenSizerKind::Defaults,
            adaptive_size: true,
            new_size_percent: config.new_size_percent as usize,
            max_new_size_percent: config.max_new_size_percent as usize,
            new_ratio: 0,
            min_desired_young_length: 0,
            max_desired_young_length: 0,
        };

        if let Some(new_ratio) = config.new_ratio {
            if config.new_size_bytes.is_some() || config.max_new_size_bytes.is_some() {
                log::warn!(
                    target: "gc::ergo",
                    "new_ratio was set together with an explicit young size; ignoring new_ratio"
                );
            } else {
                sizer.kind = YoungGenSizerKind::NewRatio;
                sizer.adaptive_size = false;
                sizer.new_ratio = new_ratio as usize;
                return Ok(sizer);
            }
        }

        match (config.new_size_bytes, config.max_new_size_bytes) {
            (Some(min), Some(max)) => {
                if min > max {
                    return Err(ConfigError::young_size(format!(
                        "new_size_bytes ({}) exceeds max_new_size_bytes ({})",
                        min, max
                    )));
                }
                sizer.min_desired_young_length = (min / region).max(1);
                sizer.max_desired_young_length = (max / region).max(1);
                sizer.kind = YoungGenSizerKind::MaxAndNewSize;
                sizer.adaptive_size =
                    sizer.min_desired_young_length != sizer.max_desired_young_length;
            }
            (Some(min), None) => {
                sizer.min_desired_young_length = (min / region).max(1);
                sizer.kind = YoungGenSizerKind::NewSizeOnly;
            }
            (None, Some(max)) => {
                sizer.max_desired_young_length = (max / region).max(1);
                sizer.kind = YoungGenSizerKind::MaxNewSizeOnly;
            }
            (None, None) => {}
        }
        Ok(sizer)
    }

    pub fn kind(&self) -> YoungGenSizerKind {
        self.kind
    }

    /// Whether the young generation length is chosen by pause time prediction.
    pub fn adaptive_young_list_length(&self) -> bool {
        self.adaptive_size
    }

    pub fn min_desired_young_length(&self) -> usize {
        self.min_desired_young_length
    }

    pub fn max_desired_young_length(&self) -> usize {
        self.max_desired_young_length
    }

    fn default_min_length(&self, heap_regions: usize) -> usize {
        (heap_regions * self.new_size_percent / 100).max(1)
    }

    fn default_max_length(&self, heap_regions: usize) -> usize {
        (heap_regions * self.max_new_size_percent / 100).max(1)
    }

    /// Recomputes the bounds for a heap of `heap_regions` regions.
    pub fn heap_size_changed(&mut self, heap_regions: usize) {
        assert!(heap_regions > 0, "heap must have at least one region");
        match self.kind {
            YoungGenSizerKind::Defaults => {
                self.min_desired_young_length = self.default_min_length(heap_regions);
                self.max_desired_young_length = self.default_max_length(heap_regions);
            }
            YoungGenSizerKind::NewSizeOnly => {
                self.max_desired_young_length = self
                    .default_max_length(heap_regions)
                    .max(self.min_desired_young_length);
            }
            YoungGenSizerKind::MaxNewSizeOnly => {
                self.min_desired_young_length = self
                    .default_min_length(heap_regions)
                    .min(self.max_desired_young_length);
            }
            YoungGenSizerKind::MaxAndNewSize => {}
            YoungGenSizerKind::NewRatio => {
                self.min_desired_young_length = (heap_regions / (self.new_ratio + 1)).max(1);
                self.max_desired_young_length = self.min_desired_young_length;
            }
        }
        debug_assert!(self.min_desired_young_length <= self.max_desired_young_length);
    }
}

/// Region count bounds for the young generation of the next mutator phase.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct YoungGenBounds {
    /// Set when the young generation is not sized adaptively.
    pub fixed_length: Option<usize>,
    pub min_desired: usize,
    pub max_desired: usize,
    /// Free regions minus the reserve.
    pub max_allowed: usize,
}

/// Result of sizing the young generation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct YoungTargetLengths {
    /// Target clamped to the desired bounds and the free regions.
    pub bounded: usize,
    /// What pause time prediction alone asked for.
    pub unbounded: usize,
}

impl YoungGenBounds {
    /// Computes the target lengths.
    ///
    /// `base_min_length` regions (the survivors) are already part of the young
    /// generation; `fits` is asked about eden lengths on top of them and must be monotone,
    /// i.e. if a length does not fit no longer length does. Without `search` (during the
    /// mixed phase) the target is the minimum so the next mixed collection comes as soon
    /// as possible.
    pub fn target_lengths(
        &self,
        base_min_length: usize,
        search: bool,
        fits: impl FnMut(usize) -> bool,
    ) -> YoungTargetLengths {
        let unbounded = match self.fixed_length {
            Some(fixed) => fixed,
            None if search => self.search_target_length(base_min_length, fits),
            None => self.min_desired,
        };

        let max_length = self.max_desired.min(self.max_allowed);
        // The minimum wins if the two clash.
        let bounded = unbounded.min(max_length).max(self.min_desired);
        YoungTargetLengths { bounded, unbounded }
    }

    fn search_target_length(&self, base_min_length: usize, fits: impl FnMut(usize) -> bool) -> usize {
        if self.max_desired <= self.min_desired {
            return self.min_desired;
        }
        assert!(
            self.min_desired > base_min_length,
            "desired minimum {} must leave room for eden on top of {} survivors",
            self.min_desired,
            base_min_length
        );
        let min_young = self.min_desired - base_min_length;
        let max_young = self.max_desired - base_min_length;
        base_min_length + largest_fitting_length(min_young, max_young, fits)
    }
}

/// Largest length in `[min, max]` for which `fits` holds, or `min` if none does.
///
/// Relies on `fits` being monotone: both endpoints are checked first and the rest is a
/// binary search over the lengths in between.
pub fn largest_fitting_length(min: usize, max: usize, mut fits: impl FnMut(usize) -> bool) -> usize {
    assert!(min <= max, "invalid length range [{}, {}]", min, max);
    if !fits(min) {
        return min;
    }
    if fits(max) {
        return max;
    }
    // Invariant: `lo` fits, `hi` does not.
    let mut lo = min;
    let mut hi = max;
    let mut diff = (hi - lo) / 2;
    while diff > 0 {
        let length = lo + diff;
        if fits(length) {
            lo = length;
        } else {
            hi = length;
        }
        diff = (hi - lo) / 2;
    }
    lo
}

/// Decides whether an eden of a given length can be evacuated within the pause time goal
/// and copied into the free regions outside the reserve.
pub struct YoungLengthPredictor<'a> {
    pub analytics: &'a Analytics,
    pub eden_surv_rate: &'a SurvRateGroup,
    /// Predicted time of everything that does not scale with eden.
    pub base_time_ms: f64,
    pub base_free_regions: usize,
    pub target_pause_time_ms: f64,
    pub region_size_bytes: usize,
    pub during_concurrent_mark: bool,
    pub confidence_percent: f64,
    pub target_plab_waste_percent: f64,
}

impl<'a> YoungLengthPredictor<'a> {
    pub fn predicted_pause_time_ms(&self, young_length: usize) -> (f64, usize) {
        let bytes_to_copy = if young_length == 0 {
            0
        } else {
            let surv_regions = self.eden_surv_rate.accum_surv_rate_pred(young_length - 1);
            (surv_regions * self.region_size_bytes as f64) as usize
        };
        let copy_time_ms = self
            .analytics
            .predict_object_copy_time_ms(bytes_to_copy, self.during_concurrent_mark);
        let young_other_time_ms = self.analytics.predict_young_other_time_ms(young_length);
        (
            self.base_time_ms + copy_time_ms + young_other_time_ms,
            bytes_to_copy,
        )
    }

    pub fn will_fit(&self, young_length: usize) -> bool {
        if young_length >= self.base_free_regions {
            return false;
        }

        let (pause_time_ms, bytes_to_copy) = self.predicted_pause_time_ms(young_length);
        if pause_time_ms > self.target_pause_time_ms {
            return false;
        }

        // Copying needs more space than what is live: scale by the uncertainty of the
        // prediction and by the expected buffer waste.
        let free_bytes = (self.base_free_regions - young_length) * self.region_size_bytes;
        let safety_factor = (100.0 / self.confidence_percent)
            * (100.0 + self.target_plab_waste_percent)
            / 100.0;
        let expected_bytes_to_copy = (safety_factor * bytes_to_copy as f64) as usize;
        expected_bytes_to_copy <= free_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{predictor::Predictions, surv_rate::SurvRateGroupKind};
    use proptest::prelude::*;

    const MB: usize = 1024 * 1024;

    #[test]
    fn test_default_sizer_uses_percentages() {
        let mut sizer = YoungGenSizer::new(&PolicyConfig::default()).unwrap();
        sizer.heap_size_changed(1000);
        assert_eq!(sizer.kind(), YoungGenSizerKind::Defaults);
        assert_eq!(sizer.min_desired_young_length(), 50);
        assert_eq!(sizer.max_desired_young_length(), 600);
        assert!(sizer.adaptive_young_list_length());

        sizer.heap_size_changed(10);
        assert_eq!(sizer.min_desired_young_length(), 1);
        assert_eq!(sizer.max_desired_young_length(), 6);
    }

    #[test]
    fn test_explicit_sizes() {
        let config = PolicyConfig {
            new_size_bytes: Some(20 * MB),
            ..Default::default()
        };
        let mut sizer = YoungGenSizer::new(&config).unwrap();
        sizer.heap_size_changed(20);
        assert_eq!(sizer.kind(), YoungGenSizerKind::NewSizeOnly);
        // The maximum never drops below the explicit minimum.
        assert_eq!(sizer.min_desired_young_length(), 20);
        assert_eq!(sizer.max_desired_young_length(), 20);

        let config = PolicyConfig {
            new_size_bytes: Some(30 * MB),
            max_new_size_bytes: Some(30 * MB),
            ..Default::default()
        };
        let sizer = YoungGenSizer::new(&config).unwrap();
        assert_eq!(sizer.kind(), YoungGenSizerKind::MaxAndNewSize);
        assert!(!sizer.adaptive_young_list_length());

        let config = PolicyConfig {
            new_size_bytes: Some(30 * MB),
            max_new_size_bytes: Some(10 * MB),
            ..Default::default()
        };
        assert!(matches!(
            YoungGenSizer::new(&config),
            Err(ConfigError::YoungSize(_))
        ));
    }

    #[test]
    fn test_new_ratio() {
        let config = PolicyConfig {
            new_ratio: Some(3),
            ..Default::default()
        };
        let mut sizer = YoungGenSizer::new(&config).unwrap();
        sizer.heap_size_changed(100);
        assert_eq!(sizer.kind(), YoungGenSizerKind::NewRatio);
        assert_eq!(sizer.min_desired_young_length(), 25);
        assert_eq!(sizer.max_desired_young_length(), 25);
        assert!(!sizer.adaptive_young_list_length());
    }

    fn linear_time(length: usize) -> f64 {
        // 120ms at 50 regions, 250ms at 400 regions.
        120.0 + (length as f64 - 50.0) * 130.0 / 350.0
    }

    #[test]
    fn test_search_finds_longest_length_within_goal() {
        let bounds = YoungGenBounds {
            fixed_length: None,
            min_desired: 50,
            max_desired: 400,
            max_allowed: 1000,
        };
        let lengths = bounds.target_lengths(0, true, |length| linear_time(length) <= 200.0);
        assert!(lengths.bounded > 50 && lengths.bounded < 400);
        assert!(linear_time(lengths.bounded) <= 200.0);
        assert!(linear_time(lengths.bounded + 1) > 200.0);
        assert_eq!(lengths.bounded, lengths.unbounded);
    }

    #[test]
    fn test_minimum_wins_when_nothing_fits() {
        let bounds = YoungGenBounds {
            fixed_length: None,
            min_desired: 50,
            max_desired: 400,
            max_allowed: 30,
        };
        let lengths = bounds.target_lengths(10, true, |_| false);
        assert_eq!(lengths.unbounded, 50);
        assert_eq!(lengths.bounded, 50);
    }

    #[test]
    fn test_fixed_and_mixed_phase_targets() {
        let bounds = YoungGenBounds {
            fixed_length: Some(40),
            min_desired: 40,
            max_desired: 40,
            max_allowed: 100,
        };
        assert_eq!(bounds.target_lengths(5, true, |_| true).bounded, 40);

        let bounds = YoungGenBounds {
            fixed_length: None,
            min_desired: 12,
            max_desired: 400,
            max_allowed: 100,
        };
        let lengths = bounds.target_lengths(5, false, |_| true);
        assert_eq!(lengths, YoungTargetLengths { bounded: 12, unbounded: 12 });

        let lengths = bounds.target_lengths(5, true, |_| true);
        assert_eq!(lengths, YoungTargetLengths { bounded: 100, unbounded: 400 });
    }

    #[test]
    fn test_will_fit_respects_free_space_and_goal() {
        let analytics = Analytics::new(Predictions::new(0.5), 4, 0.0);
        let surv = SurvRateGroup::new(SurvRateGroupKind::Eden);
        let predictor = YoungLengthPredictor {
            analytics: &analytics,
            eden_surv_rate: &surv,
            base_time_ms: 10.0,
            base_free_regions: 100,
            target_pause_time_ms: 200.0,
            region_size_bytes: MB,
            during_concurrent_mark: false,
            confidence_percent: 50.0,
            target_plab_waste_percent: 10.0,
        };
        assert!(predictor.will_fit(1));
        assert!(!predictor.will_fit(100));
        assert!(!predictor.will_fit(150));

        let tight = YoungLengthPredictor {
            target_pause_time_ms: 5.0,
            ..predictor
        };
        assert!(!tight.will_fit(1));
    }

    proptest! {
        #[test]
        fn prop_bounded_target_within_bounds(
            min in 1usize..200,
            extra_max in 0usize..300,
            extra_allowed in 0usize..300,
            base in 0usize..50,
            limit in 0usize..800,
            search in any::<bool>(),
        ) {
            let min_desired = min + base;
            let max_desired = min_desired + extra_max;
            let max_allowed = max_desired + extra_allowed;
            let bounds = YoungGenBounds { fixed_length: None, min_desired, max_desired, max_allowed };
            let lengths = bounds.target_lengths(base, search, |eden| eden <= limit);
            prop_assert!(lengths.bounded >= min_desired && lengths.bounded <= max_allowed);
            prop_assert!(lengths.unbounded >= min_desired && lengths.unbounded <= max_desired);
            if min > limit {
                prop_assert_eq!(lengths.bounded, min_desired);
            }
        }

        #[test]
        fn prop_search_matches_linear_scan(min in 0usize..100, len in 0usize..200, limit in 0usize..400) {
            let max = min + len;
            let found = largest_fitting_length(min, max, |l| l <= limit);
            let expected = (min..=max).filter(|l| *l <= limit).max().unwrap_or(min);
            prop_assert_eq!(found, expected);
        }
    }
}
