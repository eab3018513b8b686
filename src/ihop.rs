//! Initiating heap occupancy control.
//!
//! Decides at which old generation occupancy a concurrent marking cycle has to start so
//! that it completes before the heap fills up.
use crate::{predictor::Predictions, seq::TruncatedSeq};

/// Snapshot of an IHOP controller's inputs and output, for logging and metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct IhopReport {
    pub threshold_bytes: usize,
    pub target_occupancy_bytes: usize,
    pub current_occupancy_bytes: usize,
    pub last_allocated_bytes: usize,
    pub last_allocation_time_s: f64,
    pub last_marking_length_s: f64,
    /// Only set by the adaptive controller once it has enough samples.
    pub predicted_marking_time_s: Option<f64>,
    pub predicted_allocation_rate: Option<f64>,
}

impl IhopReport {
    /// Old generation allocation rate in bytes per second over the last mutator phase.
    pub fn last_allocation_rate(&self) -> f64 {
        if self.last_allocation_time_s > 0.0 {
            self.last_allocated_bytes as f64 / self.last_allocation_time_s
        } else {
            0.0
        }
    }
}

pub trait IhopControl: Send {
    /// Old generation occupancy, in bytes, at which marking should start.
    fn conc_mark_start_threshold(&self) -> usize;

    /// Sets the occupancy the heap may reach. Follows heap capacity changes.
    fn update_target_occupancy(&mut self, target_occupancy: usize);

    /// Feeds the length of the last mutator phase, the bytes allocated into the old
    /// generation during it, and the young generation size the collector would have used
    /// without being restrained by the pause time goal.
    fn update_allocation_info(
        &mut self,
        allocation_time_s: f64,
        allocated_bytes: usize,
        additional_buffer_size: usize,
    );

    /// Feeds the length of the last concurrent marking, from initial mark to first mixed
    /// collection.
    fn update_marking_length(&mut self, marking_length_s: f64);

    fn is_adaptive(&self) -> bool;

    fn report(&self, current_occupancy: usize) -> IhopReport;

    fn print(&self, current_occupancy: usize) {
        let report = self.report(current_occupancy);
        log::debug!(
            target: "gc::ergo::ihop",
            "Basic information (value update), threshold: {}B ({:.2}), target occupancy: {}B, \
             current occupancy: {}B, recent allocation size: {}B, recent allocation duration: {:.2}ms, \
             recent old gen allocation rate: {:.2}B/s, recent marking phase length: {:.2}ms",
            report.threshold_bytes,
            crate::utils::percent_of(report.threshold_bytes, report.target_occupancy_bytes),
            report.target_occupancy_bytes,
            report.current_occupancy_bytes,
            report.last_allocated_bytes,
            report.last_allocation_time_s * 1000.0,
            report.last_allocation_rate(),
            report.last_marking_length_s * 1000.0
        );
        if let (Some(marking), Some(rate)) =
            (report.predicted_marking_time_s, report.predicted_allocation_rate)
        {
            log::debug!(
                target: "gc::ergo::ihop",
                "Adaptive IHOP information (value update), prediction active: true, \
                 predicted marking phase length: {:.2}ms, predicted old gen allocation rate: {:.2}B/s",
                marking * 1000.0,
                rate
            );
        }
    }
}

/// State shared by both controllers.
#[derive(Clone, Debug)]
struct IhopBase {
    initial_ihop_percent: f64,
    target_occupancy: usize,
    last_allocation_time_s: f64,
    last_allocated_bytes: usize,
    last_marking_length_s: f64,
}

impl IhopBase {
    fn new(initial_ihop_percent: f64) -> Self {
        assert!(
            (0.0..=100.0).contains(&initial_ihop_percent),
            "initial IHOP value must be a percentage, is {}",
            initial_ihop_percent
        );
        Self {
            initial_ihop_percent,
            target_occupancy: 0,
            last_allocation_time_s: 0.0,
            last_allocated_bytes: 0,
            last_marking_length_s: 0.0,
        }
    }

    fn initial_threshold(&self) -> usize {
        assert!(self.target_occupancy > 0, "target occupancy must be set first");
        (self.initial_ihop_percent * self.target_occupancy as f64 / 100.0) as usize
    }

    fn update_allocation_info(&mut self, allocation_time_s: f64, allocated_bytes: usize) {
        assert!(
            allocation_time_s >= 0.0,
            "allocation time must be non-negative, is {}",
            allocation_time_s
        );
        self.last_allocation_time_s = allocation_time_s;
        self.last_allocated_bytes = allocated_bytes;
    }

    fn report(&self, threshold_bytes: usize, current_occupancy: usize) -> IhopReport {
        IhopReport {
            threshold_bytes,
            target_occupancy_bytes: self.target_occupancy,
            current_occupancy_bytes: current_occupancy,
            last_allocated_bytes: self.last_allocated_bytes,
            last_allocation_time_s: self.last_allocation_time_s,
            last_marking_length_s: self.last_marking_length_s,
            predicted_marking_time_s: None,
            predicted_allocation_rate: None,
        }
    }
}

/// Always starts marking at a fixed percentage of the target occupancy.
#[derive(Clone, Debug)]
pub struct StaticIhop {
    base: IhopBase,
}

impl StaticIhop {
    pub fn new(ihop_percent: f64) -> Self {
        Self {
            base: IhopBase::new(ihop_percent),
        }
    }
}

impl IhopControl for StaticIhop {
    fn conc_mark_start_threshold(&self) -> usize {
        self.base.initial_threshold()
    }

    fn update_target_occupancy(&mut self, target_occupancy: usize) {
        self.base.target_occupancy = target_occupancy;
    }

    fn update_allocation_info(
        &mut self,
        allocation_time_s: f64,
        allocated_bytes: usize,
        _additional_buffer_size: usize,
    ) {
        self.base
            .update_allocation_info(allocation_time_s, allocated_bytes);
    }

    fn update_marking_length(&mut self, marking_length_s: f64) {
        assert!(marking_length_s > 0.0, "marking length must be positive");
        self.base.last_marking_length_s = marking_length_s;
    }

    fn is_adaptive(&self) -> bool {
        false
    }

    fn report(&self, current_occupancy: usize) -> IhopReport {
        self.base
            .report(self.conc_mark_start_threshold(), current_occupancy)
    }
}

/// Predicts how much will be promoted while marking runs and starts marking early enough
/// that this amount, plus the young generation, still fits below the target.
///
/// Until enough marking lengths and allocation rates have been observed it behaves like
/// [`StaticIhop`].
#[derive(Clone, Debug)]
pub struct AdaptiveIhop {
    base: IhopBase,
    heap_reserve_percent: usize,
    heap_waste_percent: usize,
    max_capacity_bytes: usize,
    initial_samples: usize,
    predictions: Predictions,
    marking_times_s: TruncatedSeq,
    allocation_rate_s: TruncatedSeq,
    last_unrestrained_young_size: usize,
}

impl AdaptiveIhop {
    pub fn new(
        ihop_percent: f64,
        predictions: Predictions,
        heap_reserve_percent: usize,
        heap_waste_percent: usize,
        max_capacity_bytes: usize,
        initial_samples: usize,
    ) -> Self {
        Self {
            base: IhopBase::new(ihop_percent),
            heap_reserve_percent,
            heap_waste_percent,
            max_capacity_bytes,
            initial_samples,
            predictions,
            marking_times_s: TruncatedSeq::with_alpha(10, 0.05),
            allocation_rate_s: TruncatedSeq::with_alpha(10, 0.05),
            last_unrestrained_young_size: 0,
        }
    }

    /// The occupancy marking must have finished by. Leaves room for the reserve and the
    /// space mixed collections are allowed to leave behind.
    fn actual_target_threshold(&self) -> usize {
        assert!(self.base.target_occupancy > 0, "target occupancy must be set first");
        let safe_total_heap_percentage =
            ((self.heap_reserve_percent + self.heap_waste_percent) as f64).min(100.0);
        let by_capacity =
            self.max_capacity_bytes as f64 * (100.0 - safe_total_heap_percentage) / 100.0;
        let by_target = self.base.target_occupancy as f64
            * (100.0 - self.heap_waste_percent as f64)
            / 100.0;
        by_capacity.min(by_target) as usize
    }

    fn have_enough_data_for_prediction(&self) -> bool {
        self.marking_times_s.num() >= self.initial_samples
            && self.allocation_rate_s.num() >= self.initial_samples
    }

    fn predicted_marking_time_s(&self) -> f64 {
        self.predictions.predict(&self.marking_times_s)
    }

    fn predicted_allocation_rate(&self) -> f64 {
        self.predictions.predict(&self.allocation_rate_s)
    }
}

impl IhopControl for AdaptiveIhop {
    fn conc_mark_start_threshold(&self) -> usize {
        if !self.have_enough_data_for_prediction() {
            return self.base.initial_threshold();
        }
        let pred_promotion_size =
            (self.predicted_marking_time_s() * self.predicted_allocation_rate()) as usize;
        let needed_during_marking = pred_promotion_size + self.last_unrestrained_young_size;
        self.actual_target_threshold()
            .saturating_sub(needed_during_marking)
    }

    fn update_target_occupancy(&mut self, target_occupancy: usize) {
        self.base.target_occupancy = target_occupancy;
        self.max_capacity_bytes = self.max_capacity_bytes.max(target_occupancy);
    }

    fn update_allocation_info(
        &mut self,
        allocation_time_s: f64,
        allocated_bytes: usize,
        additional_buffer_size: usize,
    ) {
        self.base
            .update_allocation_info(allocation_time_s, allocated_bytes);
        if allocation_time_s > 0.0 {
            self.allocation_rate_s
                .add(allocated_bytes as f64 / allocation_time_s);
        }
        self.last_unrestrained_young_size = additional_buffer_size;
    }

    fn update_marking_length(&mut self, marking_length_s: f64) {
        assert!(
            marking_length_s >= 0.0,
            "marking length must be non-negative, is {}",
            marking_length_s
        );
        self.base.last_marking_length_s = marking_length_s;
        self.marking_times_s.add(marking_length_s);
    }

    fn is_adaptive(&self) -> bool {
        true
    }

    fn report(&self, current_occupancy: usize) -> IhopReport {
        let mut report = self
            .base
            .report(self.conc_mark_start_threshold(), current_occupancy);
        if self.have_enough_data_for_prediction() {
            report.predicted_marking_time_s = Some(self.predicted_marking_time_s());
            report.predicted_allocation_rate = Some(self.predicted_allocation_rate());
        }
        report
    }
}
