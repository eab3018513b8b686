use crate::{predictor::Predictions, seq::TruncatedSeq};

/// Survival rate assumed for a region age nothing is known about yet.
pub const INITIAL_SURV_RATE: f64 = 0.4;

/// The two young populations whose survival rates are tracked separately.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum SurvRateGroupKind {
    /// Regions mutators allocated into since the last pause.
    Eden,
    /// Regions holding objects that survived the last pause.
    Survivor,
}

/// Handed to a young region when it joins a group. The region's age in the group is
/// derived from it; regions added later are younger.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SurvRateTag {
    pub group: SurvRateGroupKind,
    pub age_index: usize,
}

/// Survival statistics per region age for one population of young regions.
///
/// The n-th most recently added region has age n. After a pause the bytes that survived
/// in each region are recorded against its age; the resulting per-age predictions are
/// accumulated so that the expected survivors of the `n` youngest regions is a lookup.
pub struct SurvRateGroup {
    kind: SurvRateGroupKind,
    surv_rate_pred: Vec<TruncatedSeq>,
    accum_surv_rate_pred: Vec<f64>,
    last_pred: f64,
    all_regions_allocated: usize,
    region_num: usize,
    setup_seq_num: usize,
}

impl SurvRateGroup {
    pub fn new(kind: SurvRateGroupKind) -> Self {
        let mut this = Self {
            kind,
            surv_rate_pred: Vec::new(),
            accum_surv_rate_pred: Vec::new(),
            last_pred: 0.0,
            all_regions_allocated: 0,
            region_num: 0,
            setup_seq_num: 0,
        };
        this.reset();
        this.start_adding_regions();
        this
    }

    pub fn kind(&self) -> SurvRateGroupKind {
        self.kind
    }

    /// Drops all history and seeds age 0 with [`INITIAL_SURV_RATE`].
    pub fn reset(&mut self) {
        self.all_regions_allocated = 0;
        self.setup_seq_num = 0;
        self.last_pred = 0.0;
        self.surv_rate_pred.clear();
        self.accum_surv_rate_pred.clear();

        self.region_num = 1;
        self.stop_adding_regions();
        debug_assert_eq!(self.surv_rate_pred.len(), 1);

        self.surv_rate_pred[0].add(INITIAL_SURV_RATE);
        self.accum_surv_rate_pred[0] = INITIAL_SURV_RATE;
        self.last_pred = INITIAL_SURV_RATE;
        self.region_num = 0;
    }

    pub fn start_adding_regions(&mut self) {
        self.setup_seq_num = self.surv_rate_pred.len();
        self.region_num = 0;
        self.all_regions_allocated = 0;
    }

    /// Grows the statistics so that every age added since
    /// [`start_adding_regions`](Self::start_adding_regions) has a sequence.
    pub fn stop_adding_regions(&mut self) {
        while self.surv_rate_pred.len() < self.region_num {
            self.surv_rate_pred.push(TruncatedSeq::new(10));
            self.accum_surv_rate_pred.push(0.0);
        }
    }

    pub fn next_age_index(&mut self) -> SurvRateTag {
        self.region_num += 1;
        self.all_regions_allocated += 1;
        SurvRateTag {
            group: self.kind,
            age_index: self.all_regions_allocated,
        }
    }

    pub fn age_in_group(&self, age_index: usize) -> usize {
        assert!(
            age_index <= self.all_regions_allocated,
            "age index {} from the future (allocated {})",
            age_index,
            self.all_regions_allocated
        );
        self.all_regions_allocated - age_index
    }

    pub fn region_num(&self) -> usize {
        self.region_num
    }

    pub fn stats_arrays_length(&self) -> usize {
        self.surv_rate_pred.len()
    }

    /// Records that `surviving_bytes` of a region of age `age` survived.
    pub fn record_surviving_bytes(&mut self, age: usize, surviving_bytes: usize, region_size_bytes: usize) {
        assert!(
            age < self.region_num && age < self.surv_rate_pred.len(),
            "age {} not part of this collection ({} regions)",
            age,
            self.region_num
        );
        let surv_rate = surviving_bytes as f64 / region_size_bytes as f64;
        self.surv_rate_pred[age].add(surv_rate);
    }

    /// Called once all regions of the collection set have been freed.
    pub fn all_surviving_bytes_recorded(&mut self, predictions: &Predictions, update_predictors: bool) {
        if update_predictors {
            self.fill_in_last_surv_rates();
        }
        self.finalize_predictions(predictions);
    }

    /// Ages past the ones collected this time get the oldest observed rate.
    fn fill_in_last_surv_rates(&mut self) {
        if self.region_num > 0 && self.region_num <= self.surv_rate_pred.len() {
            let surv_rate = self.surv_rate_pred[self.region_num - 1].last();
            for seq in self.surv_rate_pred.iter_mut().skip(self.region_num) {
                seq.add(surv_rate);
            }
        }
    }

    fn finalize_predictions(&mut self, predictions: &Predictions) {
        let mut accum = 0.0;
        let mut pred = 0.0;
        for (seq, slot) in self
            .surv_rate_pred
            .iter()
            .zip(self.accum_surv_rate_pred.iter_mut())
        {
            pred = predictions.predict(seq).min(1.0);
            accum += pred;
            *slot = accum;
        }
        self.last_pred = pred;
    }

    /// Expected number of regions' worth of survivors from the `age + 1` youngest regions.
    pub fn accum_surv_rate_pred(&self, age: usize) -> f64 {
        let len = self.accum_surv_rate_pred.len();
        if age < len {
            self.accum_surv_rate_pred[age]
        } else {
            let diff = (age - len + 1) as f64;
            self.accum_surv_rate_pred[len - 1] + diff * self.last_pred
        }
    }

    /// Predicted fraction of a region of age `age` that survives.
    pub fn surv_rate_pred(&self, predictions: &Predictions, age: usize) -> f64 {
        let age = age.min(self.surv_rate_pred.len() - 1);
        predictions.predict(&self.surv_rate_pred[age])
    }
}
