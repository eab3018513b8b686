use crate::seq::TruncatedSeq;

/// Turns a sequence of samples into a pessimistic point estimate: the decaying average plus
/// `sigma` standard deviations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Predictions {
    sigma: f64,
}

impl Predictions {
    pub fn new(sigma: f64) -> Self {
        Self { sigma }
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Standard deviation of `seq`. Small sample sets get a deviation between the
    /// sample deviation and the mean so that one or two lucky samples do not make the
    /// prediction overconfident.
    fn stddev_estimate(&self, seq: &TruncatedSeq) -> f64 {
        let mut estimate = seq.dsd();
        let samples = seq.num();
        if samples < 5 {
            estimate = estimate.max(seq.davg() * (5 - samples) as f64 / 2.0);
        }
        estimate
    }

    pub fn predict(&self, seq: &TruncatedSeq) -> f64 {
        seq.davg() + self.sigma * self.stddev_estimate(seq)
    }

    pub fn predict_size(&self, seq: &TruncatedSeq) -> usize {
        let prediction = self.predict(seq);
        if prediction <= 0.0 {
            0
        } else {
            prediction as usize
        }
    }
}
