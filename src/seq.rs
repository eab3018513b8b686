/// Weight of the previous decaying average when a new sample is added.
pub const DEFAULT_ALPHA: f64 = 0.7;

/// Number of samples most sequences keep.
pub const DEFAULT_SEQ_LENGTH: usize = 10;

/// Fixed-size window of the most recent samples together with an exponentially decaying
/// average and variance over *all* samples seen so far.
#[derive(Clone, Debug)]
pub struct TruncatedSeq {
    samples: Vec<f64>,
    next: usize,
    num: usize,
    sum: f64,
    sum_of_squares: f64,
    davg: f64,
    dvariance: f64,
    alpha: f64,
}

impl TruncatedSeq {
    pub fn new(length: usize) -> Self {
        Self::with_alpha(length, DEFAULT_ALPHA)
    }

    pub fn with_alpha(length: usize, alpha: f64) -> Self {
        assert!(length > 0, "sequence length must be positive");
        Self {
            samples: vec![0.0; length],
            next: 0,
            num: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
            davg: 0.0,
            dvariance: 0.0,
            alpha,
        }
    }

    pub fn add(&mut self, value: f64) {
        if self.num == 0 {
            self.davg = value;
            self.dvariance = 0.0;
        } else {
            self.davg = (1.0 - self.alpha) * value + self.alpha * self.davg;
            let diff = value - self.davg;
            self.dvariance = (1.0 - self.alpha) * diff * diff + self.alpha * self.dvariance;
        }

        let old = self.samples[self.next];
        self.sum -= old;
        self.sum_of_squares -= old * old;
        self.sum += value;
        self.sum_of_squares += value * value;

        self.samples[self.next] = value;
        self.next = (self.next + 1) % self.samples.len();
        if self.num < self.samples.len() {
            self.num += 1;
        }
    }

    /// Number of samples in the window.
    pub fn num(&self) -> usize {
        self.num
    }

    pub fn is_empty(&self) -> bool {
        self.num == 0
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn avg(&self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            self.sum / self.num as f64
        }
    }

    pub fn davg(&self) -> f64 {
        self.davg
    }

    pub fn dvariance(&self) -> f64 {
        self.dvariance.max(0.0)
    }

    pub fn dsd(&self) -> f64 {
        self.dvariance().sqrt()
    }

    /// The oldest sample still in the window.
    pub fn oldest(&self) -> f64 {
        if self.num < self.samples.len() {
            self.samples[0]
        } else {
            self.samples[self.next]
        }
    }

    /// The most recently added sample.
    pub fn last(&self) -> f64 {
        let len = self.samples.len();
        self.samples[(self.next + len - 1) % len]
    }
}
