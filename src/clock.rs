use std::time::Instant;

use atomic::{Atomic, Ordering};

/// Source of the timestamps the policy records pauses with.
pub trait Clock: Send + Sync {
    /// Seconds since an arbitrary, fixed origin.
    fn now_sec(&self) -> f64;
}

pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_sec(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Atomic<f64>,
}

impl ManualClock {
    pub fn new(now_sec: f64) -> Self {
        Self {
            now: Atomic::new(now_sec),
        }
    }

    pub fn set(&self, now_sec: f64) {
        self.now.store(now_sec, Ordering::Release);
    }

    pub fn advance_ms(&self, ms: f64) {
        let now = self.now.load(Ordering::Acquire);
        self.set(now + ms / 1000.0);
    }
}

impl Clock for ManualClock {
    fn now_sec(&self) -> f64 {
        self.now.load(Ordering::Acquire)
    }
}
