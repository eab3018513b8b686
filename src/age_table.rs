use crate::utils::formatted_size;

/// Number of distinct survivor ages tracked. Objects that survive more collections than
/// this are accounted to the oldest age.
pub const TABLE_SIZE: usize = 16;

/// Bytes of surviving objects per age, collected while copying survivors.
///
/// Each worker fills its own table; they are merged into the policy's table with
/// [`merge`](AgeTable::merge) before the tenuring threshold is recomputed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgeTable {
    sizes: [usize; TABLE_SIZE],
}

impl AgeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.sizes = [0; TABLE_SIZE];
    }

    pub fn add(&mut self, age: usize, bytes: usize) {
        let age = age.min(TABLE_SIZE - 1);
        self.sizes[age] += bytes;
    }

    pub fn merge(&mut self, other: &AgeTable) {
        for (mine, theirs) in self.sizes.iter_mut().zip(other.sizes.iter()) {
            *mine += *theirs;
        }
    }

    pub fn size_of(&self, age: usize) -> usize {
        self.sizes[age]
    }

    pub fn total(&self) -> usize {
        self.sizes.iter().sum()
    }

    /// The age at which surviving objects start being promoted.
    ///
    /// Walks ages from the youngest and returns the first one at which the cumulative
    /// survivor bytes no longer fit `desired_survivor_size`. Objects at or above the
    /// returned age are promoted on their next copy. When everything fits the result is
    /// `max_tenuring_threshold`.
    pub fn compute_tenuring_threshold(
        &self,
        desired_survivor_size: usize,
        max_tenuring_threshold: u32,
    ) -> u32 {
        if desired_survivor_size == 0 {
            return 0;
        }
        let mut total = 0;
        for (age, size) in self.sizes.iter().enumerate() {
            total += *size;
            if total > desired_survivor_size {
                return (age as u32).min(max_tenuring_threshold);
            }
        }
        max_tenuring_threshold
    }

    /// Dumps the table at trace level.
    pub fn print(&self, desired_survivor_size: usize, threshold: u32, max_threshold: u32) {
        log::debug!(
            target: "gc::age",
            "Desired survivor size {} bytes, new threshold {} (max threshold {})",
            desired_survivor_size,
            threshold,
            max_threshold
        );
        if !log::log_enabled!(target: "gc::age", log::Level::Trace) {
            return;
        }
        let mut total = 0;
        for (age, size) in self.sizes.iter().enumerate() {
            if *size == 0 {
                continue;
            }
            total += *size;
            log::trace!(
                target: "gc::age",
                "- age {:>3}: {:>10} bytes, {:>10} total ({})",
                age,
                size,
                total,
                formatted_size(total)
            );
        }
    }
}
