//! Minimum mutator utilisation tracking.
//!
//! Keeps the most recent pauses and answers how long the next pause has to be delayed so
//! that no window of `pause_interval` contains more than `pause_time_goal` of GC time.
use std::collections::VecDeque;

/// Pauses kept in the window. Older ones are dropped even if they are still inside it.
pub const QUEUE_LENGTH: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq)]
struct PauseElem {
    start_sec: f64,
    end_sec: f64,
}

impl PauseElem {
    fn duration(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

#[inline]
fn is_leq_zero(value: f64) -> bool {
    value < 1e-7
}

pub struct MmuTracker {
    time_slice_sec: f64,
    max_gc_time_sec: f64,
    queue: VecDeque<PauseElem>,
}

impl MmuTracker {
    pub fn new(time_slice_sec: f64, max_gc_time_sec: f64) -> Self {
        assert!(
            max_gc_time_sec < time_slice_sec,
            "gc time {} does not fit into time slice {}",
            max_gc_time_sec,
            time_slice_sec
        );
        Self {
            time_slice_sec,
            max_gc_time_sec,
            queue: VecDeque::with_capacity(QUEUE_LENGTH),
        }
    }

    pub fn time_slice_sec(&self) -> f64 {
        self.time_slice_sec
    }

    pub fn max_gc_time_sec(&self) -> f64 {
        self.max_gc_time_sec
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn add_pause(&mut self, start_sec: f64, end_sec: f64) {
        self.remove_expired_entries(end_sec);
        if self.queue.len() == QUEUE_LENGTH {
            // Dropping the oldest entry can only make the tracker more optimistic.
            log::trace!(target: "gc::ergo", "MMU tracker full, dropping oldest pause");
            self.queue.pop_front();
        }
        self.queue.push_back(PauseElem { start_sec, end_sec });
    }

    fn remove_expired_entries(&mut self, current_time_sec: f64) {
        let limit = current_time_sec - self.time_slice_sec;
        while let Some(oldest) = self.queue.front() {
            if oldest.end_sec >= limit {
                break;
            }
            self.queue.pop_front();
        }
    }

    /// GC time spent in the window ending at `current_time_sec`.
    pub fn gc_time_in_window(&self, current_time_sec: f64) -> f64 {
        let limit = current_time_sec - self.time_slice_sec;
        self.queue
            .iter()
            .filter(|elem| elem.end_sec > limit)
            .map(|elem| {
                if elem.start_sec > limit {
                    elem.duration()
                } else {
                    elem.end_sec - limit
                }
            })
            .sum()
    }

    /// Seconds from `current_time_sec` until a pause of `pause_time_sec` can start
    /// without exceeding the goal in any window.
    pub fn when_sec(&self, current_time_sec: f64, pause_time_sec: f64) -> f64 {
        let adjusted_pause_time = pause_time_sec.min(self.max_gc_time_sec);
        let earliest_end = current_time_sec + adjusted_pause_time;
        let limit = earliest_end - self.time_slice_sec;
        let gc_time = self.gc_time_in_window(earliest_end);
        let mut diff = gc_time + adjusted_pause_time - self.max_gc_time_sec;
        if is_leq_zero(diff) {
            return 0.0;
        }

        for elem in self.queue.iter() {
            if elem.end_sec > limit {
                if elem.start_sec > limit {
                    diff -= elem.duration();
                } else {
                    diff -= elem.end_sec - limit;
                }
                if is_leq_zero(diff) {
                    return elem.end_sec + diff + self.time_slice_sec
                        - adjusted_pause_time
                        - current_time_sec;
                }
            }
        }
        debug_assert!(false, "MMU window exhausted with {} left over", diff);
        0.0
    }

    pub fn when_max_gc_sec(&self, current_time_sec: f64) -> f64 {
        self.when_sec(current_time_sec, self.max_gc_time_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tracker_allows_immediate_pause() {
        let tracker = MmuTracker::new(0.201, 0.2);
        assert_eq!(tracker.when_max_gc_sec(10.0), 0.0);
        assert_eq!(tracker.gc_time_in_window(10.0), 0.0);
    }

    #[test]
    fn test_gc_time_clips_to_window() {
        let mut tracker = MmuTracker::new(1.0, 0.5);
        tracker.add_pause(0.0, 0.2);
        tracker.add_pause(0.8, 1.0);
        // Window at 1.1 is [0.1, 1.1].
        assert!((tracker.gc_time_in_window(1.1) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_delay_until_window_has_room() {
        let mut tracker = MmuTracker::new(1.0, 0.5);
        tracker.add_pause(0.0, 0.4);
        // A 0.5s pause right away would put 0.9s into the window. It must wait until the
        // earlier pause has slid out far enough.
        let when = tracker.when_sec(0.4, 0.5);
        assert!((when - 0.5).abs() < 1e-9, "{}", when);

        let start = 0.4 + when;
        let end = start + 0.5;
        assert!(tracker.gc_time_in_window(end) <= 0.5 + 1e-9);
    }

    #[test]
    fn test_expired_and_overflowing_entries_are_dropped() {
        let mut tracker = MmuTracker::new(1.0, 0.5);
        tracker.add_pause(0.0, 0.1);
        tracker.add_pause(5.0, 5.1);
        assert_eq!(tracker.len(), 1);

        for i in 0..(QUEUE_LENGTH + 10) {
            let start = 10.0 + i as f64 * 0.001;
            tracker.add_pause(start, start + 0.0001);
        }
        assert_eq!(tracker.len(), QUEUE_LENGTH);
    }
}
