use parking_lot::Mutex;

use crate::{
    analytics::PauseTotals,
    cset::CSetBudget,
    ihop::IhopReport,
    pause::PauseKind,
    utils::formatted_size,
};

/// A value the policy reports to the outside world.
#[derive(Clone, Debug, PartialEq)]
pub enum PolicyEvent {
    PauseRecorded {
        kind: PauseKind,
        start_sec: f64,
        end_sec: f64,
    },
    YoungTargetUpdated {
        target_length: usize,
        unbounded_length: usize,
        max_length: usize,
    },
    Ihop(IhopReport),
    CollectionSetChosen {
        eden_regions: usize,
        survivor_regions: usize,
        old: CSetBudget,
    },
    Tenuring {
        threshold: u32,
        desired_survivor_size: usize,
        max_survivor_regions: usize,
    },
    /// Outcome of checking for a marking request at the start of a pause.
    MarkingDecision {
        initiated: bool,
        reason: &'static str,
    },
    RefinementGoal {
        goal_ms: f64,
        logged_cards_time_ms: f64,
        hcc_time_ms: f64,
    },
}

/// Receives metrics. Implementations must be cheap; they are called inside pauses.
pub trait PolicySink: Send + Sync {
    fn record(&self, event: PolicyEvent);
}

/// Drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl PolicySink for NoopSink {
    fn record(&self, _event: PolicyEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PolicyEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<PolicyEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn count(&self, mut predicate: impl FnMut(&PolicyEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }
}

impl PolicySink for MemorySink {
    fn record(&self, event: PolicyEvent) {
        self.events.lock().push(event);
    }
}

pub struct PolicyStatistics {
    pub pauses: [PauseTotals; PauseKind::COUNT],
    pub young_list_target_length: usize,
    pub young_list_max_length: usize,
    pub max_survivor_regions: usize,
    pub reserve_regions: usize,
    pub tenuring_threshold: u32,
    pub ihop_threshold: usize,
    pub heap_capacity: usize,
    pub recent_avg_pause_time_ratio: f64,
}

impl PolicyStatistics {
    pub fn pause_totals(&self, kind: PauseKind) -> &PauseTotals {
        &self.pauses[kind.index()]
    }

    pub fn total_pauses(&self) -> u64 {
        self.pauses.iter().map(|p| p.count).sum()
    }
}

impl std::fmt::Display for PolicyStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Policy statistics:")?;
        for kind in PauseKind::ALL.iter() {
            let totals = self.pause_totals(*kind);
            if totals.count == 0 {
                continue;
            }
            writeln!(
                f,
                "  {}: {} pauses, total {:.3}ms, avg {:.3}ms, max {:.3}ms",
                kind,
                totals.count,
                totals.total_ms,
                totals.avg_ms(),
                totals.max_ms
            )?;
        }
        writeln!(f, "  Total pauses: {}", self.total_pauses())?;
        writeln!(
            f,
            "  Young list target length: {} (max {})",
            self.young_list_target_length, self.young_list_max_length
        )?;
        writeln!(
            f,
            "  Survivor regions: at most {}, tenuring threshold {}",
            self.max_survivor_regions, self.tenuring_threshold
        )?;
        writeln!(f, "  Reserve regions: {}", self.reserve_regions)?;
        writeln!(
            f,
            "  Marking threshold: {} of {} ({:.2}%)",
            formatted_size(self.ihop_threshold),
            formatted_size(self.heap_capacity),
            crate::utils::percent_of(self.ihop_threshold, self.heap_capacity)
        )?;
        writeln!(
            f,
            "  Recent GC time ratio: {:.2}%",
            self.recent_avg_pause_time_ratio * 100.0
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_collects_events() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.record(PolicyEvent::MarkingDecision {
            initiated: true,
            reason: "requested",
        });
        sink.record(PolicyEvent::Tenuring {
            threshold: 3,
            desired_survivor_size: 1024,
            max_survivor_regions: 2,
        });
        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.count(|e| matches!(e, PolicyEvent::Tenuring { .. })),
            1
        );
        assert_eq!(sink.take().len(), 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_display() {
        let mut pauses = [PauseTotals::default(); PauseKind::COUNT];
        pauses[PauseKind::YoungOnly.index()] = PauseTotals {
            count: 2,
            total_ms: 30.0,
            max_ms: 20.0,
        };
        let stats = PolicyStatistics {
            pauses,
            young_list_target_length: 25,
            young_list_max_length: 27,
            max_survivor_regions: 4,
            reserve_regions: 10,
            tenuring_threshold: 15,
            ihop_threshold: 45 * 1024 * 1024,
            heap_capacity: 100 * 1024 * 1024,
            recent_avg_pause_time_ratio: 0.05,
        };
        let text = stats.to_string();
        assert!(text.contains("Pause Young (Normal): 2 pauses, total 30.000ms, avg 15.000ms"));
        assert!(!text.contains("Pause Full"));
        assert!(text.contains("Marking threshold: 45.0M of 100.0M (45.00%)"));
        assert_eq!(stats.total_pauses(), 2);
    }
}
