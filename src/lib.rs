//! Adaptive pause time goal policy for a regionalized, generational collector.
//!
//! The collector owns the heap and does all the work; [`Policy`] only decides. It is told
//! about every pause and in return picks:
//!
//! - how many regions the young generation gets until the next pause,
//! - when a concurrent marking cycle should start (the IHOP, initiating heap occupancy
//!   percent, see [`ihop`]),
//! - how many old regions a mixed collection evacuates,
//! - at which age survivors are promoted.
//!
//! Everything is derived from decaying averages of what past pauses measured, so that the
//! next pause is predicted to stay within [`PolicyConfig::pause_time_goal_ms`].
//!
//! ```no_run
//! use comet_pacer::{Policy, PolicyConfig};
//! # fn run<H: comet_pacer::HeapView>(heap: &mut H) -> comet_pacer::ConfigResult<()> {
//! let mut policy = Policy::new(PolicyConfig::default(), &*heap)?;
//! policy.note_gc_start();
//! policy.decide_on_conc_mark_initiation(heap);
//! policy.record_collection_pause_start(&*heap, 1.0);
//! // ... evacuate ...
//! policy.record_collection_pause_end(heap, 12.5);
//! # Ok(())
//! # }
//! ```
pub mod age_table;
pub mod analytics;
pub mod clock;
pub mod collector_state;
pub mod config;
pub mod cset;
pub mod error;
pub mod heap;
pub mod ihop;
pub mod marking;
pub mod mmu;
pub mod pause;
pub mod phase_times;
pub mod policy;
pub mod predictor;
pub mod seq;
pub mod statistics;
pub mod surv_rate;
pub mod utils;
pub mod young_gen;

pub use crate::{
    age_table::AgeTable,
    clock::{Clock, ManualClock, MonotonicClock},
    config::PolicyConfig,
    cset::{CSetBudget, CollectionSetCandidates},
    error::{ConfigError, ConfigResult},
    heap::{GcCause, HeapView, RefinementStats, RegionInfo},
    marking::{MarkingCycleFlag, MarkingInitiation},
    pause::PauseKind,
    phase_times::PhaseTimes,
    policy::{FullGcEscalation, NeverUpgrade, Policy, UpgradeFor},
    statistics::{MemorySink, NoopSink, PolicyEvent, PolicySink, PolicyStatistics},
    surv_rate::SurvRateTag,
};

#[cfg(test)]
mod tests;
