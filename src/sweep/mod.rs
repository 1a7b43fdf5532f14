// Chronicle sweep: timeline decomposition with live-entity bookkeeping.
//
// Objective: attribute the wall-clock duration of a task attempt (or a
// whole population of attempts) to the categories competing for it.
//
// Key insight: counting queued jobs vs counting elapsed time are very
// different questions. One 40-hour queued failure can dominate a thousand
// quick successes, so every slice of the timeline is split fairly between
// whatever is live during it.

mod attribution;
mod engine;
mod point;
mod population;

pub use attribution::{calculate_time_consumption, TimeConsumption};
pub use engine::{duration_secs, sweep, IntervalSlice, SweepError};
pub use point::{ChroniclePoint, Phase, PointKind};
pub use population::{
    replay_live_entities, sweep_population, PopulationPeriod, PopulationSpan, PopulationSweep,
};
