// Scheduler: periodic due-task scan, job enqueueing, schedule advancement

pub mod engine;

pub use engine::{SchedulerConfig, SchedulerEngine, TickOutcome};
