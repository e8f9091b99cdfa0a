//! Executor module - batch planning and the per-block execution loop

mod engine;
mod planner;

pub use engine::{Executor, ExecutorStatus, RunOutcome};
pub use planner::BatchPlan;

#[cfg(test)]
pub use engine::Phase;
#[cfg(test)]
pub use planner::BatchPlanner;
