//! Periodic price alert scheduler.
//!
//! Each tick lists the active rules, runs every rule through the
//! fetch → evaluate → gate → dispatch → persist pipeline with bounded
//! concurrency, and stops cleanly when cancelled.

pub mod pipeline;
pub mod runner;

pub use pipeline::{RuleOutcome, RulePipeline};
pub use runner::{AlertScheduler, SchedulerError, SchedulerState, TickSummary};
